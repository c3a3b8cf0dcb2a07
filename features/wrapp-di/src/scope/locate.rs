use std::{any::type_name, sync::Arc};

use crate::{
    collection::{Located, StrategyCollection},
    context::InjectionContext,
    dependency::Dependencies,
    disposal::DisposalScope,
    errors::{LocateError, LocateErrorKind},
    export_type::{Constructible, ExportType, Generic},
    handle::DiHandle,
    metadata::Metadata,
    request::{LocateOptions, LocateRequest, LocateTarget},
    resolver::{
        arc::downcast,
        lazy::{Lazy, LazyExport},
        wrappers::{Meta, Owned},
        Resolver,
    },
    scope::Scope,
    strategy::StrategyBuilder,
    types::{Injectable, Instance, KeySelector},
};

/// Locate with the context of an ongoing resolution
///
/// These are what constructors resolve through, failures are always returned.
impl Scope {
    pub(crate) fn locate_entry_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        self.ensure_alive()?;

        if request.is_plain() {
            if let Some(instance) = request
                .export_type()
                .and_then(|export_type| context.ambient_export(export_type))
            {
                return Ok(Some(Located::new(instance.clone(), None)));
            }
        }

        if let Some(located) = self.locate_from_chain(context, request)? {
            return Ok(Some(located));
        }

        self.locate_missing(context, request)
    }

    pub(crate) fn locate_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Instance>, LocateError> {
        Ok(self
            .locate_entry_in(context, request)?
            .map(|located| located.instance))
    }

    pub(crate) fn locate_all_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<Instance>, LocateError> {
        let located = self.gather(
            context,
            request,
            |collection, scope, context| collection.activate_all(scope, context, request),
            |instance| Some(Located::new(instance, None)),
        )?;
        Ok(located.into_iter().map(|located| located.instance).collect())
    }

    pub(crate) fn locate_all_owned_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<(Instance, DisposalScope)>, LocateError> {
        self.gather(
            context,
            request,
            |collection, scope, context| collection.activate_all_owned(scope, context, request),
            |instance| Some((instance, DisposalScope::new())),
        )
    }

    pub(crate) fn locate_all_meta_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<(Instance, Metadata)>, LocateError> {
        self.gather(
            context,
            request,
            |collection, scope, context| collection.activate_all_meta(scope, context, request),
            |instance| Some((instance, Metadata::default())),
        )
    }

    pub(crate) fn locate_all_lazy_in(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<LazyExport>, LocateError> {
        // Secondary locators hand out values, not producers - there is nothing to defer
        self.gather(
            context,
            request,
            |collection, scope, context| Ok(collection.activate_all_lazy(scope, context, request)),
            |_| None,
        )
    }

    fn ensure_alive(&self) -> Result<(), LocateError> {
        if self.is_disposed() {
            return Err(LocateErrorKind::ScopeDisposed(self.display_name()).into());
        }
        Ok(())
    }

    /// Walks from this scope to the root, the first scope with a match wins
    fn locate_from_chain(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        for scope in self.ancestors() {
            match scope.locate_local(context, request) {
                Ok(Some(located)) => return Ok(Some(located)),
                Ok(None) => {}
                Err(error) => return Err(error.at(scope.location(request, None))),
            }
        }
        Ok(None)
    }

    fn locate_local(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        if let Some(located) = self.activate_collection(context, request)? {
            tracing::trace!("Located {request} in scope {}", self.display_name());
            return Ok(Some(located));
        }

        if let Some(requested) = request.export_type() {
            if requested.is_constructed() && self.close_generic(requested) {
                if let Some(located) = self.activate_collection(context, request)? {
                    return Ok(Some(located));
                }
            }
        }

        for locator in self.secondary_locators().iter() {
            if let Some(instance) = locator.locate(self, context, request)? {
                return Ok(Some(Located::new(instance, None)));
            }
        }

        Ok(None)
    }

    fn activate_collection(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        match self.collection_for(request) {
            Some(collection) => collection.activate(self, context, request),
            None => Ok(None),
        }
    }

    /// Last resort for requests nothing is registered for
    ///
    /// Missing export providers come first, then wrapper shapes and
    /// constructible types which are registered in the root scope.
    fn locate_missing(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        if self.provide_missing(context, request) {
            if let Some(located) = self.locate_from_chain(context, request)? {
                return Ok(Some(located));
            }
        }

        let Some(requested) = request.export_type() else {
            return Ok(None);
        };
        if request.key.is_some() {
            return Ok(None);
        }

        let root = self.root_scope();
        if root.register_shape(requested) || root.register_constructible(requested) {
            return self.locate_from_chain(context, request);
        }
        Ok(None)
    }

    /// Asks the missing export providers of the chain, nearest scope first
    ///
    /// Provided producers are registered in the scope of the provider that
    /// supplied them.
    fn provide_missing(&self, context: &InjectionContext, request: &LocateRequest) -> bool {
        for scope in self.ancestors() {
            for provider in scope.missing_export_providers().iter() {
                let strategies = provider.provide(scope, context, request);
                if strategies.is_empty() {
                    continue;
                }

                match scope.register(strategies) {
                    Ok(registered) => {
                        tracing::debug!(
                            "Provided {} missing export(s) for {request} in scope {}",
                            registered.len(),
                            scope.display_name()
                        );
                        return true;
                    }
                    Err(error) => {
                        tracing::warn!("Could not register provided exports for {request}: {error}")
                    }
                }
            }
        }
        false
    }

    fn register_shape(&self, requested: &ExportType) -> bool {
        for provider in self.shape_providers().iter() {
            let Some(strategy) = provider.provide(self, requested) else {
                continue;
            };
            match self.register_if_absent(strategy, requested) {
                Ok(_) => return true,
                Err(error) => tracing::warn!("Could not register wrapper for {requested}: {error}"),
            }
        }
        false
    }

    fn register_constructible(&self, requested: &ExportType) -> bool {
        if !self.config().auto_register_unknown || requested.is_constructed() {
            return false;
        }
        let Some(constructor) = requested.constructor() else {
            return false;
        };

        let registered = StrategyBuilder::delegate_instance(requested.clone(), constructor)
            .build()
            .and_then(|strategy| self.register_if_absent(strategy, requested));
        match registered {
            Ok(added) => {
                if added {
                    tracing::debug!("Registered unknown type {requested} on demand");
                }
                true
            }
            Err(error) => {
                tracing::warn!("Could not register unknown type {requested}: {error}");
                false
            }
        }
    }

    /// Collects from every scope in the chain, this scope first
    fn gather<R>(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
        activate: impl Fn(&StrategyCollection, &Scope, &mut InjectionContext) -> Result<Vec<R>, LocateError>,
        from_secondary: impl Fn(Instance) -> Option<R>,
    ) -> Result<Vec<R>, LocateError> {
        self.ensure_alive()?;

        let gathered = self.gather_chain(context, request, &activate, &from_secondary)?;
        if !gathered.is_empty() || !self.provide_missing(context, request) {
            return Ok(gathered);
        }
        self.gather_chain(context, request, &activate, &from_secondary)
    }

    fn gather_chain<R>(
        &self,
        context: &mut InjectionContext,
        request: &LocateRequest,
        activate: &impl Fn(&StrategyCollection, &Scope, &mut InjectionContext) -> Result<Vec<R>, LocateError>,
        from_secondary: &impl Fn(Instance) -> Option<R>,
    ) -> Result<Vec<R>, LocateError> {
        let mut gathered = Vec::new();
        for scope in self.ancestors() {
            if let Some(requested) = request.export_type() {
                if requested.is_constructed() {
                    scope.close_generic(requested);
                }
            }

            if let Some(collection) = scope.collection_for(request) {
                let located = activate(&collection, scope, context)
                    .map_err(|error| error.at(scope.location(request, None)))?;
                gathered.extend(located);
            }

            for locator in scope.secondary_locators().iter() {
                for instance in locator.locate_all(scope, context, request)? {
                    gathered.extend(from_secondary(instance));
                }
            }
        }
        Ok(gathered)
    }
}

/// Public entry points
///
/// Every call starts a fresh resolution from this scope. When the kernel is
/// configured not to throw, failures are logged and turned into `None` or an
/// empty list.
impl Scope {
    fn apply_policy<R>(&self, result: Result<R, LocateError>, fallback: impl FnOnce() -> R) -> Result<R, LocateError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) if self.config().throw_on_failure => Err(error),
            Err(error) => {
                tracing::error!("Resolution from scope {} failed: {error}", self.display_name());
                Ok(fallback())
            }
        }
    }

    fn context_with(&self, options: &LocateOptions) -> InjectionContext {
        let mut context = InjectionContext::new(self);
        for (export_type, instance) in &options.exports {
            context.push_export(export_type.clone(), instance.clone());
        }
        context
    }

    fn resolve_fresh<R: Resolver + 'static>(&self) -> Result<R, LocateError> {
        let mut context = InjectionContext::new(self);
        let mut handle = DiHandle::new(self, &mut context, Dependencies::default(), ExportType::of::<R>());
        R::resolve(&mut handle)
    }

    /// Resolves any [`Resolver`] from this scope
    ///
    /// `None` when the resolution failed and the kernel does not throw.
    pub fn resolve<R: Resolver + 'static>(&self) -> Result<Option<R>, LocateError> {
        let result = self.resolve_fresh::<R>().map(Some);
        self.apply_policy(result, || None)
    }

    /// The value for `T`, `None` if nothing in the chain exports it
    pub fn locate<T: ?Sized + Injectable>(&self) -> Result<Option<Arc<T>>, LocateError> {
        self.locate_with::<T>(LocateOptions::default())
    }

    pub fn locate_with<T: ?Sized + Injectable>(&self, options: LocateOptions) -> Result<Option<Arc<T>>, LocateError> {
        let request = LocateRequest::of_type(ExportType::of::<T>()).with_options(&options);
        let result = self
            .locate_in(&mut self.context_with(&options), &request)
            .and_then(|found| found.as_ref().map(downcast::<T>).transpose());
        self.apply_policy(result, || None)
    }

    /// A closed generic type, see [`Generic`]
    pub fn locate_generic<T: Generic>(&self) -> Result<Option<Arc<T>>, LocateError> {
        let request = LocateRequest::of_type(ExportType::generic::<T>());
        let result = self
            .locate_in(&mut InjectionContext::new(self), &request)
            .and_then(|found| found.as_ref().map(downcast::<T>).transpose());
        self.apply_policy(result, || None)
    }

    /// A concrete type, registered in the root scope on first request if unknown
    pub fn locate_constructible<T: Constructible>(&self) -> Result<Option<Arc<T>>, LocateError> {
        let request = LocateRequest::of_type(ExportType::constructible::<T>());
        let result = self
            .locate_in(&mut InjectionContext::new(self), &request)
            .and_then(|found| found.as_ref().map(downcast::<T>).transpose());
        self.apply_policy(result, || None)
    }

    /// Like [`Scope::locate`], a missing export is an error
    ///
    /// There is nothing to fall back to, so this fails even when the kernel
    /// does not throw.
    pub fn locate_required<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, LocateError> {
        match self.locate::<T>()? {
            Some(value) => Ok(value),
            None => {
                let error = LocateError::not_found(type_name::<T>())
                    .at(self.location(&LocateRequest::of_type(ExportType::of::<T>()), None));
                if !self.config().throw_on_failure {
                    tracing::error!("Resolution from scope {} failed: {error}", self.display_name());
                }
                Err(error)
            }
        }
    }

    /// Untyped locate
    pub fn locate_type(&self, export_type: &ExportType, options: LocateOptions) -> Result<Option<Instance>, LocateError> {
        let request = LocateRequest::of_type(export_type.clone()).with_options(&options);
        let result = self.locate_in(&mut self.context_with(&options), &request);
        self.apply_policy(result, || None)
    }

    /// Names are matched case-insensitively
    pub fn locate_by_name(&self, name: &str) -> Result<Option<Instance>, LocateError> {
        let request = LocateRequest::named(name);
        let result = self.locate_in(&mut InjectionContext::new(self), &request);
        self.apply_policy(result, || None)
    }

    /// Every value exported as `T` in the chain, nearest scope first
    pub fn locate_all<T: ?Sized + Injectable>(&self) -> Result<Vec<Arc<T>>, LocateError> {
        self.locate_all_with::<T>(LocateOptions::default())
    }

    pub fn locate_all_with<T: ?Sized + Injectable>(&self, options: LocateOptions) -> Result<Vec<Arc<T>>, LocateError> {
        let request = LocateRequest::of_type(ExportType::of::<T>()).with_options(&options);
        let result = self
            .locate_all_in(&mut self.context_with(&options), &request)
            .and_then(|all| all.iter().map(downcast::<T>).collect());
        self.apply_policy(result, Vec::new)
    }

    pub fn locate_all_type(&self, export_type: &ExportType, options: LocateOptions) -> Result<Vec<Instance>, LocateError> {
        let request = LocateRequest::of_type(export_type.clone()).with_options(&options);
        let result = self.locate_all_in(&mut self.context_with(&options), &request);
        self.apply_policy(result, Vec::new)
    }

    /// Every export of `T`, each activated on first access
    pub fn locate_all_lazy<T: ?Sized + Injectable>(&self) -> Result<Vec<Lazy<T>>, LocateError> {
        let result = self.resolve_fresh::<Vec<Lazy<T>>>();
        self.apply_policy(result, Vec::new)
    }

    /// Every export of `T`, the caller owns their disposables
    pub fn locate_all_owned<T: ?Sized + Injectable>(&self) -> Result<Vec<Owned<T>>, LocateError> {
        let result = self.resolve_fresh::<Vec<Owned<T>>>();
        self.apply_policy(result, Vec::new)
    }

    pub fn locate_all_meta<T: ?Sized + Injectable>(&self) -> Result<Vec<Meta<T>>, LocateError> {
        let result = self.resolve_fresh::<Vec<Meta<T>>>();
        self.apply_policy(result, Vec::new)
    }

    /// Whether a request for `export_type` could be satisfied, nothing is activated
    pub fn can_locate(&self, export_type: &ExportType, key: Option<&KeySelector>) -> bool {
        let mut request = LocateRequest::of_type(export_type.clone());
        request.key = key.cloned();
        let context = InjectionContext::new(self);

        let registered = self.ancestors().any(|scope| {
            let matched = scope
                .collection_for(&request)
                .is_some_and(|collection| collection.best_match(scope, &context, &request).is_some());
            let closable = export_type
                .generic_definition()
                .is_some_and(|definition| scope.open_generic_collection(&definition).is_some());
            matched || closable
        });
        if registered || key.is_some() {
            return registered;
        }

        let constructible = self.config().auto_register_unknown
            && !export_type.is_constructed()
            && export_type.constructor().is_some();
        constructible || matches!(request.target, LocateTarget::Type(_)) && self.has_shape(export_type)
    }

    /// Whether `T` could be located from this scope
    pub fn has_export<T: ?Sized + Injectable>(&self) -> bool {
        self.can_locate(&ExportType::of::<T>(), None)
    }

    fn has_shape(&self, export_type: &ExportType) -> bool {
        let root = self.root_scope();
        root.shape_providers()
            .iter()
            .any(|provider| provider.provide(&root, export_type).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        config::KernelConfig,
        extension::{MissingExportStrategyProvider, SecondaryExportLocator},
        scope::ChildScopeOptions,
    };

    #[test]
    fn children_see_parent_exports() {
        let root = Scope::root();
        root.add_strategy(StrategyBuilder::instance(5_u32).build().unwrap()).unwrap();
        let child = root.child().unwrap();

        assert_eq!(child.locate::<u32>().unwrap().map(|v| *v), Some(5));
        assert!(child.can_locate(&ExportType::of::<u32>(), None));
        assert!(!child.can_locate(&ExportType::of::<u64>(), None));
    }

    #[test]
    fn nearest_scope_wins_and_all_walks_the_chain() {
        let root = Scope::root();
        root.add_strategy(StrategyBuilder::instance(1_u32).build().unwrap()).unwrap();
        let child = root.child().unwrap();
        child.add_strategy(StrategyBuilder::instance(2_u32).build().unwrap()).unwrap();

        assert_eq!(child.locate::<u32>().unwrap().map(|v| *v), Some(2));
        let all: Vec<u32> = child.locate_all::<u32>().unwrap().iter().map(|v| **v).collect();
        assert_eq!(all, vec![2, 1]);
        assert_eq!(root.locate::<u32>().unwrap().map(|v| *v), Some(1));
    }

    #[test]
    fn missing_values_are_soft_unless_required() {
        let root = Scope::root();
        assert!(root.locate::<u64>().unwrap().is_none());
        assert!(root.locate_all::<u64>().unwrap().is_empty());

        let error = root.locate_required::<u64>().unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn failures_are_logged_when_not_throwing() {
        let root = Scope::with_config(KernelConfig::new().throw_on_failure(false));
        root.add_strategy(
            StrategyBuilder::delegate(|_| Err::<u32, _>("broken".into()))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(root.locate::<u32>().unwrap().is_none());

        let throwing = Scope::root();
        throwing
            .add_strategy(
                StrategyBuilder::delegate(|_| Err::<u32, _>("broken".into()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let error = throwing.locate::<u32>().unwrap_err();
        assert!(matches!(error.kind, LocateErrorKind::ActivationFailed { .. }));
        assert_eq!(error.locations.0.len(), 1);
    }

    #[test]
    fn ambient_exports_win_for_plain_requests() {
        let root = Scope::root();
        root.add_strategy(StrategyBuilder::instance(1_u32).build().unwrap()).unwrap();

        let options = LocateOptions::new().with_export(7_u32);
        assert_eq!(root.locate_with::<u32>(options).unwrap().map(|v| *v), Some(7));
    }

    #[test]
    fn names_are_case_insensitive() {
        let root = Scope::root();
        root.add_strategy(StrategyBuilder::instance(3_u8).export_name("Answer").build().unwrap())
            .unwrap();

        let found = root.locate_by_name(" ANSWER ").unwrap().unwrap();
        assert_eq!(*found.downcast::<u8>().unwrap(), 3);
        assert!(root.locate::<u8>().unwrap().is_none());
    }

    struct Counter(usize);
    impl Constructible for Counter {
        fn construct(_: &mut DiHandle<'_>) -> Result<Self, crate::types::DynError> {
            Ok(Counter(11))
        }
    }

    #[test]
    fn unknown_constructible_types_register_in_root() {
        let root = Scope::root();
        let child = root.child().unwrap();

        let counter = child.locate_constructible::<Counter>().unwrap().unwrap();
        assert_eq!(counter.0, 11);
        assert!(root.strategy(&ExportType::of::<Counter>(), None).is_some());
        assert!(child.strategy(&ExportType::of::<Counter>(), None).is_none());

        let disabled = Scope::with_config(KernelConfig::new().auto_register_unknown(false));
        assert!(disabled.locate_constructible::<Counter>().unwrap().is_none());
    }

    struct Fallback;
    impl SecondaryExportLocator for Fallback {
        fn locate(
            &self,
            _: &Scope,
            _: &mut InjectionContext,
            request: &LocateRequest,
        ) -> Result<Option<Instance>, LocateError> {
            match request.export_type() {
                Some(export_type) if export_type == &ExportType::of::<String>() => {
                    Ok(Some(Instance::new("fallback".to_string())))
                }
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn secondary_locators_come_after_registrations() {
        let root = Scope::root();
        root.add_secondary_locator(Fallback);
        let child = root.child().unwrap();

        assert_eq!(child.locate::<String>().unwrap().unwrap().as_str(), "fallback");

        child
            .add_strategy(StrategyBuilder::instance("registered".to_string()).build().unwrap())
            .unwrap();
        assert_eq!(child.locate::<String>().unwrap().unwrap().as_str(), "registered");
    }

    struct ProvideU16(Arc<AtomicUsize>);
    impl MissingExportStrategyProvider for ProvideU16 {
        fn provide(&self, _: &Scope, _: &InjectionContext, request: &LocateRequest) -> Vec<crate::strategy::ExportStrategy> {
            if request.export_type() != Some(&ExportType::of::<u16>()) {
                return Vec::new();
            }
            self.0.fetch_add(1, Ordering::SeqCst);
            vec![StrategyBuilder::instance(16_u16).build().unwrap()]
        }
    }

    #[test]
    fn missing_providers_register_in_their_scope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let root = Scope::root();
        root.add_missing_export_provider(ProvideU16(calls.clone()));
        let child = root
            .create_child_scope(ChildScopeOptions::new().name("worker"))
            .unwrap();

        assert_eq!(child.locate::<u16>().unwrap().map(|v| *v), Some(16));
        assert_eq!(child.locate::<u16>().unwrap().map(|v| *v), Some(16));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(root.strategy(&ExportType::of::<u16>(), None).is_some());
    }

    #[test]
    fn disposed_scopes_refuse_to_locate() {
        let root = Scope::root();
        root.add_strategy(StrategyBuilder::instance(1_u32).build().unwrap()).unwrap();
        let child = root.child().unwrap();
        child.dispose();

        let error = child.locate::<u32>().unwrap_err();
        assert!(matches!(error.kind, LocateErrorKind::ScopeDisposed(_)));
        assert_eq!(root.locate::<u32>().unwrap().map(|v| *v), Some(1));
    }
}
