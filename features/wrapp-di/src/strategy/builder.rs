use std::sync::Arc;

use crate::{
    condition::{Condition, ExportCondition, WhenInjectedInto},
    dependency::DependencyInfo,
    disposal::Disposable,
    errors::ConfigureError,
    export_type::{Constructible, ExportType, Generic, GenericDef, TypeConstraint},
    factories::InstanceFactory,
    handle::DiHandle,
    lifestyle::{
        Lifestyle, SingletonLifestyle, SingletonPerAncestorLifestyle,
        SingletonPerNamedScopeLifestyle, SingletonPerScopeLifestyle, WeakSingletonLifestyle,
    },
    metadata::{MetaValue, Metadata},
    scope::Scope,
    strategy::{Activator, DelegateFn, EnrichFn, ExportAs, ExportStrategy},
    types::{DynError, ExportKey, Injectable, Instance},
};

/// Describes a producer before it is registered
///
/// ```ignore
/// let strategy = StrategyBuilder::factory(ServiceFactory)
///     .export_as(|service: Arc<Service>| service as Arc<dyn Api>)
///     .singleton()
///     .build()?;
/// ```
pub struct StrategyBuilder {
    activation_type: ExportType,
    activator: Activator,
    exports: Vec<ExportAs>,
    names: Vec<String>,
    generic_exports: Vec<GenericDef>,
    key: Option<ExportKey>,
    priority: i32,
    lifestyle: Option<Box<dyn Lifestyle>>,
    conditions: Vec<Condition>,
    enrichers: Vec<EnrichFn>,
    dependencies: Vec<DependencyInfo>,
    constraints: Vec<(usize, TypeConstraint)>,
    externally_owned: bool,
    allows_filtering: bool,
    disposable_hint: bool,
    metadata: Metadata,
    errors: Vec<ConfigureError>,
}

impl StrategyBuilder {
    fn new(activation_type: ExportType, activator: Activator) -> Self {
        StrategyBuilder {
            activation_type,
            activator,
            exports: Vec::new(),
            names: Vec::new(),
            generic_exports: Vec::new(),
            key: None,
            priority: 0,
            lifestyle: None,
            conditions: Vec::new(),
            enrichers: Vec::new(),
            dependencies: Vec::new(),
            constraints: Vec::new(),
            externally_owned: false,
            allows_filtering: true,
            disposable_hint: false,
            metadata: Metadata::new(),
            errors: Vec::new(),
        }
    }

    /// An existing value - the kernel never disposes it
    pub fn instance<T: Injectable>(value: T) -> Self {
        Self::instance_arc(Arc::new(value))
    }

    pub fn instance_arc<T: ?Sized + Injectable>(value: Arc<T>) -> Self {
        let mut builder = Self::new(ExportType::of::<T>(), Activator::Instance(Instance::from_arc(value)));
        builder.externally_owned = true;
        builder
    }

    /// An existing value handed over to the kernel, disposed with the registering scope
    pub fn disposable_instance<T: Injectable + Disposable>(value: T) -> Self {
        let mut builder = Self::new(ExportType::of::<T>(), Activator::Instance(Instance::disposable(value)));
        builder.disposable_hint = true;
        builder
    }

    pub fn delegate<T, F>(delegate: F) -> Self
    where
        T: Injectable,
        F: Fn(&mut DiHandle<'_>) -> Result<T, DynError> + Send + Sync + 'static,
    {
        let delegate: DelegateFn =
            Arc::new(move |di: &mut DiHandle<'_>| delegate(di).map(Instance::new));
        Self::new(ExportType::of::<T>(), Activator::Delegate(delegate))
    }

    /// A delegate producing untyped instances, e.g. disposables
    pub fn delegate_instance<F>(activation_type: ExportType, delegate: F) -> Self
    where
        F: Fn(&mut DiHandle<'_>) -> Result<Instance, DynError> + Send + Sync + 'static,
    {
        Self::new(activation_type, Activator::Delegate(Arc::new(delegate)))
    }

    pub fn factory<F: InstanceFactory + 'static>(factory: F) -> Self {
        let mut builder = Self::new(
            ExportType::of::<F::Provides>(),
            Activator::Factory(Arc::new(factory)),
        );
        builder.dependencies = F::get_dependencies();
        builder
    }

    pub fn constructible<T: Constructible>() -> Self {
        let activation_type = ExportType::constructible::<T>();
        Self::from_constructor(activation_type.clone(), activation_type)
    }

    /// A closed generic type, built with its own `Generic::construct`
    pub fn generic<T: Generic>() -> Self {
        let activation_type = ExportType::generic::<T>();
        Self::from_constructor(activation_type.clone(), activation_type)
    }

    fn from_constructor(activation_type: ExportType, carrier: ExportType) -> Self {
        match carrier.constructor() {
            Some(constructor) => Self::new(activation_type, Activator::Delegate(Arc::new(constructor))),
            None => {
                let mut builder = Self::new(
                    activation_type,
                    Activator::Delegate(Arc::new(|_: &mut DiHandle<'_>| Err("no constructor".into()))),
                );
                builder.errors.push(ConfigureError::UnsatisfiableExport {
                    activation: carrier.to_string(),
                    export: carrier.to_string(),
                });
                builder
            }
        }
    }

    /// An open generic export, closed on demand for every requested argument list
    ///
    /// Without a delegate the closed types are built with the construction
    /// code the request carries, see [`ExportType::generic`].
    pub fn open_generic(definition: GenericDef) -> Self {
        let mut builder = Self::new(
            ExportType::constructed(definition, Vec::new()),
            Activator::OpenGeneric {
                definition,
                delegate: None,
            },
        );
        builder.generic_exports.push(definition);
        builder
    }

    /// Builds closed values of an open generic export, the type arguments are
    /// available through [`DiHandle::type_arguments`]
    pub fn generic_delegate<F>(mut self, delegate: F) -> Self
    where
        F: Fn(&mut DiHandle<'_>) -> Result<Instance, DynError> + Send + Sync + 'static,
    {
        match &mut self.activator {
            Activator::OpenGeneric { delegate: slot, .. } => *slot = Some(Arc::new(delegate)),
            _ => self.errors.push(ConfigureError::UnsatisfiableExport {
                activation: self.activation_type.to_string(),
                export: "generic delegate".into(),
            }),
        }
        self
    }

    /// Also export the open generic under another definition of the same arity
    pub fn export_generic(mut self, definition: GenericDef) -> Self {
        match &self.activator {
            Activator::OpenGeneric { definition: own, .. } if own.arity == definition.arity => {
                if !self.generic_exports.contains(&definition) {
                    self.generic_exports.push(definition);
                }
            }
            Activator::OpenGeneric { definition: own, .. } => {
                self.errors.push(ConfigureError::OpenGeneric {
                    definition,
                    reason: format!("arity differs from '{own}'"),
                })
            }
            _ => self.errors.push(ConfigureError::UnsatisfiableExport {
                activation: self.activation_type.to_string(),
                export: definition.to_string(),
            }),
        }
        self
    }

    /// Constrains a type parameter of an open generic export
    pub fn constraint(mut self, parameter: usize, constraint: TypeConstraint) -> Self {
        self.constraints.push((parameter, constraint));
        self
    }

    /// Export under a type the activation type already is
    pub fn export_type(mut self, export_type: ExportType) -> Self {
        if export_type != self.activation_type {
            self.errors.push(ConfigureError::UnsatisfiableExport {
                activation: self.activation_type.to_string(),
                export: export_type.to_string(),
            });
            return self;
        }
        self.push_export(ExportAs {
            export_type,
            cast: None,
        });
        self
    }

    /// Export under another contract - usually a trait object
    pub fn export_as<T, I, F>(mut self, cast: F) -> Self
    where
        T: Injectable,
        I: ?Sized + Injectable,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        if ExportType::of::<T>() != self.activation_type {
            self.errors.push(ConfigureError::UnsatisfiableExport {
                activation: self.activation_type.to_string(),
                export: ExportType::of::<I>().to_string(),
            });
            return self;
        }

        self.push_export(ExportAs {
            export_type: ExportType::of::<I>(),
            cast: Some(Arc::new(move |instance: &Instance| {
                instance
                    .downcast::<T>()
                    .ok()
                    .map(|value| Instance::from_arc(cast(value)))
            })),
        });
        self
    }

    fn push_export(&mut self, export: ExportAs) {
        self.exports
            .retain(|existing| existing.export_type != export.export_type);
        self.exports.push(export);
    }

    /// Export under a case-insensitive name
    pub fn export_name(mut self, name: &str) -> Self {
        match normalize_name(name) {
            Ok(name) if !self.names.contains(&name) => self.names.push(name),
            Ok(_) => {}
            Err(error) => self.errors.push(error),
        }
        self
    }

    /// Only reachable through requests carrying this key
    pub fn keyed(mut self, key: impl Into<ExportKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Higher priorities win, later registrations win ties
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn lifestyle(mut self, lifestyle: impl Lifestyle + 'static) -> Self {
        self.lifestyle = Some(Box::new(lifestyle));
        self
    }

    pub fn singleton(self) -> Self {
        self.lifestyle(SingletonLifestyle::new())
    }

    pub fn singleton_per_scope(self) -> Self {
        self.lifestyle(SingletonPerScopeLifestyle::new())
    }

    pub fn weak_singleton(self) -> Self {
        self.lifestyle(WeakSingletonLifestyle::new())
    }

    pub fn singleton_per_named_scope(self, name: &str) -> Self {
        self.lifestyle(SingletonPerNamedScopeLifestyle::new(name))
    }

    pub fn singleton_per_ancestor(self, ancestor: ExportType) -> Self {
        self.lifestyle(SingletonPerAncestorLifestyle::new(ancestor))
    }

    pub fn when(mut self, condition: impl ExportCondition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn when_injected_into(self, targets: Vec<ExportType>) -> Self {
        self.when(WhenInjectedInto(targets))
    }

    pub fn enrich<F>(mut self, enricher: F) -> Self
    where
        F: Fn(&Scope, &crate::context::InjectionContext, Instance) -> Result<Instance, DynError>
            + Send
            + Sync
            + 'static,
    {
        self.enrichers.push(Arc::new(enricher));
        self
    }

    pub fn depends_on(mut self, dependency: DependencyInfo) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// The kernel never disposes values of this producer
    pub fn externally_owned(mut self, externally_owned: bool) -> Self {
        self.externally_owned = externally_owned;
        self
    }

    /// Whether request filters are applied to this producer
    pub fn allows_filtering(mut self, allows_filtering: bool) -> Self {
        self.allows_filtering = allows_filtering;
        self
    }

    /// Declares that the values will be disposable
    pub fn produces_disposable(mut self) -> Self {
        self.disposable_hint = true;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata = self.metadata.with(key, value);
        self
    }

    pub fn build(self) -> Result<ExportStrategy, ConfigureError> {
        let StrategyBuilder {
            activation_type,
            activator,
            mut exports,
            names,
            generic_exports,
            key,
            priority,
            lifestyle,
            conditions,
            enrichers,
            dependencies,
            constraints,
            externally_owned,
            allows_filtering,
            disposable_hint,
            metadata,
            mut errors,
        } = self;

        if let Activator::OpenGeneric { definition, .. } = &activator {
            for (parameter, _) in &constraints {
                if *parameter >= definition.arity {
                    errors.push(ConfigureError::OpenGeneric {
                        definition: *definition,
                        reason: format!("constraint on unknown parameter {parameter}"),
                    });
                }
            }
        } else if exports.is_empty() && names.is_empty() {
            exports.push(ExportAs {
                export_type: activation_type.clone(),
                cast: None,
            });
        }

        if disposable_hint
            && lifestyle
                .as_ref()
                .is_some_and(|lifestyle| lifestyle.rejects_disposable())
        {
            errors.push(ConfigureError::WeakDisposable(activation_type.to_string()));
        }

        match errors.len() {
            0 => {}
            1 => return Err(errors.remove(0)),
            _ => return Err(ConfigureError::Aggregate(errors)),
        }

        Ok(ExportStrategy::from_parts(
            activation_type,
            activator,
            exports,
            names,
            generic_exports,
            key,
            priority,
            lifestyle,
            conditions,
            enrichers,
            dependencies,
            constraints,
            externally_owned,
            allows_filtering,
            disposable_hint,
            metadata,
            None,
        ))
    }
}

/// Names are matched case-insensitively
pub(crate) fn normalize_name(name: &str) -> Result<String, ConfigureError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigureError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Api: Send + Sync {
        fn value(&self) -> u32;
    }
    struct Service;
    impl Api for Service {
        fn value(&self) -> u32 {
            7
        }
    }

    #[test]
    fn exports_activation_type_by_default() {
        let strategy = StrategyBuilder::instance(5_u32).build().unwrap();
        let exports: Vec<_> = strategy.export_types().cloned().collect();
        assert_eq!(exports, vec![ExportType::of::<u32>()]);
        assert!(strategy.is_externally_owned());
    }

    #[test]
    fn named_only_exports_have_no_type_export() {
        let strategy = StrategyBuilder::instance(5_u32)
            .export_name("  Answer ")
            .build()
            .unwrap();
        assert_eq!(strategy.export_types().count(), 0);
        assert_eq!(strategy.export_names(), &["answer".to_string()]);
    }

    #[test]
    fn export_as_casts_to_contract() {
        let strategy = StrategyBuilder::delegate(|_| Ok(Service))
            .export_as(|service: Arc<Service>| service as Arc<dyn Api>)
            .build()
            .unwrap();

        let export = strategy.cast_for(&ExportType::of::<dyn Api>()).unwrap();
        let instance = Instance::new(Service);
        let casted = instance.cast_with(export.cast.as_ref().unwrap()).unwrap();
        assert_eq!(casted.downcast::<dyn Api>().unwrap().value(), 7);
    }

    #[test]
    fn rejects_unrelated_exports() {
        let error = StrategyBuilder::instance(5_u32)
            .export_type(ExportType::of::<u64>())
            .build()
            .unwrap_err();
        assert!(matches!(error, ConfigureError::UnsatisfiableExport { .. }));

        let error = StrategyBuilder::instance(5_u32)
            .export_as(|service: Arc<Service>| service as Arc<dyn Api>)
            .export_name("")
            .build()
            .unwrap_err();
        assert!(matches!(error, ConfigureError::Aggregate(errors) if errors.len() == 2));
    }

    #[test]
    fn weak_singletons_cannot_be_disposable() {
        let error = StrategyBuilder::delegate(|_| Ok(Service))
            .weak_singleton()
            .produces_disposable()
            .build()
            .unwrap_err();
        assert!(matches!(error, ConfigureError::WeakDisposable(_)));
    }

    #[test]
    fn open_generic_constraints_must_reference_parameters() {
        const PAIR: GenericDef = GenericDef::new("Pair", 2);
        assert!(StrategyBuilder::open_generic(PAIR)
            .constraint(1, TypeConstraint::Native)
            .build()
            .is_ok());

        let error = StrategyBuilder::open_generic(PAIR)
            .constraint(2, TypeConstraint::Native)
            .build()
            .unwrap_err();
        assert!(matches!(error, ConfigureError::OpenGeneric { .. }));
    }
}
