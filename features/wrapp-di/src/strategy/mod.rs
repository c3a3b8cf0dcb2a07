use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::Mutex;

use crate::{
    condition::Condition,
    context::InjectionContext,
    dependency::DependencyInfo,
    disposal::DisposalScope,
    errors::{CompileError, ConfigureError, LocateError, LocateErrorKind},
    export_type::{ExportType, GenericDef, TypeConstraint},
    factories::DynFactory,
    handle::DiHandle,
    lifestyle::Lifestyle,
    metadata::{MetaValue, Metadata},
    scope::{Scope, ScopeId, WeakScope},
    types::{CastFn, DynError, ExportKey, Instance},
};

mod builder;

pub use builder::StrategyBuilder;

static NEXT_STRATEGY: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing producer id
///
/// Later registrations get higher ids, which is what breaks priority ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(pub u64);
impl StrategyId {
    pub(crate) fn next() -> Self {
        StrategyId(NEXT_STRATEGY.fetch_add(1, Ordering::Relaxed))
    }
}
impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "export-{}", self.0)
    }
}

/// Builds a value, with everything it needs resolved on the handle
pub type DelegateFn = Arc<dyn Fn(&mut DiHandle<'_>) -> Result<Instance, DynError> + Send + Sync>;
/// Post-processes a freshly activated value
pub type EnrichFn =
    Arc<dyn Fn(&Scope, &InjectionContext, Instance) -> Result<Instance, DynError> + Send + Sync>;
/// Compiled activation of a producer
pub type ActivationFn =
    Arc<dyn Fn(&Scope, &mut InjectionContext) -> Result<Instance, LocateError> + Send + Sync>;

/// How a producer makes its value
#[derive(Clone)]
pub enum Activator {
    /// A value supplied up front
    Instance(Instance),
    Delegate(DelegateFn),
    Factory(Arc<dyn DynFactory>),
    /// Never activated directly, only closed into new producers
    OpenGeneric {
        definition: GenericDef,
        delegate: Option<DelegateFn>,
    },
}
impl Debug for Activator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activator::Instance(instance) => f.debug_tuple("Instance").field(instance).finish(),
            Activator::Delegate(_) => f.write_str("Delegate"),
            Activator::Factory(factory) => f
                .debug_tuple("Factory")
                .field(&factory.supplies().type_name)
                .finish(),
            Activator::OpenGeneric { definition, .. } => {
                f.debug_tuple("OpenGeneric").field(definition).finish()
            }
        }
    }
}

/// An export type and how to get there from the activation type
#[derive(Clone)]
pub struct ExportAs {
    pub export_type: ExportType,
    pub(crate) cast: Option<CastFn>,
}

#[derive(Clone)]
pub(crate) struct Owner {
    pub id: ScopeId,
    pub name: Option<Arc<str>>,
    pub scope: WeakScope,
}

/// A registered way to produce a value for one or more contracts
pub struct ExportStrategy {
    id: StrategyId,
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
    owner: Option<Owner>,
    creating_strategy: Option<StrategyId>,
    sealed: bool,
    compiled: OnceLock<Result<ActivationFn, CompileError>>,
    compile_lock: Mutex<()>,
}

impl Debug for ExportStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStrategy")
            .field("id", &self.id)
            .field("activation_type", &self.activation_type)
            .field("activator", &self.activator)
            .field("exports", &self.export_types().collect::<Vec<_>>())
            .field("names", &self.names)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("lifestyle", &self.lifestyle_name())
            .field("conditions", &self.conditions.len())
            .finish_non_exhaustive()
    }
}

/// Producers are equal when they build the same type for the same scope
impl PartialEq for ExportStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.activation_type == other.activation_type && self.owner_id() == other.owner_id()
    }
}

impl ExportStrategy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
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
        creating_strategy: Option<StrategyId>,
    ) -> Self {
        ExportStrategy {
            id: StrategyId::next(),
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
            owner: None,
            creating_strategy,
            sealed: false,
            compiled: OnceLock::new(),
            compile_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> StrategyId {
        self.id
    }

    pub fn activation_type(&self) -> &ExportType {
        &self.activation_type
    }

    pub fn activator(&self) -> &Activator {
        &self.activator
    }

    pub fn export_types(&self) -> impl Iterator<Item = &ExportType> {
        self.exports.iter().map(|export| &export.export_type)
    }

    pub fn export_names(&self) -> &[String] {
        &self.names
    }

    /// Definitions an open generic export can be closed for
    pub fn generic_exports(&self) -> &[GenericDef] {
        &self.generic_exports
    }

    pub fn key(&self) -> Option<&ExportKey> {
        self.key.as_ref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn lifestyle_name(&self) -> &'static str {
        match &self.lifestyle {
            Some(lifestyle) => lifestyle.name(),
            None => "Transient",
        }
    }

    pub(crate) fn lifestyle(&self) -> Option<&dyn Lifestyle> {
        self.lifestyle.as_deref()
    }

    pub fn is_externally_owned(&self) -> bool {
        self.externally_owned
    }

    pub fn allows_filtering(&self) -> bool {
        self.allows_filtering
    }

    pub fn produces_disposable(&self) -> bool {
        self.disposable_hint
    }

    pub fn dependencies(&self) -> &[DependencyInfo] {
        &self.dependencies
    }

    pub fn constraints(&self) -> &[(usize, TypeConstraint)] {
        &self.constraints
    }

    pub(crate) fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub(crate) fn enrichers(&self) -> &[EnrichFn] {
        &self.enrichers
    }

    pub(crate) fn cast_for(&self, export_type: &ExportType) -> Option<&ExportAs> {
        self.exports
            .iter()
            .find(|export| &export.export_type == export_type)
    }

    /// The open generic export this one was closed from
    pub fn creating_strategy(&self) -> Option<StrategyId> {
        self.creating_strategy
    }

    pub fn is_open_generic(&self) -> bool {
        matches!(self.activator, Activator::OpenGeneric { .. })
    }

    pub fn owner_id(&self) -> Option<ScopeId> {
        self.owner.as_ref().map(|owner| owner.id)
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner.as_ref().and_then(|owner| owner.name.as_deref())
    }

    /// The scope this producer was registered in, if it is still alive
    pub fn owner_scope(&self) -> Option<Scope> {
        self.owner.as_ref().and_then(|owner| owner.scope.upgrade())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_initialized(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// AND of all attached conditions
    pub fn meets_condition(&self, scope: &Scope, context: &InjectionContext) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.meets(scope, context, self))
    }

    // ###############################################
    // Mutation - only before the producer is registered

    fn ensure_unsealed(&self) -> Result<(), ConfigureError> {
        if self.sealed || self.is_initialized() {
            return Err(ConfigureError::StrategyLocked(
                self.activation_type.to_string(),
            ));
        }
        Ok(())
    }

    pub fn add_condition(&mut self, condition: Condition) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.conditions.push(condition);
        Ok(())
    }

    pub fn add_enricher(&mut self, enricher: EnrichFn) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.enrichers.push(enricher);
        Ok(())
    }

    pub fn set_lifestyle(&mut self, lifestyle: Box<dyn Lifestyle>) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.lifestyle = Some(lifestyle);
        Ok(())
    }

    pub fn set_priority(&mut self, priority: i32) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.priority = priority;
        Ok(())
    }

    pub fn set_externally_owned(&mut self, externally_owned: bool) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.externally_owned = externally_owned;
        Ok(())
    }

    pub fn add_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetaValue>,
    ) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        self.metadata = self.metadata.with(key, value);
        Ok(())
    }

    pub fn add_export_name(&mut self, name: &str) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        let name = builder::normalize_name(name)?;
        if !self.names.contains(&name) {
            self.names.push(name);
        }
        Ok(())
    }

    /// Binds the producer to its scope and locks further mutation
    pub(crate) fn seal(&mut self, owner: &Scope) -> Result<(), ConfigureError> {
        self.ensure_unsealed()?;
        if self.disposable_hint
            && self
                .lifestyle
                .as_ref()
                .is_some_and(|lifestyle| lifestyle.rejects_disposable())
        {
            return Err(ConfigureError::WeakDisposable(
                self.activation_type.to_string(),
            ));
        }

        self.owner = Some(Owner {
            id: owner.id(),
            name: owner.name_arc(),
            scope: owner.downgrade(),
        });
        self.sealed = true;
        Ok(())
    }

    // ###############################################
    // Activation

    /// Compiles the activation function - once, on first use
    ///
    /// A failed compilation is cached and returned on every later call.
    pub fn initialize(&self) -> Result<ActivationFn, CompileError> {
        if let Some(compiled) = self.compiled.get() {
            return compiled.clone();
        }

        let _guard = self.compile_lock.lock();

        // Double check - another thread might have compiled while we waited for the lock
        if let Some(compiled) = self.compiled.get() {
            return compiled.clone();
        }

        let compiler = match self.owner_scope() {
            Some(scope) => scope.config().compiler.clone(),
            None => crate::config::KernelConfig::default().compiler,
        };

        let compiled = compiler.compile(self).map(|activation| self.with_enrichment(activation));
        if let Err(error) = &compiled {
            tracing::debug!("Compiling {} failed: {error}", self.activation_type);
        }

        let _ = self.compiled.set(compiled.clone());
        compiled
    }

    fn with_enrichment(&self, activation: ActivationFn) -> ActivationFn {
        if self.enrichers.is_empty() {
            return activation;
        }

        let enrichers = self.enrichers.clone();
        let activation_name = self.activation_type.to_string();
        Arc::new(move |scope: &Scope, context: &mut InjectionContext| {
            let mut value = activation(scope, context)?;
            for enricher in &enrichers {
                value = enricher(scope, context, value).map_err(|error| {
                    LocateError::new(LocateErrorKind::ActivationFailed {
                        activation: activation_name.clone(),
                        scope: context.requesting_scope().display_name(),
                        error: Arc::new(error),
                    })
                })?;
            }
            Ok(value)
        })
    }

    /// Produces a value, applying the lifestyle and casting to `requested`
    pub fn activate(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        requested: Option<&ExportType>,
    ) -> Result<Instance, LocateError> {
        if context
            .frames()
            .iter()
            .any(|frame| frame.strategy_id == self.id)
        {
            return Err(self.circular_dependency(context));
        }

        let max_depth = scope.config().max_resolution_depth;
        if context.depth() >= max_depth {
            return Err(LocateErrorKind::DepthExceeded(max_depth).into());
        }

        let activation = self.initialize()?;

        context.push_frame(self.id, self.activation_type.clone());
        let result = match &self.lifestyle {
            Some(lifestyle) => lifestyle.locate(&activation, scope, context, self),
            None => activation(scope, context).inspect(|instance| {
                self.track_disposable(instance, context.disposal());
            }),
        };
        context.pop_frame();

        self.cast(result?, requested)
    }

    /// This producer was requested again while it is being activated
    pub(crate) fn circular_dependency(&self, context: &InjectionContext) -> LocateError {
        let chain = context
            .frames()
            .iter()
            .map(|frame| frame.activation_type.to_string())
            .collect();
        LocateErrorKind::CircularDependency {
            activation: self.activation_type.to_string(),
            chain,
        }
        .into()
    }

    /// Hands a disposable value to `disposal`, unless someone else owns it
    pub(crate) fn track_disposable(&self, instance: &Instance, disposal: &DisposalScope) {
        if self.externally_owned {
            return;
        }
        if let Some(disposer) = instance.disposer() {
            disposal.track(disposer.clone());
        }
    }

    fn cast(&self, instance: Instance, requested: Option<&ExportType>) -> Result<Instance, LocateError> {
        let Some(requested) = requested else {
            return Ok(instance);
        };
        if requested == &self.activation_type {
            return Ok(instance);
        }

        match self.cast_for(requested).and_then(|export| export.cast.as_ref()) {
            Some(cast) => instance.cast_with(cast).ok_or_else(|| {
                LocateErrorKind::DowncastFailed {
                    required_type: "export cast target",
                    actual_type: instance.info.type_name,
                }
                .into()
            }),
            None => Ok(instance),
        }
    }

    /// Releases cached values
    pub(crate) fn dispose(&self) {
        if let Some(lifestyle) = &self.lifestyle {
            lifestyle.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[test]
    fn equality_uses_activation_type_and_owner() {
        let scope = Scope::root();
        let mut a = StrategyBuilder::instance(1_u8).build().unwrap();
        let mut b = StrategyBuilder::instance(2_u8).priority(4).build().unwrap();
        let c = StrategyBuilder::instance(3_u16).build().unwrap();

        a.seal(&scope).unwrap();
        assert_ne!(a, b);
        b.seal(&scope).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sealed_strategies_reject_mutation() {
        let scope = Scope::root();
        let mut strategy = StrategyBuilder::instance(1_u8).build().unwrap();
        strategy.set_priority(3).unwrap();
        strategy.seal(&scope).unwrap();

        assert!(matches!(
            strategy.set_priority(5),
            Err(ConfigureError::StrategyLocked(_))
        ));
        assert!(matches!(
            strategy.seal(&scope),
            Err(ConfigureError::StrategyLocked(_))
        ));
        assert_eq!(strategy.priority(), 3);
    }

    #[test]
    fn initialize_caches_compile_errors() {
        let scope = Scope::root();
        let mut strategy = StrategyBuilder::delegate(|_| Ok(1_u8))
            .depends_on(crate::dependency::DependencyInfo::parameter("value", 0))
            .build()
            .unwrap();
        strategy.seal(&scope).unwrap();

        let first = strategy.initialize().err().unwrap();
        let second = strategy.initialize().err().unwrap();
        assert!(matches!(first, CompileError::UnboundParameter { .. }));
        assert_eq!(first.to_string(), second.to_string());
        assert!(strategy.is_initialized());
    }
}
