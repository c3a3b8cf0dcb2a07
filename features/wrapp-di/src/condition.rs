use std::sync::Arc;

use crate::{
    context::InjectionContext,
    export_type::ExportType,
    metadata::MetaValue,
    scope::Scope,
    strategy::ExportStrategy,
};

/// Decides whether a producer is eligible for a particular request
pub trait ExportCondition: Send + Sync {
    fn meets(&self, scope: &Scope, context: &InjectionContext, strategy: &ExportStrategy) -> bool;
}

impl<F> ExportCondition for F
where
    F: Fn(&Scope, &InjectionContext, &ExportStrategy) -> bool + Send + Sync,
{
    fn meets(&self, scope: &Scope, context: &InjectionContext, strategy: &ExportStrategy) -> bool {
        self(scope, context, strategy)
    }
}

/// Shared condition handle, as stored on producers
pub type Condition = Arc<dyn ExportCondition>;

/// Only when the value is injected into one of the given types
#[derive(Debug, Clone)]
pub struct WhenInjectedInto(pub Vec<ExportType>);
impl ExportCondition for WhenInjectedInto {
    fn meets(&self, _: &Scope, context: &InjectionContext, _: &ExportStrategy) -> bool {
        match context.current_frame() {
            Some(frame) => self.0.contains(&frame.activation_type),
            None => false,
        }
    }
}

/// Only when the request originates from a scope with this name, or below it
#[derive(Debug, Clone)]
pub struct WhenInScopeNamed(pub String);
impl ExportCondition for WhenInScopeNamed {
    fn meets(&self, _: &Scope, context: &InjectionContext, _: &ExportStrategy) -> bool {
        context
            .requesting_scope()
            .ancestors()
            .any(|scope| scope.name() == Some(self.0.as_str()))
    }
}

/// Only when the producer's own metadata carries the given key (and value)
#[derive(Debug, Clone)]
pub struct WhenMetadata {
    pub key: String,
    pub value: Option<MetaValue>,
}
impl ExportCondition for WhenMetadata {
    fn meets(&self, _: &Scope, _: &InjectionContext, strategy: &ExportStrategy) -> bool {
        strategy.metadata().matches(&self.key, self.value.as_ref())
    }
}
