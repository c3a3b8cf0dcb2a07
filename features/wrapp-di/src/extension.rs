use std::sync::Arc;

use crate::{
    context::InjectionContext,
    errors::LocateError,
    export_type::ExportType,
    request::LocateRequest,
    resolver::{
        lazy::LAZY,
        wrappers::{ALL, META, OWNED},
    },
    scope::Scope,
    strategy::{ExportStrategy, StrategyBuilder},
    types::{DynError, Instance},
};

/// Fallback source of values, consulted after a scope's own producers
pub trait SecondaryExportLocator: Send + Sync {
    fn locate(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Instance>, LocateError>;

    fn locate_all(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<Instance>, LocateError> {
        Ok(self.locate(scope, context, request)?.into_iter().collect())
    }
}

/// Registers producers for requests nothing in the scope chain satisfies
pub trait MissingExportStrategyProvider: Send + Sync {
    fn provide(
        &self,
        scope: &Scope,
        context: &InjectionContext,
        request: &LocateRequest,
    ) -> Vec<ExportStrategy>;
}

/// Sees, and may change, every producer before it is registered
pub trait ExportStrategyInspector: Send + Sync {
    fn inspect(&self, strategy: &mut ExportStrategy) -> Result<(), DynError>;
}

impl<F> ExportStrategyInspector for F
where
    F: Fn(&mut ExportStrategy) -> Result<(), DynError> + Send + Sync,
{
    fn inspect(&self, strategy: &mut ExportStrategy) -> Result<(), DynError> {
        self(strategy)
    }
}

/// Recognizes wrapper shapes of other contracts and builds producers for them
///
/// Produced strategies are registered in the root scope.
pub trait ShapeStrategyProvider: Send + Sync {
    fn provide(&self, root: &Scope, requested: &ExportType) -> Option<ExportStrategy>;
}

/// Produces `Lazy<T>`, `Owned<T>`, `Meta<T>` and `All<T>` for any `T`
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperShapes;

impl ShapeStrategyProvider for WrapperShapes {
    fn provide(&self, _: &Scope, requested: &ExportType) -> Option<ExportStrategy> {
        let definition = requested.generic_definition()?;
        if ![LAZY, OWNED, META, ALL].contains(&definition) {
            return None;
        }

        let constructor = requested.constructor()?;
        let strategy = StrategyBuilder::delegate_instance(requested.clone(), constructor)
            .externally_owned(true)
            .build();

        match strategy {
            Ok(strategy) => Some(strategy),
            Err(error) => {
                tracing::warn!("Could not build wrapper for {requested}: {error}");
                None
            }
        }
    }
}

pub type SharedLocator = Arc<dyn SecondaryExportLocator>;
pub type SharedProvider = Arc<dyn MissingExportStrategyProvider>;
pub type SharedInspector = Arc<dyn ExportStrategyInspector>;
pub type SharedShapeProvider = Arc<dyn ShapeStrategyProvider>;
