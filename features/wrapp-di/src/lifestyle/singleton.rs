use parking_lot::RwLock;
use std::sync::Arc;

use crate::{
    context::InjectionContext,
    errors::LocateError,
    lifestyle::{activate_owned, InstanceSlot, Lifestyle},
    scope::Scope,
    strategy::{ActivationFn, ExportStrategy},
    types::Instance,
};

/// One value for the whole lifetime of the owning scope
pub struct SingletonLifestyle {
    slot: RwLock<Arc<InstanceSlot>>,
}

impl SingletonLifestyle {
    pub fn new() -> Self {
        SingletonLifestyle {
            slot: RwLock::new(Arc::new(InstanceSlot::new())),
        }
    }
}

impl Default for SingletonLifestyle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifestyle for SingletonLifestyle {
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError> {
        let slot = self.slot.read().clone();
        let owner = strategy.owner_scope().unwrap_or_else(|| scope.clone());
        let (instance, created) = slot.get_or_create(
            || activate_owned(activation, scope, &owner, context),
            || strategy.circular_dependency(context),
        )?;

        if created {
            tracing::debug!("Created singleton {}", strategy.activation_type());
            strategy.track_disposable(&instance, owner.disposal());
        }

        Ok(instance)
    }

    fn clone_lifestyle(&self) -> Box<dyn Lifestyle> {
        Box::new(SingletonLifestyle::new())
    }

    fn name(&self) -> &'static str {
        "Singleton"
    }

    fn dispose(&self) {
        *self.slot.write() = Arc::new(InstanceSlot::new());
    }
}
