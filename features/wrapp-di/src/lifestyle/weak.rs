use parking_lot::Mutex;

use crate::{
    context::InjectionContext,
    errors::{LocateError, LocateErrorKind},
    lifestyle::{activate_owned, CreatingThread, Lifestyle},
    scope::Scope,
    strategy::{ActivationFn, ExportStrategy},
    types::{Instance, WeakInstance},
};

/// Shares a value while someone still holds it, recreates it afterwards
///
/// Disposable values are refused, nobody would know when to dispose them.
pub struct WeakSingletonLifestyle {
    current: Mutex<Option<WeakInstance>>,
    creating: CreatingThread,
}

impl WeakSingletonLifestyle {
    pub fn new() -> Self {
        WeakSingletonLifestyle {
            current: Mutex::new(None),
            creating: CreatingThread::default(),
        }
    }
}

impl Default for WeakSingletonLifestyle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifestyle for WeakSingletonLifestyle {
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError> {
        if self.creating.is_current() {
            return Err(strategy.circular_dependency(context));
        }

        let mut current = self.current.lock();
        if let Some(alive) = current.as_ref().and_then(WeakInstance::upgrade) {
            return Ok(alive);
        }

        let owner = strategy.owner_scope().unwrap_or_else(|| scope.clone());
        let created = {
            let _creating = self.creating.enter();
            activate_owned(activation, scope, &owner, context)?
        };
        if created.is_disposable() {
            return Err(LocateErrorKind::ActivationFailed {
                activation: strategy.activation_type().to_string(),
                scope: context.requesting_scope().display_name(),
                error: std::sync::Arc::new(
                    "disposable values cannot use a weak singleton lifestyle".into(),
                ),
            }
            .into());
        }

        *current = created.downgrade();
        Ok(created)
    }

    fn clone_lifestyle(&self) -> Box<dyn Lifestyle> {
        Box::new(WeakSingletonLifestyle::new())
    }

    fn name(&self) -> &'static str {
        "WeakSingleton"
    }

    fn rejects_disposable(&self) -> bool {
        true
    }

    fn dispose(&self) {
        self.current.lock().take();
    }
}
