use crate::{
    context::InjectionContext,
    errors::LocateError,
    export_type::ExportType,
    lifestyle::{activate_owned, next_lifestyle_id, InstanceSlot, Lifestyle},
    scope::Scope,
    strategy::{ActivationFn, ExportStrategy},
    types::Instance,
};

/// One value per requesting scope
pub struct SingletonPerScopeLifestyle {
    id: u64,
}

impl SingletonPerScopeLifestyle {
    pub fn new() -> Self {
        SingletonPerScopeLifestyle {
            id: next_lifestyle_id(),
        }
    }
}

impl Default for SingletonPerScopeLifestyle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifestyle for SingletonPerScopeLifestyle {
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError> {
        let requesting = context.requesting_scope().clone();
        locate_in_slot(&requesting.scoped_slot(self.id), &requesting, activation, scope, context, strategy)
    }

    fn clone_lifestyle(&self) -> Box<dyn Lifestyle> {
        Box::new(SingletonPerScopeLifestyle::new())
    }

    fn name(&self) -> &'static str {
        "SingletonPerScope"
    }
}

/// One value per nearest ancestor scope with the given name
///
/// Requests from outside any such scope share one value owned by the
/// producer's scope.
pub struct SingletonPerNamedScopeLifestyle {
    id: u64,
    scope_name: String,
    fallback: InstanceSlot,
}

impl SingletonPerNamedScopeLifestyle {
    pub fn new(scope_name: &str) -> Self {
        SingletonPerNamedScopeLifestyle {
            id: next_lifestyle_id(),
            scope_name: scope_name.to_string(),
            fallback: InstanceSlot::new(),
        }
    }
}

impl Lifestyle for SingletonPerNamedScopeLifestyle {
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError> {
        let named = context
            .requesting_scope()
            .ancestors()
            .find(|ancestor| ancestor.name() == Some(self.scope_name.as_str()))
            .cloned();

        match named {
            Some(named) => {
                locate_in_slot(&named.scoped_slot(self.id), &named, activation, scope, context, strategy)
            }
            None => {
                let owner = strategy.owner_scope().unwrap_or_else(|| scope.clone());
                locate_in_slot(&self.fallback, &owner, activation, scope, context, strategy)
            }
        }
    }

    fn clone_lifestyle(&self) -> Box<dyn Lifestyle> {
        Box::new(SingletonPerNamedScopeLifestyle::new(&self.scope_name))
    }

    fn name(&self) -> &'static str {
        "SingletonPerNamedScope"
    }
}

/// One value per activation of the nearest enclosing producer of `ancestor`
///
/// Outside of such an activation, all requests share one value owned by the
/// producer's scope.
pub struct SingletonPerAncestorLifestyle {
    id: u64,
    ancestor: ExportType,
    fallback: InstanceSlot,
}

impl SingletonPerAncestorLifestyle {
    pub fn new(ancestor: ExportType) -> Self {
        SingletonPerAncestorLifestyle {
            id: next_lifestyle_id(),
            ancestor,
            fallback: InstanceSlot::new(),
        }
    }
}

impl Lifestyle for SingletonPerAncestorLifestyle {
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError> {
        // The top frame is our own activation
        let frames = context.frames();
        let ancestor_frame = frames[..frames.len().saturating_sub(1)]
            .iter()
            .rev()
            .find(|frame| frame.activation_type == self.ancestor)
            .map(|frame| frame.frame_id);

        let Some(frame_id) = ancestor_frame else {
            let owner = strategy.owner_scope().unwrap_or_else(|| scope.clone());
            return locate_in_slot(&self.fallback, &owner, activation, scope, context, strategy);
        };

        if let Some(existing) = context.ancestor_instance(self.id, frame_id) {
            return Ok(existing);
        }

        let created = activation(scope, context)?;
        let stored = context.store_ancestor_instance(self.id, frame_id, created.clone());
        if stored.ptr_eq(&created) {
            strategy.track_disposable(&created, context.disposal());
        }
        Ok(stored)
    }

    fn clone_lifestyle(&self) -> Box<dyn Lifestyle> {
        Box::new(SingletonPerAncestorLifestyle::new(self.ancestor.clone()))
    }

    fn name(&self) -> &'static str {
        "SingletonPerAncestor"
    }
}

/// Creates the value once per slot, resolving and disposing it in `disposal_owner`
fn locate_in_slot(
    slot: &InstanceSlot,
    disposal_owner: &Scope,
    activation: &ActivationFn,
    scope: &Scope,
    context: &mut InjectionContext,
    strategy: &ExportStrategy,
) -> Result<Instance, LocateError> {
    let (instance, created) = slot.get_or_create(
        || activate_owned(activation, scope, disposal_owner, context),
        || strategy.circular_dependency(context),
    )?;
    if created {
        tracing::debug!(
            "Created {} for scope {}",
            strategy.activation_type(),
            disposal_owner.display_name()
        );
        strategy.track_disposable(&instance, disposal_owner.disposal());
    }
    Ok(instance)
}
