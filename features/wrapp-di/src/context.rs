use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    disposal::DisposalScope,
    export_type::ExportType,
    scope::Scope,
    strategy::StrategyId,
    types::Instance,
};

static NEXT_FRAME: AtomicU64 = AtomicU64::new(1);

/// A producer currently being activated
#[derive(Debug, Clone)]
pub struct ActivationFrame {
    pub frame_id: u64,
    pub strategy_id: StrategyId,
    pub activation_type: ExportType,
}

/// Mutable state of one resolution call
///
/// Created at the public entry points and handed down through every nested
/// activation.
pub struct InjectionContext {
    requesting_scope: Scope,
    disposal: DisposalScope,
    /// Values pushed for the duration of an activation, latest last
    ambient: Vec<(ExportType, Instance)>,
    frames: Vec<ActivationFrame>,
    /// Per-ancestor lifestyle instances, shared between element clones
    ancestor_cache: Arc<Mutex<HashMap<(u64, u64), Instance>>>,
}

impl Debug for InjectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frames: Vec<String> = self
            .frames
            .iter()
            .map(|frame| frame.activation_type.to_string())
            .collect();
        f.debug_struct("InjectionContext")
            .field("requesting_scope", &self.requesting_scope.id())
            .field("ambient", &self.ambient.len())
            .field("frames", &frames)
            .finish()
    }
}

impl InjectionContext {
    pub fn new(requesting_scope: &Scope) -> Self {
        InjectionContext {
            disposal: requesting_scope.disposal().clone(),
            requesting_scope: requesting_scope.clone(),
            ambient: Vec::new(),
            frames: Vec::new(),
            ancestor_cache: Default::default(),
        }
    }

    /// Track transient disposables somewhere else than the requesting scope
    pub fn with_disposal(mut self, disposal: DisposalScope) -> Self {
        self.disposal = disposal;
        self
    }

    pub fn requesting_scope(&self) -> &Scope {
        &self.requesting_scope
    }

    pub fn disposal(&self) -> &DisposalScope {
        &self.disposal
    }

    /// Makes `instance` available as `export_type` until it is popped
    pub fn push_export(&mut self, export_type: ExportType, instance: Instance) {
        self.ambient.push((export_type, instance));
    }

    pub fn pop_export(&mut self) -> Option<(ExportType, Instance)> {
        self.ambient.pop()
    }

    /// The most recently pushed value for `export_type`
    pub fn ambient_export(&self, export_type: &ExportType) -> Option<&Instance> {
        self.ambient
            .iter()
            .rev()
            .find(|(ambient_type, _)| ambient_type == export_type)
            .map(|(_, instance)| instance)
    }

    pub fn current_frame(&self) -> Option<&ActivationFrame> {
        self.frames.last()
    }

    pub fn frames(&self) -> &[ActivationFrame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Copy used to resolve one element of a collection
    ///
    /// Shares everything but the ambient exports, so the element cannot leak
    /// exports into the caller.
    pub fn clone_for_element(&self) -> Self {
        InjectionContext {
            requesting_scope: self.requesting_scope.clone(),
            disposal: self.disposal.clone(),
            ambient: Vec::new(),
            frames: self.frames.clone(),
            ancestor_cache: self.ancestor_cache.clone(),
        }
    }

    /// Copy resolving from `owner` and tracking disposables there
    ///
    /// Used while creating a value that outlives the request. Frames are kept
    /// so cycles through the value are still found.
    pub(crate) fn for_owner(&self, owner: &Scope) -> Self {
        InjectionContext {
            requesting_scope: owner.clone(),
            ..self.for_disposal(owner.disposal().clone())
        }
    }

    /// Copy tracking disposables in `disposal`
    pub(crate) fn for_disposal(&self, disposal: DisposalScope) -> Self {
        InjectionContext {
            requesting_scope: self.requesting_scope.clone(),
            disposal,
            ambient: self.ambient.clone(),
            frames: self.frames.clone(),
            ancestor_cache: self.ancestor_cache.clone(),
        }
    }

    pub(crate) fn push_frame(&mut self, strategy_id: StrategyId, activation_type: ExportType) {
        self.frames.push(ActivationFrame {
            frame_id: NEXT_FRAME.fetch_add(1, Ordering::Relaxed),
            strategy_id,
            activation_type,
        });
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn ancestor_instance(&self, lifestyle_id: u64, frame_id: u64) -> Option<Instance> {
        self.ancestor_cache
            .lock()
            .get(&(lifestyle_id, frame_id))
            .cloned()
    }

    pub(crate) fn store_ancestor_instance(
        &self,
        lifestyle_id: u64,
        frame_id: u64,
        instance: Instance,
    ) -> Instance {
        self.ancestor_cache
            .lock()
            .entry((lifestyle_id, frame_id))
            .or_insert(instance)
            .clone()
    }
}
