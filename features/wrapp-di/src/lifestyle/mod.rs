use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::{
    context::InjectionContext,
    errors::LocateError,
    scope::Scope,
    strategy::{ActivationFn, ExportStrategy},
    types::Instance,
};

mod scoped;
mod singleton;
mod weak;

pub use scoped::{SingletonPerAncestorLifestyle, SingletonPerNamedScopeLifestyle, SingletonPerScopeLifestyle};
pub use singleton::SingletonLifestyle;
pub use weak::WeakSingletonLifestyle;

static NEXT_LIFESTYLE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_lifestyle_id() -> u64 {
    NEXT_LIFESTYLE.fetch_add(1, Ordering::Relaxed)
}

/// Caching policy wrapped around a producer's activation
pub trait Lifestyle: Send + Sync {
    /// Returns a cached value, or creates one through `activation`
    fn locate(
        &self,
        activation: &ActivationFn,
        scope: &Scope,
        context: &mut InjectionContext,
        strategy: &ExportStrategy,
    ) -> Result<Instance, LocateError>;

    /// Same policy with an empty cache - closed generics never share values
    /// with their open definition
    fn clone_lifestyle(&self) -> Box<dyn Lifestyle>;

    fn name(&self) -> &'static str;

    /// Whether disposable values are refused
    fn rejects_disposable(&self) -> bool {
        false
    }

    /// Drops cached values
    fn dispose(&self) {}
}

/// A value created at most once
#[derive(Default)]
pub(crate) struct InstanceSlot {
    value: OnceLock<Instance>,
    lock: Mutex<()>,
    creating: CreatingThread,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Instance> {
        self.value.get()
    }

    /// Runs `create` only if no value exists, concurrent callers wait for it
    ///
    /// A request from the thread that is currently creating the value is a
    /// cycle and fails with `reentered` instead of waiting on itself.
    /// Returns the value and whether this call created it.
    pub fn get_or_create(
        &self,
        create: impl FnOnce() -> Result<Instance, LocateError>,
        reentered: impl FnOnce() -> LocateError,
    ) -> Result<(Instance, bool), LocateError> {
        if let Some(value) = self.value.get() {
            return Ok((value.clone(), false));
        }
        if self.creating.is_current() {
            return Err(reentered());
        }

        let _guard = self.lock.lock();

        // Double check - another thread might have created it while we waited for the lock
        if let Some(value) = self.value.get() {
            return Ok((value.clone(), false));
        }

        let created = {
            let _creating = self.creating.enter();
            create()?
        };
        let _ = self.value.set(created.clone());
        Ok((created, true))
    }
}

/// The thread currently running a lifestyle's activation
#[derive(Default)]
pub(crate) struct CreatingThread(Mutex<Option<ThreadId>>);

impl CreatingThread {
    pub fn is_current(&self) -> bool {
        *self.0.lock() == Some(thread::current().id())
    }

    /// Marks the current thread as creating until the guard drops
    pub fn enter(&self) -> CreatingGuard<'_> {
        *self.0.lock() = Some(thread::current().id());
        CreatingGuard(self)
    }
}

pub(crate) struct CreatingGuard<'a>(&'a CreatingThread);

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        *self.0 .0.lock() = None;
    }
}

/// Runs `activation` for a value owned by `owner`
///
/// Dependencies resolve from `owner` and its transient disposables are
/// tracked there, not in the requesting scope. Named scope templates sit
/// outside the tree, their values still resolve from the requesting scope.
pub(crate) fn activate_owned(
    activation: &ActivationFn,
    scope: &Scope,
    owner: &Scope,
    context: &InjectionContext,
) -> Result<Instance, LocateError> {
    let mut owned = if owner.is_template() {
        context.for_disposal(owner.disposal().clone())
    } else {
        context.for_owner(owner)
    };
    activation(scope, &mut owned)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Barrier,
        },
        thread,
    };

    use super::*;

    #[test]
    fn slot_creates_once_under_contention() {
        let slot = Arc::new(InstanceSlot::new());
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let created = created.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    slot.get_or_create(
                        || {
                            created.fetch_add(1, Ordering::SeqCst);
                            Ok(Instance::new(5_u32))
                        },
                        || LocateError::not_found("u32"),
                    )
                    .unwrap()
                    .0
                })
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| i.ptr_eq(&instances[0])));
    }

    #[test]
    fn failed_creation_leaves_slot_empty() {
        let slot = InstanceSlot::new();
        let missing = || LocateError::not_found("u32");
        assert!(slot
            .get_or_create(|| Err(LocateError::not_found("u32")), missing)
            .is_err());
        assert!(slot.get().is_none());

        let (_, created) = slot.get_or_create(|| Ok(Instance::new(1_u32)), missing).unwrap();
        assert!(created);
    }

    #[test]
    fn reentering_a_slot_fails_instead_of_blocking() {
        let slot = InstanceSlot::new();
        let cycle = || LocateError::new(crate::errors::LocateErrorKind::DepthExceeded(0));

        let outer = slot.get_or_create(
            || {
                let inner = slot.get_or_create(|| Ok(Instance::new(2_u32)), cycle);
                assert!(matches!(
                    inner.err().map(|error| error.kind),
                    Some(crate::errors::LocateErrorKind::DepthExceeded(0))
                ));
                Ok(Instance::new(1_u32))
            },
            cycle,
        );

        assert!(outer.unwrap().1);
        assert!(!slot.creating.is_current());
    }
}
