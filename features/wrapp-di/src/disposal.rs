use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// A value holding resources which must be released explicitly
///
/// The kernel calls `dispose` exactly once for every tracked value.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Tracks disposables and releases them in reverse order of registration
#[derive(Clone, Default)]
pub struct DisposalScope(Arc<DisposalScopeInner>);

#[derive(Default)]
struct DisposalScopeInner {
    tracked: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: AtomicBool,
}

impl Debug for DisposalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalScope")
            .field("tracked", &self.0.tracked.lock().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl DisposalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a disposable
    ///
    /// If the scope was already disposed the value is disposed immediately,
    /// nothing can release it later.
    pub fn track(&self, disposable: Arc<dyn Disposable>) {
        {
            let mut tracked = self.0.tracked.lock();
            if !self.is_disposed() {
                tracked.push(disposable);
                return;
            }
        }

        tracing::warn!("Disposable tracked after its disposal scope was disposed, disposing now");
        disposable.dispose();
    }

    pub fn len(&self) -> usize {
        self.0.tracked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    /// Disposes everything tracked so far - calling it again is a no-op
    pub fn dispose(&self) {
        let drained = {
            let mut tracked = self.0.tracked.lock();
            if self.0.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *tracked)
        };

        tracing::debug!("Disposing {} tracked values", drained.len());
        for disposable in drained.into_iter().rev() {
            disposable.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        count: Arc<AtomicUsize>,
    }
    impl Disposable for Recorder {
        fn dispose(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(self.id);
        }
    }

    #[test]
    fn disposes_in_reverse_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let scope = DisposalScope::new();
        for id in 0..3 {
            scope.track(Arc::new(Recorder {
                id,
                log: log.clone(),
                count: count.clone(),
            }));
        }

        scope.dispose();
        scope.dispose();

        assert_eq!(*log.lock(), vec![2, 1, 0]);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(scope.is_empty());
    }

    #[test]
    fn late_tracking_disposes_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let scope = DisposalScope::new();
        scope.dispose();

        scope.track(Arc::new(Recorder {
            id: 7,
            log: log.clone(),
            count,
        }));

        assert_eq!(*log.lock(), vec![7]);
    }
}
