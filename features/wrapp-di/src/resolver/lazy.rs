use std::{
    any::type_name,
    fmt::Debug,
    ops::Deref,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;

use crate::{
    context::InjectionContext,
    dependency::DependencyInfo,
    errors::{LocateError, LocateErrorKind},
    export_type::{ExportType, Generic, GenericDef},
    handle::DiHandle,
    request::LocateRequest,
    resolver::Resolver,
    scope::{Scope, WeakScope},
    strategy::ExportStrategy,
    types::{DynError, Injectable, Instance},
};

enum LazySource {
    Request {
        request: LocateRequest,
        optional: bool,
    },
    Strategy {
        strategy: Arc<ExportStrategy>,
        requested: Option<ExportType>,
    },
}

struct LazyExportInner {
    scope: WeakScope,
    source: LazySource,
    once: OnceLock<Result<Option<Instance>, LocateError>>,
    lock: Mutex<()>,
}

/// An untyped value resolved on first access
///
/// Holds its scope weakly - accessing it after the scope is gone fails.
#[derive(Clone)]
pub struct LazyExport(Arc<LazyExportInner>);

impl Debug for LazyExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyExport")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl LazyExport {
    fn new(scope: Scope, source: LazySource) -> Self {
        LazyExport(Arc::new(LazyExportInner {
            scope: scope.downgrade(),
            source,
            once: OnceLock::new(),
            lock: Mutex::new(()),
        }))
    }

    pub(crate) fn request(scope: Scope, request: LocateRequest, optional: bool) -> Self {
        Self::new(scope, LazySource::Request { request, optional })
    }

    pub(crate) fn strategy(
        scope: Scope,
        strategy: Arc<ExportStrategy>,
        requested: Option<ExportType>,
    ) -> Self {
        Self::new(scope, LazySource::Strategy { strategy, requested })
    }

    pub fn is_resolved(&self) -> bool {
        self.0.once.get().is_some()
    }

    /// Resolves on first call, later calls return the same result
    pub fn try_get(&self) -> Result<Option<&Instance>, &LocateError> {
        if let Some(result) = self.0.once.get() {
            return result.as_ref().map(Option::as_ref);
        }

        let _guard = self.0.lock.lock();

        // Double check once - it might have been set while we waited for the lock
        if let Some(result) = self.0.once.get() {
            return result.as_ref().map(Option::as_ref);
        }

        let _ = self.0.once.set(self.resolve());
        match self.0.once.get() {
            Some(result) => result.as_ref().map(Option::as_ref),
            None => Ok(None),
        }
    }

    fn resolve(&self) -> Result<Option<Instance>, LocateError> {
        let Some(scope) = self.0.scope.upgrade() else {
            return Err(LocateErrorKind::ScopeDisposed("dropped scope".into()).into());
        };
        let mut context = InjectionContext::new(&scope);

        match &self.0.source {
            LazySource::Request { request, optional } => {
                match scope.locate_in(&mut context, request)? {
                    Some(instance) => Ok(Some(instance)),
                    None if *optional => Ok(None),
                    None => Err(LocateError::not_found(request.to_string())),
                }
            }
            LazySource::Strategy {
                strategy,
                requested,
            } => strategy
                .activate(&scope, &mut context, requested.as_ref())
                .map(Some),
        }
    }
}

/// Lazily resolved dependency
///
/// Resolution happens on first access, which makes it the way out of
/// circular dependencies.
///
/// ### Panics
///
/// `get` and `Deref` panic if the resolution failed, use `try_get` to handle
/// the error instead.
pub struct Lazy<T: ?Sized + Injectable>(Arc<LazyInner<T>>);
struct LazyInner<T: ?Sized + Injectable> {
    export: LazyExport,
    once: OnceLock<Result<Arc<T>, LocateError>>,
}
impl<T: ?Sized + Injectable> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Lazy(self.0.clone())
    }
}
impl<T: ?Sized + Injectable + Debug> Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.once.get() {
            Some(Ok(value)) => f.debug_tuple("Lazy").field(value).finish(),
            Some(Err(_)) => f.debug_tuple("Lazy").field(&"failed").finish(),
            None => f.debug_tuple("Lazy").field(&"pending").finish(),
        }
    }
}
impl<T: ?Sized + Injectable> Deref for Lazy<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}
impl<T: ?Sized + Injectable> Resolver for Lazy<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        Ok(Lazy::request(handle.requesting_scope(), false))
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().lazy()
    }
}

impl<T: ?Sized + Injectable> Lazy<T> {
    pub(crate) fn from_export(export: LazyExport) -> Self {
        Lazy(Arc::new(LazyInner {
            export,
            once: OnceLock::new(),
        }))
    }

    pub(crate) fn request(scope: &Scope, optional: bool) -> Self {
        Self::from_export(LazyExport::request(
            scope.clone(),
            LocateRequest::of_type(ExportType::of::<T>()),
            optional,
        ))
    }

    /// Accesses the Lazy Dependency
    ///
    /// # Panics
    /// - When the dependency could not be resolved
    pub fn get(&self) -> &Arc<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => panic!("Lazy dependency could not be resolved: {error}"),
        }
    }

    /// Try to access the lazy dependency, resolving it on first access
    pub fn try_get(&self) -> Result<&Arc<T>, &LocateError> {
        self.0
            .once
            .get_or_init(|| match self.0.export.try_get() {
                Ok(Some(instance)) => instance.downcast::<T>().map_err(|actual_type| {
                    LocateErrorKind::DowncastFailed {
                        required_type: type_name::<T>(),
                        actual_type,
                    }
                    .into()
                }),
                Ok(None) => Err(LocateError::not_found(type_name::<T>())),
                Err(error) => Err(error.clone()),
            })
            .as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.once.get().is_some()
    }
}

/// `Lazy<T>` as a generic type, so it can be requested with `locate_generic`
impl<T: ?Sized + Injectable> Generic for Lazy<T> {
    const DEFINITION: GenericDef = LAZY;

    fn arguments() -> Vec<ExportType> {
        vec![ExportType::of::<T>()]
    }

    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError> {
        Ok(Lazy::request(di.requesting_scope(), false))
    }
}

pub const LAZY: GenericDef = GenericDef::new("Lazy", 1);

/// Lazily resolved optional dependency
pub struct LazyOption<T: ?Sized + Injectable> {
    lazy: Lazy<T>,
}
impl<T: ?Sized + Injectable> Clone for LazyOption<T> {
    fn clone(&self) -> Self {
        LazyOption {
            lazy: self.lazy.clone(),
        }
    }
}
impl<T: ?Sized + Injectable + Debug> Debug for LazyOption<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LazyOption").field(&self.lazy).finish()
    }
}
impl<T: ?Sized + Injectable> Resolver for LazyOption<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        Ok(LazyOption {
            lazy: Lazy::request(handle.requesting_scope(), true),
        })
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().lazy().optional()
    }
}
impl<T: ?Sized + Injectable> LazyOption<T> {
    /// Accesses the Lazy Dependency - returning an error on failure
    pub fn try_get(&self) -> Result<Option<&Arc<T>>, &LocateError> {
        match self.lazy.try_get() {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Accesses the Lazy Dependency
    ///
    /// # Panics
    /// - If resolution failed for another reason than a missing export
    pub fn get(&self) -> Option<&Arc<T>> {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => panic!("Accessed LazyOption after resolution failure: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scope::Scope, strategy::StrategyBuilder};

    #[test]
    fn resolves_on_first_access_only() {
        let scope = Scope::root();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        scope
            .add_strategy(
                StrategyBuilder::delegate(move |_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(9_u32)
                })
                .build()
                .unwrap(),
            )
            .unwrap();

        let lazy = Lazy::<u32>::request(&scope, false);
        assert!(!lazy.is_resolved());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        assert_eq!(**lazy, 9);
        assert_eq!(**lazy.clone(), 9);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_values() {
        let scope = Scope::root();
        let required = Lazy::<u64>::request(&scope, false);
        assert!(required.try_get().unwrap_err().is_not_found());

        let optional = LazyOption {
            lazy: Lazy::<u64>::request(&scope, true),
        };
        assert!(optional.get().is_none());
    }

    #[test]
    fn fails_once_scope_is_gone() {
        let scope = Scope::root();
        let lazy = Lazy::<u32>::request(&scope, false);
        drop(scope);
        assert!(matches!(
            lazy.try_get().unwrap_err().kind,
            LocateErrorKind::ScopeDisposed(_)
        ));
    }
}
