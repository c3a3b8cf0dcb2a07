use std::{any::type_name, sync::Arc};

use crate::{
    dependency::DependencyInfo,
    errors::{LocateError, LocateErrorKind},
    export_type::ExportType,
    handle::DiHandle,
    request::LocateRequest,
    resolver::Resolver,
    types::{Injectable, Instance},
};

pub(crate) fn downcast<T: ?Sized + Injectable>(instance: &Instance) -> Result<Arc<T>, LocateError> {
    instance.downcast::<T>().map_err(|actual_type| {
        LocateErrorKind::DowncastFailed {
            required_type: type_name::<T>(),
            actual_type,
        }
        .into()
    })
}

impl<T: ?Sized + Injectable> Resolver for Arc<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        let request = LocateRequest::of_type(ExportType::of::<T>());
        match handle.locate(&request)? {
            Some(resolved) => downcast(&resolved),
            None => Err(LocateError::not_found(type_name::<T>())),
        }
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>()
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError>
    where
        Self: Sized,
    {
        match Resolvable::resolve(handle) {
            Ok(resolved) => Ok(Some(resolved)),
            // If the required type is not registered Option does not fail
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn dependency_info() -> DependencyInfo {
        Resolvable::dependency_info().optional()
    }
}

/// Every export of `T` in the scope chain
impl<T: ?Sized + Injectable> Resolver for Vec<Arc<T>> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        let request = LocateRequest::of_type(ExportType::of::<T>());
        handle
            .locate_all(&request)?
            .iter()
            .map(downcast::<T>)
            .collect()
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().many()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scope::Scope, strategy::StrategyBuilder};

    struct Pair {
        number: Arc<u32>,
        text: Option<Arc<String>>,
        all: Vec<Arc<u32>>,
    }

    #[test]
    fn resolves_through_handle() {
        let scope = Scope::root();
        scope
            .configure(|registration| {
                registration
                    .instance(1_u32)
                    .add(StrategyBuilder::instance(2_u32))
                    .add(StrategyBuilder::delegate(|di| {
                        Ok(Pair {
                            number: di.resolve()?,
                            text: di.resolve()?,
                            all: di.resolve()?,
                        })
                    }));
            })
            .unwrap();

        let pair = scope.locate::<Pair>().unwrap().unwrap();
        assert_eq!(*pair.number, 2);
        assert!(pair.text.is_none());
        assert_eq!(pair.all.len(), 2);
    }
}
