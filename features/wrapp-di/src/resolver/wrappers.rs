use std::{any::type_name, fmt::Debug, ops::Deref, sync::Arc};

use crate::{
    dependency::DependencyInfo,
    disposal::DisposalScope,
    errors::LocateError,
    export_type::{ExportType, Generic, GenericDef},
    handle::DiHandle,
    metadata::Metadata,
    request::LocateRequest,
    resolver::{arc::downcast, lazy::Lazy, Resolver},
    types::{DynError, Injectable},
};

pub const OWNED: GenericDef = GenericDef::new("Owned", 1);
pub const META: GenericDef = GenericDef::new("Meta", 1);
pub const ALL: GenericDef = GenericDef::new("All", 1);

/// A value whose disposables belong to the caller
///
/// Everything disposable created while resolving the value is disposed when
/// the `Owned` is dropped or [`Owned::dispose`] is called.
pub struct Owned<T: ?Sized + Injectable> {
    value: Arc<T>,
    disposal: DisposalScope,
}

impl<T: ?Sized + Injectable> Owned<T> {
    pub(crate) fn new(value: Arc<T>, disposal: DisposalScope) -> Self {
        Owned { value, disposal }
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn disposal(&self) -> &DisposalScope {
        &self.disposal
    }

    pub fn dispose(&self) {
        self.disposal.dispose();
    }
}

impl<T: ?Sized + Injectable> Drop for Owned<T> {
    fn drop(&mut self) {
        self.disposal.dispose();
    }
}

impl<T: ?Sized + Injectable> Deref for Owned<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: ?Sized + Injectable + Debug> Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owned")
            .field("value", &self.value)
            .field("disposables", &self.disposal.len())
            .finish()
    }
}

fn resolve_owned<T: ?Sized + Injectable>(handle: &mut DiHandle<'_>) -> Result<Owned<T>, LocateError> {
    let disposal = DisposalScope::new();
    let scope = handle.requesting_scope().clone();
    let mut context = handle
        .context()
        .clone_for_element()
        .with_disposal(disposal.clone());

    let request = LocateRequest::of_type(ExportType::of::<T>());
    match scope.locate_in(&mut context, &request)? {
        Some(instance) => Ok(Owned::new(downcast(&instance)?, disposal)),
        None => Err(LocateError::not_found(type_name::<T>())),
    }
}

impl<T: ?Sized + Injectable> Resolver for Owned<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        resolve_owned(handle)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>()
    }
}

impl<T: ?Sized + Injectable> Generic for Owned<T> {
    const DEFINITION: GenericDef = OWNED;

    fn arguments() -> Vec<ExportType> {
        vec![ExportType::of::<T>()]
    }

    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError> {
        Ok(resolve_owned(di)?)
    }
}

/// A value together with the metadata of the producer which made it
pub struct Meta<T: ?Sized + Injectable> {
    value: Arc<T>,
    metadata: Metadata,
}

impl<T: ?Sized + Injectable> Meta<T> {
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<T: ?Sized + Injectable> Deref for Meta<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: ?Sized + Injectable + Debug> Debug for Meta<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meta")
            .field("value", &self.value)
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn resolve_meta<T: ?Sized + Injectable>(handle: &mut DiHandle<'_>) -> Result<Meta<T>, LocateError> {
    let scope = handle.requesting_scope().clone();
    let request = LocateRequest::of_type(ExportType::of::<T>());
    match scope.locate_entry_in(handle.context(), &request)? {
        Some(located) => Ok(Meta {
            value: downcast(&located.instance)?,
            metadata: located.metadata(),
        }),
        None => Err(LocateError::not_found(type_name::<T>())),
    }
}

impl<T: ?Sized + Injectable> Resolver for Meta<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        resolve_meta(handle)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>()
    }
}

impl<T: ?Sized + Injectable> Generic for Meta<T> {
    const DEFINITION: GenericDef = META;

    fn arguments() -> Vec<ExportType> {
        vec![ExportType::of::<T>()]
    }

    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError> {
        Ok(resolve_meta(di)?)
    }
}

/// Every export of `T`, as a single injectable value
pub struct All<T: ?Sized + Injectable>(pub Vec<Arc<T>>);

impl<T: ?Sized + Injectable> Deref for All<T> {
    type Target = Vec<Arc<T>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized + Injectable + Debug> Debug for All<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("All").field(&self.0).finish()
    }
}

impl<T: ?Sized + Injectable> Resolver for All<T> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        Vec::<Arc<T>>::resolve(handle).map(All)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().many()
    }
}

impl<T: ?Sized + Injectable> Generic for All<T> {
    const DEFINITION: GenericDef = ALL;

    fn arguments() -> Vec<ExportType> {
        vec![ExportType::of::<T>()]
    }

    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError> {
        Ok(Vec::<Arc<T>>::resolve(di).map(All)?)
    }
}

/// Every export of `T`, each with its own disposal scope
impl<T: ?Sized + Injectable> Resolver for Vec<Owned<T>> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        let scope = handle.requesting_scope().clone();
        let request = LocateRequest::of_type(ExportType::of::<T>());
        scope
            .locate_all_owned_in(handle.context(), &request)?
            .into_iter()
            .map(|(instance, disposal)| -> Result<Owned<T>, LocateError> {
                Ok(Owned::new(downcast(&instance)?, disposal))
            })
            .collect()
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().many()
    }
}

impl<T: ?Sized + Injectable> Resolver for Vec<Meta<T>> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        let scope = handle.requesting_scope().clone();
        let request = LocateRequest::of_type(ExportType::of::<T>());
        scope
            .locate_all_meta_in(handle.context(), &request)?
            .into_iter()
            .map(|(instance, metadata)| -> Result<Meta<T>, LocateError> {
                Ok(Meta {
                    value: downcast(&instance)?,
                    metadata,
                })
            })
            .collect()
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().many()
    }
}

/// Every export of `T`, none of them activated before first access
impl<T: ?Sized + Injectable> Resolver for Vec<Lazy<T>> {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError> {
        let scope = handle.requesting_scope().clone();
        let request = LocateRequest::of_type(ExportType::of::<T>());
        Ok(scope
            .locate_all_lazy_in(handle.context(), &request)?
            .into_iter()
            .map(Lazy::from_export)
            .collect())
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::of::<T>().many()
    }
}
