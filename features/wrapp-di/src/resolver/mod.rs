use crate::{dependency::DependencyInfo, errors::LocateError, handle::DiHandle};

pub mod arc;
pub mod lazy;
pub mod wrappers;

/// Allows custom behaviour on injection
pub trait Resolver {
    fn resolve(handle: &mut DiHandle<'_>) -> Result<Self, LocateError>
    where
        Self: Sized;

    fn dependency_info() -> DependencyInfo;
}
