use std::{any::type_name, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    export_type::{ExportType, TypePattern},
    request::{ExportFilter, LocateRequest, LocateTarget},
    resolver::lazy::{Lazy, LazyExport},
    types::{Injectable, Instance, KeySelector},
};

/// What a dependency points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyTarget {
    Type(TypePattern),
    /// Case-insensitive export name
    Name(String),
}
impl fmt::Display for DependencyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyTarget::Type(pattern) => write!(f, "{pattern}"),
            DependencyTarget::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Describes one dependency of a producer
#[derive(Clone)]
pub struct DependencyInfo {
    /// Name the constructor uses to fetch the resolved value
    pub member: &'static str,
    pub target: DependencyTarget,
    pub key: Option<KeySelector>,
    /// A missing value is passed as "none" instead of failing
    pub optional: bool,
    /// Resolved on first access instead of during activation
    pub lazy: bool,
    /// Resolves every matching export
    pub many: bool,
    pub filter: Option<ExportFilter>,
}

impl fmt::Debug for DependencyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyInfo")
            .field("member", &self.member)
            .field("target", &self.target)
            .field("key", &self.key)
            .field("optional", &self.optional)
            .field("lazy", &self.lazy)
            .field("many", &self.many)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl DependencyInfo {
    fn new(member: &'static str, target: DependencyTarget) -> Self {
        DependencyInfo {
            member,
            target,
            key: None,
            optional: false,
            lazy: false,
            many: false,
            filter: None,
        }
    }

    /// A dependency on `T`, fetched under the type's name
    pub fn of<T: ?Sized + Injectable>() -> Self {
        Self::new(type_name::<T>(), DependencyTarget::Type(ExportType::of::<T>().into()))
    }

    pub fn export_type(member: &'static str, export_type: ExportType) -> Self {
        Self::new(member, DependencyTarget::Type(export_type.into()))
    }

    pub fn pattern(member: &'static str, pattern: TypePattern) -> Self {
        Self::new(member, DependencyTarget::Type(pattern))
    }

    /// The n-th type argument of the closed generic
    pub fn parameter(member: &'static str, index: usize) -> Self {
        Self::pattern(member, TypePattern::Parameter(index))
    }

    pub fn named(member: &'static str, name: &str) -> Self {
        Self::new(member, DependencyTarget::Name(name.trim().to_lowercase()))
    }

    pub fn member(mut self, member: &'static str) -> Self {
        self.member = member;
        self
    }

    pub fn keyed(mut self, key: impl Into<KeySelector>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn filtered(mut self, filter: ExportFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// True if the target still refers to type parameters
    pub fn is_open(&self) -> bool {
        match &self.target {
            DependencyTarget::Type(pattern) => pattern.is_open(),
            DependencyTarget::Name(_) => false,
        }
    }

    /// Substitutes type parameters, `None` if an argument is missing
    pub fn close(&self, arguments: &[ExportType]) -> Option<DependencyInfo> {
        let target = match &self.target {
            DependencyTarget::Type(pattern) => {
                DependencyTarget::Type(TypePattern::Exact(pattern.close(arguments)?))
            }
            DependencyTarget::Name(name) => DependencyTarget::Name(name.clone()),
        };
        Some(DependencyInfo {
            target,
            ..self.clone()
        })
    }

    /// The request this dependency resolves through
    pub fn request(&self) -> Option<LocateRequest> {
        let target = match &self.target {
            DependencyTarget::Type(pattern) => LocateTarget::Type(pattern.exact()?),
            DependencyTarget::Name(name) => LocateTarget::Name(name.clone()),
        };
        Some(LocateRequest {
            target,
            key: self.key.clone(),
            filter: self.filter.clone(),
        })
    }
}

/// A resolved dependency value
#[derive(Debug, Clone)]
pub enum Resolved {
    One(Instance),
    /// Optional and not found
    Missing,
    Many(Vec<Instance>),
    Lazy(LazyExport),
}

#[derive(Error, Debug, Clone)]
pub enum DependencyError {
    #[error("No dependency was declared for member '{0}'")]
    UnknownMember(&'static str),
    #[error("Required dependency '{0}' is missing")]
    Missing(&'static str),
    #[error("Dependency '{member}' has a different shape than requested")]
    Shape { member: &'static str },
    #[error("Failed to downcast '{member}', required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        member: &'static str,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// Values resolved for the declared dependencies of a producer
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    entries: Vec<(&'static str, Resolved)>,
}

impl Dependencies {
    pub(crate) fn push(&mut self, member: &'static str, resolved: Resolved) {
        self.entries.push((member, resolved));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn resolved(&self, member: &'static str) -> Option<&Resolved> {
        self.entries
            .iter()
            .find(|(name, _)| *name == member)
            .map(|(_, resolved)| resolved)
    }

    fn entry(&self, member: &'static str) -> Result<&Resolved, DependencyError> {
        self.resolved(member)
            .ok_or(DependencyError::UnknownMember(member))
    }

    fn downcast<T: ?Sized + Injectable>(
        member: &'static str,
        instance: &Instance,
    ) -> Result<Arc<T>, DependencyError> {
        instance
            .downcast::<T>()
            .map_err(|actual_type| DependencyError::DowncastFailed {
                member,
                required_type: type_name::<T>(),
                actual_type,
            })
    }

    /// A required single value
    pub fn get<T: ?Sized + Injectable>(&self, member: &'static str) -> Result<Arc<T>, DependencyError> {
        match self.optional::<T>(member)? {
            Some(value) => Ok(value),
            None => Err(DependencyError::Missing(member)),
        }
    }

    pub fn optional<T: ?Sized + Injectable>(
        &self,
        member: &'static str,
    ) -> Result<Option<Arc<T>>, DependencyError> {
        match self.entry(member)? {
            Resolved::One(instance) => Self::downcast::<T>(member, instance).map(Some),
            Resolved::Missing => Ok(None),
            _ => Err(DependencyError::Shape { member }),
        }
    }

    pub fn all<T: ?Sized + Injectable>(
        &self,
        member: &'static str,
    ) -> Result<Vec<Arc<T>>, DependencyError> {
        match self.entry(member)? {
            Resolved::Many(instances) => instances
                .iter()
                .map(|instance| Self::downcast::<T>(member, instance))
                .collect(),
            Resolved::Missing => Ok(Vec::new()),
            _ => Err(DependencyError::Shape { member }),
        }
    }

    pub fn lazy<T: ?Sized + Injectable>(&self, member: &'static str) -> Result<Lazy<T>, DependencyError> {
        match self.entry(member)? {
            Resolved::Lazy(lazy) => Ok(Lazy::from_export(lazy.clone())),
            _ => Err(DependencyError::Shape { member }),
        }
    }

    /// The untyped value of a single dependency
    pub fn instance(&self, member: &'static str) -> Option<&Instance> {
        match self.resolved(member)? {
            Resolved::One(instance) => Some(instance),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export_type::GenericDef;

    #[test]
    fn closes_parameter_targets() {
        const REPOSITORY: GenericDef = GenericDef::new("Repository", 1);
        let dependency = DependencyInfo::pattern(
            "inner",
            TypePattern::Constructed(REPOSITORY, vec![TypePattern::Parameter(0)]),
        )
        .optional();
        assert!(dependency.is_open());
        assert!(dependency.request().is_none());

        let closed = dependency.close(&[ExportType::of::<u8>()]).unwrap();
        assert!(!closed.is_open());
        assert!(closed.optional);
        assert_eq!(
            closed.request().unwrap().target,
            LocateTarget::Type(ExportType::constructed(REPOSITORY, vec![ExportType::of::<u8>()]))
        );
    }

    #[test]
    fn accessors_check_shape_and_type() {
        let mut dependencies = Dependencies::default();
        dependencies.push("number", Resolved::One(Instance::new(3_u32)));
        dependencies.push("missing", Resolved::Missing);
        dependencies.push(
            "many",
            Resolved::Many(vec![Instance::new(1_u32), Instance::new(2_u32)]),
        );

        assert_eq!(*dependencies.get::<u32>("number").unwrap(), 3);
        assert!(dependencies.optional::<u32>("missing").unwrap().is_none());
        assert!(matches!(
            dependencies.get::<u32>("missing"),
            Err(DependencyError::Missing("missing"))
        ));
        assert!(matches!(
            dependencies.get::<u64>("number"),
            Err(DependencyError::DowncastFailed { .. })
        ));
        assert!(matches!(
            dependencies.get::<u32>("many"),
            Err(DependencyError::Shape { .. })
        ));
        assert_eq!(dependencies.all::<u32>("many").unwrap().len(), 2);
        assert!(matches!(
            dependencies.get::<u32>("nope"),
            Err(DependencyError::UnknownMember("nope"))
        ));
    }
}
