use std::{fmt, sync::Arc};

use crate::{
    context::InjectionContext,
    export_type::ExportType,
    strategy::ExportStrategy,
    types::{Injectable, Instance, KeySelector},
};

/// Caller supplied predicate over candidate producers
pub type ExportFilter = Arc<dyn Fn(&InjectionContext, &ExportStrategy) -> bool + Send + Sync>;

/// What a request is looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateTarget {
    Type(ExportType),
    /// Lowercased export name
    Name(String),
}
impl fmt::Display for LocateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateTarget::Type(export_type) => write!(f, "{export_type}"),
            LocateTarget::Name(name) => write!(f, "name '{name}'"),
        }
    }
}

/// A single resolution request
#[derive(Clone)]
pub struct LocateRequest {
    pub target: LocateTarget,
    pub key: Option<KeySelector>,
    pub filter: Option<ExportFilter>,
}

impl fmt::Debug for LocateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocateRequest")
            .field("target", &self.target)
            .field("key", &self.key)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl fmt::Display for LocateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if let Some(key) = &self.key {
            write!(f, " with key {key}")?;
        }
        Ok(())
    }
}

impl LocateRequest {
    pub fn of_type(export_type: ExportType) -> Self {
        LocateRequest {
            target: LocateTarget::Type(export_type),
            key: None,
            filter: None,
        }
    }

    pub fn named(name: &str) -> Self {
        LocateRequest {
            target: LocateTarget::Name(name.trim().to_lowercase()),
            key: None,
            filter: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<KeySelector>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_filter(mut self, filter: ExportFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn with_options(mut self, options: &LocateOptions) -> Self {
        if options.key.is_some() {
            self.key = options.key.clone();
        }
        if options.filter.is_some() {
            self.filter = options.filter.clone();
        }
        self
    }

    pub fn export_type(&self) -> Option<&ExportType> {
        match &self.target {
            LocateTarget::Type(export_type) => Some(export_type),
            LocateTarget::Name(_) => None,
        }
    }

    /// Plain requests may be served by ambient exports and the primary fast path
    pub fn is_plain(&self) -> bool {
        self.key.is_none() && self.filter.is_none()
    }
}

/// Optional parts of a public locate call
#[derive(Clone, Default)]
pub struct LocateOptions {
    pub(crate) key: Option<KeySelector>,
    pub(crate) filter: Option<ExportFilter>,
    pub(crate) exports: Vec<(ExportType, Instance)>,
}

impl fmt::Debug for LocateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocateOptions")
            .field("key", &self.key)
            .field("filtered", &self.filter.is_some())
            .field("exports", &self.exports.len())
            .finish()
    }
}

impl LocateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<KeySelector>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&InjectionContext, &ExportStrategy) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Makes `value` available as `T` for the duration of the call
    pub fn with_export<T: Injectable>(self, value: T) -> Self {
        self.with_export_arc(Arc::new(value))
    }

    pub fn with_export_arc<T: ?Sized + Injectable>(mut self, value: Arc<T>) -> Self {
        self.exports
            .push((ExportType::of::<T>(), Instance::from_arc(value)));
        self
    }
}
