use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{
    export_type::{ExportType, GenericDef},
    scope::ScopeId,
    types::DynError,
};

/// One step of a resolution path, recorded while an error unwinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEntry {
    pub scope_id: ScopeId,
    pub scope_name: Option<Arc<str>>,
    /// What was requested at this step
    pub request: String,
    /// The dependency member being resolved, if the step was a dependency
    pub member: Option<&'static str>,
    pub keyed: bool,
    pub filtered: bool,
}
impl fmt::Display for LocationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope_name {
            Some(name) => write!(f, "scope '{name}' ({})", self.scope_id)?,
            None => write!(f, "scope {}", self.scope_id)?,
        }
        write!(f, " requesting '{}'", self.request)?;
        if let Some(member) = self.member {
            write!(f, " for member '{member}'")?;
        }
        if self.keyed {
            f.write_str(" [keyed]")?;
        }
        if self.filtered {
            f.write_str(" [filtered]")?;
        }
        Ok(())
    }
}

/// The resolution path of an error, innermost step first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationTrail(pub Vec<LocationEntry>);
impl fmt::Display for LocationTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.0 {
            write!(f, "\n- {entry}")?;
        }
        Ok(())
    }
}

/// A failed resolution with the path it took
#[derive(Error, Debug, Clone)]
#[error("{kind}{locations}")]
pub struct LocateError {
    pub kind: LocateErrorKind,
    pub locations: LocationTrail,
}

impl LocateError {
    pub fn new(kind: LocateErrorKind) -> Self {
        LocateError {
            kind,
            locations: LocationTrail::default(),
        }
    }

    pub fn not_found(request: impl Into<String>) -> Self {
        Self::new(LocateErrorKind::NotFound(request.into()))
    }

    /// Appends a step to the resolution path
    pub fn at(mut self, entry: LocationEntry) -> Self {
        self.locations.0.push(entry);
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, LocateErrorKind::NotFound(_))
    }
}

impl From<LocateErrorKind> for LocateError {
    fn from(kind: LocateErrorKind) -> Self {
        LocateError::new(kind)
    }
}

impl From<CompileError> for LocateError {
    fn from(error: CompileError) -> Self {
        LocateError::new(LocateErrorKind::CompileFailed(error))
    }
}

#[derive(Error, Debug, Clone)]
pub enum LocateErrorKind {
    /// Nothing in the scope chain could satisfy a required request
    #[error("No export satisfies the required '{0}'")]
    NotFound(String),
    /// A producer's constructor failed
    #[error("Activation of '{activation}' failed in scope '{scope}' - error: {error}")]
    ActivationFailed {
        activation: String,
        scope: String,
        error: Arc<DynError>,
    },
    /// A producer could not be compiled
    #[error(transparent)]
    CompileFailed(#[from] CompileError),
    #[error("Circular dependency while activating '{activation}' through {chain:?} - Consider using `Lazy`")]
    CircularDependency {
        activation: String,
        chain: Vec<String>,
    },
    #[error("Resolution exceeded the maximum depth of {0}")]
    DepthExceeded(usize),
    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    #[error("Scope '{0}' has been disposed")]
    ScopeDisposed(String),
}

/// A producer's activation could not be compiled
///
/// Compilation is deferred until first use, this error is cached and
/// returned on every activation attempt.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("'{activation}' depends on unbound type parameter '{pattern}' through '{member}'")]
    UnboundParameter {
        activation: String,
        member: &'static str,
        pattern: String,
    },
    #[error("'{activation}' depends on itself through '{member}' - Consider using `Lazy`")]
    SelfDependency {
        activation: String,
        member: &'static str,
    },
    #[error("'{0}' is an open generic export and cannot be activated directly")]
    OpenGeneric(String),
    #[error("'{activation}' in scope '{scope}' could not be compiled - error: {reason}")]
    Rejected {
        activation: String,
        scope: String,
        reason: String,
    },
}

/// Errors raised synchronously while configuring a scope
#[derive(Error, Debug, Clone)]
pub enum ConfigureError {
    #[error("Export '{0}' is initialized and can no longer be changed")]
    StrategyLocked(String),
    #[error("'{activation}' cannot be exported as '{export}'")]
    UnsatisfiableExport { activation: String, export: String },
    #[error("'{0}' is disposable and cannot use a weak singleton lifestyle")]
    WeakDisposable(String),
    #[error("Invalid export name '{0}'")]
    InvalidName(String),
    #[error("Open generic export for '{definition}' is invalid: {reason}")]
    OpenGeneric {
        definition: GenericDef,
        reason: String,
    },
    #[error("Inspector rejected '{activation}' - error: {error}")]
    Inspector {
        activation: String,
        error: Arc<DynError>,
    },
    #[error("Scope '{0}' has been disposed")]
    ScopeDisposed(String),
    #[error("{}", display_aggregate(.0))]
    Aggregate(Vec<ConfigureError>),
}

fn display_aggregate(errors: &[ConfigureError]) -> String {
    let mut display = vec!["The registration had one or more errors:".to_string()];
    for error in errors {
        display.push(format!("- {error}"));
    }
    display.join("\n")
}

/// Why a generic closing attempt failed
///
/// Closing is speculative, these are logged and treated as "not found".
#[derive(Error, Debug, Clone)]
pub enum ClosingError {
    #[error("'{definition}' expects {expected} type arguments, got {actual}")]
    ArityMismatch {
        definition: GenericDef,
        expected: usize,
        actual: usize,
    },
    #[error("Type argument '{argument}' violates constraint {constraint} of '{definition}'")]
    ConstraintViolated {
        definition: GenericDef,
        argument: ExportType,
        constraint: String,
    },
    #[error("Type parameter '{pattern}' of '{definition}' could not be substituted")]
    Substitution {
        definition: GenericDef,
        pattern: String,
    },
    #[error("Neither the open export nor the request for '{0}' provides a constructor")]
    NoConstructor(ExportType),
    #[error(transparent)]
    Registration(#[from] ConfigureError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_renders_every_step() {
        let error = LocateError::not_found("u32")
            .at(LocationEntry {
                scope_id: ScopeId(2),
                scope_name: Some("request".into()),
                request: "u32".into(),
                member: None,
                keyed: true,
                filtered: false,
            })
            .at(LocationEntry {
                scope_id: ScopeId(1),
                scope_name: None,
                request: "Service".into(),
                member: Some("counter"),
                keyed: false,
                filtered: false,
            });

        let rendered = error.to_string();
        assert!(rendered.starts_with("No export satisfies the required 'u32'"));
        assert!(rendered.contains("- scope 'request' (#2) requesting 'u32' [keyed]"));
        assert!(rendered.contains("- scope #1 requesting 'Service' for member 'counter'"));
    }

    #[test]
    fn aggregate_lists_all_errors() {
        let error = ConfigureError::Aggregate(vec![
            ConfigureError::InvalidName(String::new()),
            ConfigureError::WeakDisposable("Pool".into()),
        ]);
        let rendered = error.to_string();
        assert!(rendered.contains("- Invalid export name ''"));
        assert!(rendered.contains("- 'Pool' is disposable"));
    }
}
