use std::{collections::HashSet, fmt};

use thiserror::Error;

use crate::{
    dependency::{DependencyInfo, DependencyTarget},
    export_type::{ExportType, TypePattern},
    scope::{Scope, ScopeId},
    strategy::{ExportStrategy, StrategyId},
    types::ExportKey,
};

/// Graph of every producer visible from one scope
///
/// Used to check for missing and circular dependencies without activating
/// anything, and to print what a scope can provide.
pub struct DependencyGraph {
    /// Nearest scope first, then in the order a request would pick them
    entries: Vec<DependencyGraphEntry>,
}

/// One producer and what it depends on
#[derive(Debug, Clone)]
pub struct DependencyGraphEntry {
    pub id: StrategyId,
    pub scope: ScopeId,
    pub activation_type: ExportType,
    pub exports: Vec<ExportType>,
    pub names: Vec<String>,
    pub key: Option<ExportKey>,
    pub lifestyle: &'static str,
    pub open_generic: bool,
    pub dependencies: Vec<DependencyInfo>,
}

impl DependencyGraphEntry {
    fn new(scope: ScopeId, strategy: &ExportStrategy) -> Self {
        DependencyGraphEntry {
            id: strategy.id(),
            scope,
            activation_type: strategy.activation_type().clone(),
            exports: strategy.export_types().cloned().collect(),
            names: strategy.export_names().to_vec(),
            key: strategy.key().cloned(),
            lifestyle: strategy.lifestyle_name(),
            open_generic: strategy.is_open_generic(),
            dependencies: strategy.dependencies().to_vec(),
        }
    }

    fn provides(&self, dependency: &DependencyInfo) -> bool {
        let key_matches = match (&dependency.key, &self.key) {
            (None, None) => true,
            (Some(selector), Some(key)) => selector.keys().contains(key),
            _ => false,
        };
        if !key_matches {
            return false;
        }

        match &dependency.target {
            DependencyTarget::Type(TypePattern::Exact(export_type)) => {
                self.exports.contains(export_type)
            }
            DependencyTarget::Type(_) => false,
            DependencyTarget::Name(name) => self.names.contains(name),
        }
    }
}

impl DependencyGraph {
    pub fn from_scope(scope: &Scope) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for scope in scope.ancestors() {
            let mut strategies = scope.strategies();
            strategies.sort_by(|a, b| {
                b.priority()
                    .cmp(&a.priority())
                    .then_with(|| b.id().cmp(&a.id()))
            });
            for strategy in strategies {
                if seen.insert(strategy.id()) {
                    entries.push(DependencyGraphEntry::new(scope.id(), &strategy));
                }
            }
        }

        DependencyGraph { entries }
    }

    pub fn entries(&self) -> &[DependencyGraphEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn providers<'a>(&'a self, dependency: &'a DependencyInfo) -> impl Iterator<Item = &'a DependencyGraphEntry> {
        self.entries.iter().filter(|entry| entry.provides(dependency))
    }

    /// Closed generic dependencies may still be served by an open export
    fn closable(&self, dependency: &DependencyInfo) -> bool {
        let DependencyTarget::Type(TypePattern::Exact(export_type)) = &dependency.target else {
            return false;
        };
        let Some(definition) = export_type.generic_definition() else {
            return false;
        };
        self.entries
            .iter()
            .any(|entry| entry.open_generic && entry.activation_type.generic_definition() == Some(definition))
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for entry in self.entries.iter().filter(|entry| !entry.open_generic) {
            let mut dependency_chain = Vec::new();
            check_recurse(self, &mut checked, &mut errors, &mut dependency_chain, entry);
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse<'a>(
            graph: &'a DependencyGraph,
            checked: &mut HashSet<StrategyId>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<&'a DependencyGraphEntry>,
            entry: &'a DependencyGraphEntry,
        ) {
            // Circular Dependency Check
            if dependency_chain.iter().any(|link| link.id == entry.id) {
                let mut chain: Vec<String> = dependency_chain
                    .iter()
                    .map(|link| link.activation_type.to_string())
                    .collect();
                chain.push(entry.activation_type.to_string()); // Add current so chain is complete

                errors.push(DependencyGraphError::CircularDependency {
                    from: chain.first().cloned().unwrap_or_default(),
                    to: entry.activation_type.to_string(),
                    chain,
                });
                return;
            }

            // Skip other checks if already checked
            if !checked.insert(entry.id) {
                return;
            };

            dependency_chain.push(entry);

            for dependency in &entry.dependencies {
                let mut providers = graph.providers(dependency).peekable();
                if providers.peek().is_none() {
                    if !dependency.optional && !dependency.many && !graph.closable(dependency) {
                        errors.push(DependencyGraphError::MissingDependency {
                            dependency: dependency.target.to_string(),
                            member: dependency.member,
                            required_by: entry.activation_type.to_string(),
                        });
                    }
                    continue;
                }

                if dependency.lazy {
                    // Don't recurse, this will be checked by itself
                    continue;
                }

                if dependency.many {
                    for provider in providers {
                        check_recurse(graph, checked, errors, dependency_chain, provider);
                    }
                } else if let Some(provider) = providers.next() {
                    check_recurse(graph, checked, errors, dependency_chain, provider);
                }
            }

            dependency_chain.pop();
        }
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} [{}] in scope {}", entry.activation_type, entry.lifestyle, entry.scope)?;
            if let Some(key) = &entry.key {
                write!(f, " keyed {key}")?;
            }
            writeln!(f)?;
            for dependency in &entry.dependencies {
                write!(f, "  -> {}", dependency.target)?;
                if dependency.optional {
                    f.write_str(" (optional)")?;
                }
                if dependency.lazy {
                    f.write_str(" (lazy)")?;
                }
                if dependency.many {
                    f.write_str(" (all)")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone)]
pub enum DependencyGraphError {
    #[error("'{required_by}' needs '{dependency}' for '{member}' but it is missing")]
    MissingDependency {
        dependency: String,
        member: &'static str,
        required_by: String,
    },
    #[error("A Circular Dependency exists between '{from}' and '{to}' through {chain:?} - Consider using `Lazy`")]
    CircularDependency {
        from: String,
        to: String,
        chain: Vec<String>,
    },
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyBuilder;

    struct Left;
    struct Right;

    #[test]
    fn finds_missing_and_circular_dependencies() {
        let root = Scope::root();
        root.configure(|registration| {
            registration
                .add(StrategyBuilder::delegate(|_| Ok(Left)).depends_on(DependencyInfo::of::<Right>()))
                .add(StrategyBuilder::delegate(|_| Ok(Right)).depends_on(DependencyInfo::of::<Left>()))
                .add(
                    StrategyBuilder::delegate(|_| Ok(1_u8))
                        .depends_on(DependencyInfo::of::<u64>())
                        .depends_on(DependencyInfo::of::<u32>().optional()),
                );
        })
        .unwrap();

        let errors = root.dependency_graph().check().unwrap_err().errors;
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|error| matches!(error, DependencyGraphError::CircularDependency { .. })));
        assert!(errors.iter().any(|error| matches!(
            error,
            DependencyGraphError::MissingDependency { dependency, .. } if dependency == "u64"
        )));
    }

    #[test]
    fn lazy_dependencies_break_cycles() {
        let root = Scope::root();
        root.configure(|registration| {
            registration
                .add(StrategyBuilder::delegate(|_| Ok(Left)).depends_on(DependencyInfo::of::<Right>()))
                .add(StrategyBuilder::delegate(|_| Ok(Right)).depends_on(DependencyInfo::of::<Left>().lazy()));
        })
        .unwrap();

        let graph = root.child().unwrap().dependency_graph();
        assert_eq!(graph.len(), 2);
        assert!(graph.check().is_ok());
        assert!(graph.to_string().contains("(lazy)"));
    }
}
