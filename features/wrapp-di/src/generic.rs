use std::sync::Arc;

use crate::{
    errors::ClosingError,
    export_type::{ExportType, TypeConstraint},
    scope::Scope,
    strategy::{Activator, ExportAs, ExportStrategy},
};

impl Scope {
    /// Closes this scope's open generic exports for `requested`
    ///
    /// Every open export of the requested definition is closed at most once
    /// per argument list. Returns true if a new producer was registered.
    pub(crate) fn close_generic(&self, requested: &ExportType) -> bool {
        let Some(definition) = requested.generic_definition() else {
            return false;
        };
        let Some(open_exports) = self.open_generic_collection(&definition) else {
            return false;
        };

        let mut added = false;
        for open in open_exports.all_strategies() {
            let closed_before = self
                .strategy_collection(requested, false)
                .is_some_and(|collection| collection.contains_created_by(open.id()));
            if closed_before {
                continue;
            }

            let registered = close_strategy(self, &open, requested)
                .and_then(|closed| Ok(self.register_closed(closed, requested)?));
            match registered {
                Ok(true) => {
                    tracing::debug!(
                        "Closed {} for {requested} in scope {}",
                        open.activation_type(),
                        self.display_name()
                    );
                    added = true;
                }
                Ok(false) => {}
                Err(error) => tracing::warn!("Could not close {requested}: {error}"),
            }
        }
        added
    }
}

/// Builds the closed producer of `open` for `requested`
fn close_strategy(
    scope: &Scope,
    open: &ExportStrategy,
    requested: &ExportType,
) -> Result<ExportStrategy, ClosingError> {
    let (definition, arguments) = match requested.generic_definition() {
        Some(definition) => (definition, requested.type_arguments()),
        None => return Err(ClosingError::NoConstructor(requested.clone())),
    };

    if arguments.len() != definition.arity {
        return Err(ClosingError::ArityMismatch {
            definition,
            expected: definition.arity,
            actual: arguments.len(),
        });
    }

    for (parameter, constraint) in open.constraints() {
        let Some(argument) = arguments.get(*parameter) else {
            continue;
        };
        if !satisfies(scope, constraint, argument) {
            return Err(ClosingError::ConstraintViolated {
                definition,
                argument: argument.clone(),
                constraint: format!("{constraint:?}"),
            });
        }
    }

    let activator = match open.activator() {
        Activator::OpenGeneric {
            delegate: Some(delegate),
            ..
        } => Activator::Delegate(delegate.clone()),
        Activator::OpenGeneric { delegate: None, .. } => match requested.constructor() {
            Some(constructor) => Activator::Delegate(Arc::new(constructor)),
            None => return Err(ClosingError::NoConstructor(requested.clone())),
        },
        _ => return Err(ClosingError::NoConstructor(requested.clone())),
    };

    let dependencies = open
        .dependencies()
        .iter()
        .map(|dependency| {
            dependency
                .close(arguments)
                .ok_or_else(|| ClosingError::Substitution {
                    definition,
                    pattern: dependency.target.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let exports = open
        .generic_exports()
        .iter()
        .map(|export| ExportAs {
            export_type: if *export == definition {
                requested.clone()
            } else {
                ExportType::constructed(*export, arguments.to_vec())
            },
            cast: None,
        })
        .collect();

    Ok(ExportStrategy::from_parts(
        requested.clone(),
        activator,
        exports,
        Vec::new(),
        Vec::new(),
        open.key().cloned(),
        open.priority(),
        open.lifestyle().map(|lifestyle| lifestyle.clone_lifestyle()),
        open.conditions().to_vec(),
        open.enrichers().to_vec(),
        dependencies,
        Vec::new(),
        open.is_externally_owned(),
        open.allows_filtering(),
        open.produces_disposable(),
        open.metadata().clone(),
        Some(open.id()),
    ))
}

fn satisfies(scope: &Scope, constraint: &TypeConstraint, argument: &ExportType) -> bool {
    match constraint {
        TypeConstraint::OneOf(types) => types.contains(argument),
        TypeConstraint::Native => argument.native().is_some(),
        TypeConstraint::Constructed(definition) => {
            argument.generic_definition() == Some(*definition)
        }
        TypeConstraint::Locatable => scope.can_locate(argument, None),
        TypeConstraint::Custom { check, .. } => check(argument),
    }
}
