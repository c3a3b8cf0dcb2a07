use std::sync::Arc;

use crate::{
    context::InjectionContext,
    dependency::{DependencyInfo, DependencyTarget, Dependencies, Resolved},
    errors::{CompileError, LocateError, LocateErrorKind},
    export_type::TypePattern,
    handle::DiHandle,
    resolver::lazy::LazyExport,
    scope::Scope,
    strategy::{ActivationFn, Activator, DelegateFn, ExportStrategy},
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// A Factory providing instances of a given type
pub trait InstanceFactory: Send + Sync {
    type Provides: Injectable;

    /// Returns the typeinfo about the factory's provided type
    fn supplies() -> TypeInfo {
        TypeInfo::of::<Self::Provides>()
    }

    /// Returns a list of dependencies the factory requires to supply it's type
    ///
    /// They are resolved before `construct` is called.
    fn get_dependencies() -> Vec<DependencyInfo>;

    /// Constructs a new instance of the factory's provided type
    ///
    /// Returns the constructed instance, or an error if the Instantiation failed
    fn construct(&self, di: &mut DiHandle<'_>) -> Result<Self::Provides, impl Into<DynError>>;
}

/// Wrapper Trait for factories, providing instances of Any
pub trait DynFactory: Send + Sync {
    fn supplies(&self) -> TypeInfo;

    /// Returns a list of dependencies for the factory
    fn dependencies(&self) -> Vec<DependencyInfo>;

    /// Constructs a new instance of the factory's provided type
    fn construct(&self, di: &mut DiHandle<'_>) -> Result<Instance, DynError>;
}
// Impl DynFactory for any InstanceFactory
impl<T: Injectable, SpecificFactory: InstanceFactory<Provides = T>> DynFactory for SpecificFactory {
    fn supplies(&self) -> TypeInfo {
        SpecificFactory::supplies()
    }

    fn dependencies(&self) -> Vec<DependencyInfo> {
        SpecificFactory::get_dependencies()
    }

    fn construct(&self, di: &mut DiHandle<'_>) -> Result<Instance, DynError> {
        // Forward the call to the specific implementation
        SpecificFactory::construct(self, di)
            .map(Instance::new)
            .map_err(|e| e.into())
    }
}

/// Turns a producer's descriptors into its activation function
pub trait ActivationCompiler: Send + Sync {
    fn compile(&self, strategy: &ExportStrategy) -> Result<ActivationFn, CompileError>;
}

/// Resolves every declared dependency, then calls the producer's constructor
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorCompiler;

enum Construct {
    Delegate(DelegateFn),
    Factory(Arc<dyn DynFactory>),
}

impl ActivationCompiler for DescriptorCompiler {
    fn compile(&self, strategy: &ExportStrategy) -> Result<ActivationFn, CompileError> {
        let activation_type = strategy.activation_type().clone();

        for dependency in strategy.dependencies() {
            if dependency.is_open() {
                return Err(CompileError::UnboundParameter {
                    activation: activation_type.to_string(),
                    member: dependency.member,
                    pattern: dependency.target.to_string(),
                });
            }

            if let DependencyTarget::Type(TypePattern::Exact(target)) = &dependency.target {
                if target == &activation_type && !dependency.lazy {
                    return Err(CompileError::SelfDependency {
                        activation: activation_type.to_string(),
                        member: dependency.member,
                    });
                }
            }
        }

        let construct = match strategy.activator() {
            Activator::Instance(instance) => {
                let instance = instance.clone();
                return Ok(Arc::new(move |_: &Scope, _: &mut InjectionContext| {
                    Ok(instance.clone())
                }));
            }
            Activator::Delegate(delegate) => Construct::Delegate(delegate.clone()),
            Activator::Factory(factory) => Construct::Factory(factory.clone()),
            Activator::OpenGeneric { .. } => {
                return Err(CompileError::OpenGeneric(activation_type.to_string()))
            }
        };

        let dependencies = strategy.dependencies().to_vec();
        let activation_name = activation_type.to_string();

        Ok(Arc::new(move |scope: &Scope, context: &mut InjectionContext| {
            let resolved = resolve_dependencies(&dependencies, context)?;
            let scope_name = context.requesting_scope().display_name();

            let mut handle = DiHandle::new(scope, context, resolved, activation_type.clone());
            let result = match &construct {
                Construct::Delegate(delegate) => delegate(&mut handle),
                Construct::Factory(factory) => factory.construct(&mut handle),
            };

            result.map_err(|error| match error.downcast::<LocateError>() {
                // Nested resolution failures keep their own kind and path
                Ok(inner) => *inner,
                Err(error) => LocateErrorKind::ActivationFailed {
                    activation: activation_name.clone(),
                    scope: scope_name,
                    error: Arc::new(error),
                }
                .into(),
            })
        }))
    }
}

/// Resolves dependencies through the requesting scope
pub(crate) fn resolve_dependencies(
    dependencies: &[DependencyInfo],
    context: &mut InjectionContext,
) -> Result<Dependencies, LocateError> {
    let scope = context.requesting_scope().clone();
    let mut resolved = Dependencies::default();

    for dependency in dependencies {
        let Some(request) = dependency.request() else {
            return Err(LocateError::not_found(dependency.target.to_string()));
        };
        let location = scope.location(&request, Some(dependency.member));

        let value = if dependency.lazy {
            Resolved::Lazy(LazyExport::request(
                scope.clone(),
                request,
                dependency.optional,
            ))
        } else if dependency.many {
            Resolved::Many(
                scope
                    .locate_all_in(context, &request)
                    .map_err(|error| error.at(location))?,
            )
        } else {
            match scope.locate_in(context, &request) {
                Ok(Some(instance)) => Resolved::One(instance),
                Ok(None) if dependency.optional => Resolved::Missing,
                Ok(None) => return Err(LocateError::not_found(request.to_string()).at(location)),
                Err(error) => return Err(error.at(location)),
            }
        };

        resolved.push(dependency.member, value);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use crate::{errors::CompileError, strategy::StrategyBuilder};

    struct Answer(u32);
    struct AnswerFactory;
    impl InstanceFactory for AnswerFactory {
        type Provides = Answer;

        fn get_dependencies() -> Vec<DependencyInfo> {
            vec![DependencyInfo::of::<u32>().member("base")]
        }

        fn construct(&self, di: &mut DiHandle<'_>) -> Result<Self::Provides, Infallible> {
            let base = di.dependencies().get::<u32>("base").map(|base| *base).unwrap_or(0);
            Ok(Answer(base + 1))
        }
    }

    #[test]
    fn dyn_factory_forwards_to_instance_factory() {
        let factory: Arc<dyn DynFactory> = Arc::new(AnswerFactory);
        assert_eq!(factory.supplies(), TypeInfo::of::<Answer>());
        assert_eq!(factory.dependencies()[0].member, "base");
    }

    #[test]
    fn self_dependencies_need_lazy() {
        let strategy = StrategyBuilder::delegate(|_| Ok(1_u8))
            .depends_on(DependencyInfo::of::<u8>())
            .build()
            .unwrap();
        assert!(matches!(
            DescriptorCompiler.compile(&strategy),
            Err(CompileError::SelfDependency { .. })
        ));

        let strategy = StrategyBuilder::delegate(|_| Ok(1_u8))
            .depends_on(DependencyInfo::of::<u8>().lazy())
            .build()
            .unwrap();
        assert!(DescriptorCompiler.compile(&strategy).is_ok());
    }

    #[test]
    fn open_generics_are_not_compiled() {
        let strategy = StrategyBuilder::open_generic(crate::export_type::GenericDef::new("Box", 1))
            .build()
            .unwrap();
        assert!(matches!(
            DescriptorCompiler.compile(&strategy),
            Err(CompileError::OpenGeneric(_))
        ));
    }
}
