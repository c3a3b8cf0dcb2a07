use crate::{
    context::InjectionContext,
    dependency::Dependencies,
    errors::LocateError,
    export_type::ExportType,
    request::LocateRequest,
    resolver::Resolver,
    scope::Scope,
    types::Instance,
};

/// Passed to constructors, used to resolve what they need
///
/// Declared dependencies are already resolved and available through
/// [`DiHandle::dependencies`], anything else can be resolved on demand.
pub struct DiHandle<'a> {
    scope: &'a Scope,
    context: &'a mut InjectionContext,
    dependencies: Dependencies,
    activation_type: ExportType,
}

impl<'a> DiHandle<'a> {
    pub(crate) fn new(
        scope: &'a Scope,
        context: &'a mut InjectionContext,
        dependencies: Dependencies,
        activation_type: ExportType,
    ) -> Self {
        DiHandle {
            scope,
            context,
            dependencies,
            activation_type,
        }
    }

    /// The scope the producer was found in
    pub fn scope(&self) -> &Scope {
        self.scope
    }

    /// The scope the resolution started from
    pub fn requesting_scope(&self) -> &Scope {
        self.context.requesting_scope()
    }

    pub fn context(&mut self) -> &mut InjectionContext {
        self.context
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn activation_type(&self) -> &ExportType {
        &self.activation_type
    }

    /// Arguments of the closed generic type being built
    pub fn type_arguments(&self) -> &[ExportType] {
        self.activation_type.type_arguments()
    }

    pub fn resolve<R: Resolver>(&mut self) -> Result<R, LocateError> {
        R::resolve(self)
    }

    /// Resolves through the requesting scope, sharing this resolution's context
    pub fn locate(&mut self, request: &LocateRequest) -> Result<Option<Instance>, LocateError> {
        let scope = self.context.requesting_scope().clone();
        scope.locate_in(self.context, request)
    }

    pub fn locate_all(&mut self, request: &LocateRequest) -> Result<Vec<Instance>, LocateError> {
        let scope = self.context.requesting_scope().clone();
        scope.locate_all_in(self.context, request)
    }
}
