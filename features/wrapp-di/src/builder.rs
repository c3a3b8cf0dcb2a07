use std::sync::Arc;

use crate::{
    config::KernelConfig,
    errors::ConfigureError,
    extension::{ExportStrategyInspector, MissingExportStrategyProvider, SecondaryExportLocator},
    factories::{ActivationCompiler, InstanceFactory},
    handle::DiHandle,
    scope::{RegistrationBlock, Scope},
    strategy::StrategyBuilder,
    types::{DynError, Injectable},
};

type NamedRegistration = Box<dyn Fn(&mut RegistrationBlock) + Send + Sync>;
/// Installs an extension on the root scope once it exists
type Extension = Box<dyn FnOnce(&Scope)>;

//////////////////////////////////////////////////////////////////////
///
/// The kernel consists of three parts.
/// 1. The KernelBuilder where one registers all producers and extensions
/// 2. The root scope it builds, which resolves on demand
/// 3. Child scopes created from the root for shorter lived work

pub struct KernelBuilder {
    config: KernelConfig,
    registration: RegistrationBlock,
    named: Vec<(String, NamedRegistration)>,
    extensions: Vec<Extension>,
}
impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        KernelBuilder {
            config: KernelConfig::default(),
            registration: RegistrationBlock::new(),
            named: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn throw_on_failure(mut self, throw: bool) -> Self {
        self.config.throw_on_failure = throw;
        self
    }

    pub fn auto_register_unknown(mut self, enabled: bool) -> Self {
        self.config.auto_register_unknown = enabled;
        self
    }

    pub fn max_resolution_depth(mut self, depth: usize) -> Self {
        self.config.max_resolution_depth = depth;
        self
    }

    pub fn compiler(mut self, compiler: impl ActivationCompiler + 'static) -> Self {
        self.config.compiler = Arc::new(compiler);
        self
    }
}

impl KernelBuilder {
    pub fn add_instance<T: Injectable>(mut self, instance: T) -> Self {
        self.registration.instance(instance);
        self
    }

    pub fn add_factory<Factory: InstanceFactory + 'static>(mut self, factory: Factory) -> Self {
        self.registration.factory(factory);
        self
    }

    pub fn add_delegate<T, F>(mut self, delegate: F) -> Self
    where
        T: Injectable,
        F: Fn(&mut DiHandle<'_>) -> Result<T, DynError> + Send + Sync + 'static,
    {
        self.registration.delegate(delegate);
        self
    }

    pub fn add(mut self, builder: StrategyBuilder) -> Self {
        self.registration.add(builder);
        self
    }

    /// Registrations of every child scope created with `name`
    pub fn named_scope(
        mut self,
        name: &str,
        registration: impl Fn(&mut RegistrationBlock) + Send + Sync + 'static,
    ) -> Self {
        self.named.push((name.to_string(), Box::new(registration)));
        self
    }

    /// Sees every producer registered anywhere in the kernel
    pub fn add_inspector(mut self, inspector: impl ExportStrategyInspector + 'static) -> Self {
        self.extensions
            .push(Box::new(move |root: &Scope| root.manager().add_inspector(inspector)));
        self
    }

    pub fn add_secondary_locator(mut self, locator: impl SecondaryExportLocator + 'static) -> Self {
        self.extensions
            .push(Box::new(move |root: &Scope| root.add_secondary_locator(locator)));
        self
    }

    pub fn add_missing_export_provider(
        mut self,
        provider: impl MissingExportStrategyProvider + 'static,
    ) -> Self {
        self.extensions
            .push(Box::new(move |root: &Scope| root.add_missing_export_provider(provider)));
        self
    }

    /// Builds the root scope
    ///
    /// Nothing is activated here. Problems the dependency graph reveals are
    /// logged, they may still be solved on demand.
    pub fn build(self) -> Result<Scope, ConfigureError> {
        let KernelBuilder {
            config,
            registration,
            named,
            extensions,
        } = self;

        tracing::debug!(
            "Building kernel with {} registrations and {} named scopes",
            registration.len(),
            named.len()
        );

        let root = Scope::with_config(config);
        for install in extensions {
            install(&root);
        }
        for (name, registration) in named {
            root.manager().configure_named_scope(&name, registration);
        }

        root.register(registration.finish()?)?;

        if let Err(errors) = root.dependency_graph().check() {
            tracing::warn!("{errors}");
        }
        Ok(root)
    }
}
