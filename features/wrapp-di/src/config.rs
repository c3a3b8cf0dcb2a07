use std::{fmt::Debug, sync::Arc};

use crate::factories::{ActivationCompiler, DescriptorCompiler};

/// Kernel wide settings, shared by a root scope and all its descendants
#[derive(Clone)]
pub struct KernelConfig {
    /// Resolution failures surface as errors, otherwise they are logged and
    /// treated as "not found"
    pub throw_on_failure: bool,
    /// The root scope registers unknown `Constructible` types on demand
    pub auto_register_unknown: bool,
    /// Upper bound for nested activations in one resolution
    pub max_resolution_depth: usize,
    /// Turns dependency descriptors into activation functions
    pub compiler: Arc<dyn ActivationCompiler>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            throw_on_failure: true,
            auto_register_unknown: true,
            max_resolution_depth: 100,
            compiler: Arc::new(DescriptorCompiler),
        }
    }
}

impl Debug for KernelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelConfig")
            .field("throw_on_failure", &self.throw_on_failure)
            .field("auto_register_unknown", &self.auto_register_unknown)
            .field("max_resolution_depth", &self.max_resolution_depth)
            .finish_non_exhaustive()
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throw_on_failure(mut self, throw: bool) -> Self {
        self.throw_on_failure = throw;
        self
    }

    pub fn auto_register_unknown(mut self, enabled: bool) -> Self {
        self.auto_register_unknown = enabled;
        self
    }

    pub fn max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }

    pub fn compiler(mut self, compiler: impl ActivationCompiler + 'static) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }
}
