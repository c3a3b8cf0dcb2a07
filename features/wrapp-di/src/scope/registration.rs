use crate::{
    errors::ConfigureError,
    factories::InstanceFactory,
    handle::DiHandle,
    strategy::{ExportStrategy, StrategyBuilder},
    types::{DynError, Injectable},
};

/// Collects producers to register together
///
/// Nothing is registered unless every producer in the block is valid.
#[derive(Default)]
pub struct RegistrationBlock {
    builders: Vec<StrategyBuilder>,
    strategies: Vec<ExportStrategy>,
}

impl std::fmt::Debug for RegistrationBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationBlock")
            .field("pending", &(self.builders.len() + self.strategies.len()))
            .finish()
    }
}

impl RegistrationBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, builder: StrategyBuilder) -> &mut Self {
        self.builders.push(builder);
        self
    }

    /// A producer built elsewhere, e.g. by hand with [`ExportStrategy`] mutators
    pub fn add_strategy(&mut self, strategy: ExportStrategy) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    pub fn instance<T: Injectable>(&mut self, value: T) -> &mut Self {
        self.add(StrategyBuilder::instance(value))
    }

    pub fn factory<F: InstanceFactory + 'static>(&mut self, factory: F) -> &mut Self {
        self.add(StrategyBuilder::factory(factory))
    }

    pub fn delegate<T, F>(&mut self, delegate: F) -> &mut Self
    where
        T: Injectable,
        F: Fn(&mut DiHandle<'_>) -> Result<T, DynError> + Send + Sync + 'static,
    {
        self.add(StrategyBuilder::delegate(delegate))
    }

    pub fn len(&self) -> usize {
        self.builders.len() + self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds every pending producer, reporting all failures at once
    pub fn finish(self) -> Result<Vec<ExportStrategy>, ConfigureError> {
        let RegistrationBlock {
            builders,
            mut strategies,
        } = self;

        let mut errors = Vec::new();
        for builder in builders {
            match builder.build() {
                Ok(strategy) => strategies.push(strategy),
                Err(error) => errors.push(error),
            }
        }

        match errors.len() {
            0 => Ok(strategies),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigureError::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_collects_every_error() {
        let mut block = RegistrationBlock::new();
        block
            .instance(1_u8)
            .add(StrategyBuilder::instance(2_u8).export_name(""))
            .add(StrategyBuilder::instance(3_u8).export_name("  "));
        assert_eq!(block.len(), 3);

        match block.finish() {
            Err(ConfigureError::Aggregate(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }
}
