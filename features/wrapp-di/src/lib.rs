//! Runtime dependency resolution
//!
//! Producers are registered in scopes. A request walks from the scope it was
//! made in up to the root, activating the best matching producer and
//! everything it depends on.
//!
//! ```ignore
//! let root = KernelBuilder::new()
//!     .add_instance(Config::default())
//!     .add(StrategyBuilder::factory(ServiceFactory).singleton())
//!     .build()?;
//!
//! let request = root.create_child_scope(ChildScopeOptions::new().name("request"))?;
//! let service = request.locate::<Service>()?;
//! ```

mod builder;
mod collection;
mod condition;
mod config;
mod context;
mod dependency;
mod dependency_graph;
mod disposal;
mod errors;
mod export_type;
mod extension;
mod factories;
mod generic;
mod handle;
mod lifestyle;
mod metadata;
mod request;
mod resolver;
mod scope;
mod strategy;
mod types;

pub use builder::KernelBuilder;
pub use collection::{Located, StrategyCollection};
pub use condition::{Condition, ExportCondition, WhenInScopeNamed, WhenInjectedInto, WhenMetadata};
pub use config::KernelConfig;
pub use context::{ActivationFrame, InjectionContext};
pub use dependency::{Dependencies, DependencyError, DependencyInfo, DependencyTarget, Resolved};
pub use dependency_graph::{
    DependencyGraph, DependencyGraphEntry, DependencyGraphError, DependencyGraphErrors,
};
pub use disposal::{Disposable, DisposalScope};
pub use errors::{
    ClosingError, CompileError, ConfigureError, LocateError, LocateErrorKind, LocationEntry,
    LocationTrail,
};
pub use export_type::{
    Constructible, ExportType, Generic, GenericDef, RequestConstructor, TypeConstraint, TypePattern,
};
pub use extension::{
    ExportStrategyInspector, MissingExportStrategyProvider, SecondaryExportLocator,
    ShapeStrategyProvider, WrapperShapes,
};
pub use factories::{ActivationCompiler, DescriptorCompiler, DynFactory, InstanceFactory};
pub use handle::DiHandle;
pub use lifestyle::{
    Lifestyle, SingletonLifestyle, SingletonPerAncestorLifestyle, SingletonPerNamedScopeLifestyle,
    SingletonPerScopeLifestyle, WeakSingletonLifestyle,
};
pub use metadata::{MetaValue, Metadata};
pub use request::{ExportFilter, LocateOptions, LocateRequest, LocateTarget};
pub use resolver::{
    lazy::{Lazy, LazyExport, LazyOption, LAZY},
    wrappers::{All, Meta, Owned, ALL, META, OWNED},
    Resolver,
};
pub use scope::{ChildScopeOptions, RegistrationBlock, Scope, ScopeId, ScopeManager, WeakScope};
pub use strategy::{
    ActivationFn, Activator, DelegateFn, EnrichFn, ExportAs, ExportStrategy, StrategyBuilder,
    StrategyId,
};
pub use types::{CastFn, DynError, ExportKey, Injectable, Instance, KeySelector, TypeInfo, WeakInstance};
