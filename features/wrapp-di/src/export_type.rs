use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    handle::DiHandle,
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// Monomorphized construction code carried by a typed request
pub type RequestConstructor = fn(&mut DiHandle<'_>) -> Result<Instance, DynError>;

/// An open generic definition, e.g. `Repository<_>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericDef {
    pub name: &'static str,
    pub arity: usize,
}
impl GenericDef {
    pub const fn new(name: &'static str, arity: usize) -> Self {
        GenericDef { name, arity }
    }
}
impl fmt::Display for GenericDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = vec!["_"; self.arity];
        write!(f, "{}<{}>", self.name, params.join(", "))
    }
}

/// Implemented by generic types which can be produced by open generic exports
///
/// Generic types are identified by their definition and arguments, not by
/// their `TypeId`, so they have to be requested with `locate_generic`.
pub trait Generic: Injectable + Sized {
    const DEFINITION: GenericDef;

    fn arguments() -> Vec<ExportType>;

    /// Builds the closed value - dependencies declared on the open export
    /// are already resolved on the handle
    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError>;
}

/// Implemented by concrete types the root scope may register on demand
pub trait Constructible: Injectable + Sized {
    fn construct(di: &mut DiHandle<'_>) -> Result<Self, DynError>;
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Identity {
    Native(TypeInfo),
    Constructed(Arc<Constructed>),
}

#[derive(PartialEq, Eq, Hash)]
struct Constructed {
    definition: GenericDef,
    arguments: Vec<ExportType>,
}

/// A contract which can be exported and requested
#[derive(Clone)]
pub struct ExportType {
    identity: Identity,
    constructor: Option<RequestConstructor>,
}

impl PartialEq for ExportType {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}
impl Eq for ExportType {}
impl Hash for ExportType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state)
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::Native(info) => f.write_str(info.type_name),
            Identity::Constructed(constructed) => {
                let arguments: Vec<String> =
                    constructed.arguments.iter().map(ToString::to_string).collect();
                write!(f, "{}<{}>", constructed.definition.name, arguments.join(", "))
            }
        }
    }
}
impl fmt::Debug for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExportType({self})")
    }
}

impl ExportType {
    pub fn of<T: ?Sized + 'static>() -> ExportType {
        ExportType {
            identity: Identity::Native(TypeInfo::of::<T>()),
            constructor: None,
        }
    }

    /// A concrete type which may be auto-registered
    pub fn constructible<T: Constructible>() -> ExportType {
        ExportType {
            identity: Identity::Native(TypeInfo::of::<T>()),
            constructor: Some(construct_erased::<T>),
        }
    }

    /// A closed generic type, carrying its own construction code
    pub fn generic<T: Generic>() -> ExportType {
        ExportType {
            identity: Identity::Constructed(Arc::new(Constructed {
                definition: T::DEFINITION,
                arguments: T::arguments(),
            })),
            constructor: Some(construct_generic_erased::<T>),
        }
    }

    /// A closed generic type built at runtime - it can only be produced by an
    /// open export which brings its own generic delegate
    pub fn constructed(definition: GenericDef, arguments: Vec<ExportType>) -> ExportType {
        ExportType {
            identity: Identity::Constructed(Arc::new(Constructed {
                definition,
                arguments,
            })),
            constructor: None,
        }
    }

    pub fn native(&self) -> Option<TypeInfo> {
        match &self.identity {
            Identity::Native(info) => Some(*info),
            Identity::Constructed(_) => None,
        }
    }

    pub fn generic_definition(&self) -> Option<GenericDef> {
        match &self.identity {
            Identity::Native(_) => None,
            Identity::Constructed(constructed) => Some(constructed.definition),
        }
    }

    pub fn type_arguments(&self) -> &[ExportType] {
        match &self.identity {
            Identity::Native(_) => &[],
            Identity::Constructed(constructed) => &constructed.arguments,
        }
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.identity, Identity::Constructed(_))
    }

    pub fn constructor(&self) -> Option<RequestConstructor> {
        self.constructor
    }

    /// Same identity, with the given construction code
    pub fn with_constructor(mut self, constructor: RequestConstructor) -> ExportType {
        self.constructor = Some(constructor);
        self
    }
}

fn construct_erased<T: Constructible>(di: &mut DiHandle<'_>) -> Result<Instance, DynError> {
    T::construct(di).map(Instance::new)
}

fn construct_generic_erased<T: Generic>(di: &mut DiHandle<'_>) -> Result<Instance, DynError> {
    T::construct(di).map(Instance::new)
}

/// A type in a dependency descriptor, possibly referring to type parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePattern {
    Exact(ExportType),
    /// The n-th type argument of the closed type
    Parameter(usize),
    Constructed(GenericDef, Vec<TypePattern>),
}

impl TypePattern {
    pub fn is_open(&self) -> bool {
        match self {
            TypePattern::Exact(_) => false,
            TypePattern::Parameter(_) => true,
            TypePattern::Constructed(_, arguments) => arguments.iter().any(TypePattern::is_open),
        }
    }

    /// Substitutes type parameters with the given arguments
    pub fn close(&self, arguments: &[ExportType]) -> Option<ExportType> {
        match self {
            TypePattern::Exact(export_type) => Some(export_type.clone()),
            TypePattern::Parameter(index) => arguments.get(*index).cloned(),
            TypePattern::Constructed(definition, patterns) => {
                let closed = patterns
                    .iter()
                    .map(|pattern| pattern.close(arguments))
                    .collect::<Option<Vec<_>>>()?;
                Some(ExportType::constructed(*definition, closed))
            }
        }
    }

    /// Returns the exact type, if the pattern has no parameters
    pub fn exact(&self) -> Option<ExportType> {
        match self {
            TypePattern::Exact(export_type) => Some(export_type.clone()),
            other => other.close(&[]),
        }
    }
}
impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypePattern::Exact(export_type) => write!(f, "{export_type}"),
            TypePattern::Parameter(index) => write!(f, "T{index}"),
            TypePattern::Constructed(definition, arguments) => {
                let arguments: Vec<String> = arguments.iter().map(ToString::to_string).collect();
                write!(f, "{}<{}>", definition.name, arguments.join(", "))
            }
        }
    }
}
impl From<ExportType> for TypePattern {
    fn from(value: ExportType) -> Self {
        TypePattern::Exact(value)
    }
}

/// Constraint on one type parameter of an open generic export
#[derive(Clone)]
pub enum TypeConstraint {
    /// The argument must be one of these types
    OneOf(Vec<ExportType>),
    /// The argument must be a native Rust type
    Native,
    /// The argument must itself be a closed form of this definition
    Constructed(GenericDef),
    /// The argument must be resolvable from the closing scope
    Locatable,
    Custom {
        name: &'static str,
        check: Arc<dyn Fn(&ExportType) -> bool + Send + Sync>,
    },
}
impl TypeConstraint {
    pub fn custom(
        name: &'static str,
        check: impl Fn(&ExportType) -> bool + Send + Sync + 'static,
    ) -> Self {
        TypeConstraint::Custom {
            name,
            check: Arc::new(check),
        }
    }
}
impl fmt::Debug for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeConstraint::OneOf(types) => f.debug_tuple("OneOf").field(types).finish(),
            TypeConstraint::Native => f.write_str("Native"),
            TypeConstraint::Constructed(definition) => {
                f.debug_tuple("Constructed").field(definition).finish()
            }
            TypeConstraint::Locatable => f.write_str("Locatable"),
            TypeConstraint::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: GenericDef = GenericDef::new("Box", 1);
    const PAIR: GenericDef = GenericDef::new("Pair", 2);

    #[test]
    fn identity_ignores_constructor() {
        fn noop(_: &mut DiHandle<'_>) -> Result<Instance, DynError> {
            Ok(Instance::new(()))
        }
        let plain = ExportType::of::<u8>();
        let with_constructor = ExportType::of::<u8>().with_constructor(noop);
        assert_eq!(plain, with_constructor);
        assert!(with_constructor.constructor().is_some());
    }

    #[test]
    fn constructed_types_compare_by_definition_and_arguments() {
        let a = ExportType::constructed(BOX, vec![ExportType::of::<u8>()]);
        let b = ExportType::constructed(BOX, vec![ExportType::of::<u8>()]);
        let c = ExportType::constructed(BOX, vec![ExportType::of::<u16>()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "Box<u8>");
        assert_eq!(a.generic_definition(), Some(BOX));
    }

    #[test]
    fn closes_nested_patterns() {
        let pattern = TypePattern::Constructed(
            PAIR,
            vec![
                TypePattern::Parameter(1),
                TypePattern::Constructed(BOX, vec![TypePattern::Parameter(0)]),
            ],
        );
        assert!(pattern.is_open());

        let closed = pattern
            .close(&[ExportType::of::<u8>(), ExportType::of::<String>()])
            .unwrap();
        assert_eq!(closed.to_string(), "Pair<alloc::string::String, Box<u8>>");

        assert!(pattern.close(&[ExportType::of::<u8>()]).is_none());
        assert!(pattern.exact().is_none());
    }
}
