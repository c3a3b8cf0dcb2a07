use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use crate::disposal::Disposable;

/// All errors must be Send + Sync, they can cross scope boundaries on any thread
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Resolution can happen from any thread at any time
/// So anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// A produced value
///
/// The value is stored as an `Arc<T>` behind `dyn Any`, which allows
/// unsized contracts such as `dyn Service` to travel through the kernel.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
    /// Address of the shared value, used for identity comparisons only
    identity: usize,
    disposable: Option<Arc<dyn Disposable>>,
    downgrade: fn(&Instance) -> Option<WeakInstance>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.info.type_name)
            .field("disposable", &self.disposable.is_some())
            .finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    /// Wraps an existing shared value, keeping its identity
    pub fn from_arc<T: ?Sized + Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            identity: Arc::as_ptr(&instance) as *const () as usize,
            value: Arc::new(instance),
            disposable: None,
            downgrade: downgrade_erased::<T>,
        }
    }

    /// Creates an instance which the kernel will dispose when its owner goes away
    pub fn disposable<T: Injectable + Disposable>(instance: T) -> Self {
        let shared = Arc::new(instance);
        let mut created = Self::from_arc(shared.clone());
        created.disposable = Some(shared);
        created
    }

    pub fn downcast<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match self.value.downcast_ref::<Arc<T>>() {
            Some(downcasted) => Ok(downcasted.clone()),
            None => Err(self.info.type_name),
        }
    }

    pub fn is<T: ?Sized + Injectable>(&self) -> bool {
        self.value.is::<Arc<T>>()
    }

    /// Returns true if both instances point to the same value
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.identity == other.identity
    }

    pub fn disposer(&self) -> Option<&Arc<dyn Disposable>> {
        self.disposable.as_ref()
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable.is_some()
    }

    /// A reference which does not keep the value alive
    pub fn downgrade(&self) -> Option<WeakInstance> {
        (self.downgrade)(self)
    }

    /// Reinterprets this instance as another contract, keeping the disposal handle
    pub(crate) fn cast_with(&self, cast: &CastFn) -> Option<Instance> {
        let mut casted = cast(self)?;
        if casted.disposable.is_none() {
            casted.disposable = self.disposable.clone();
        }
        Some(casted)
    }
}

fn downgrade_erased<T: ?Sized + Injectable>(instance: &Instance) -> Option<WeakInstance> {
    let strong = instance.downcast::<T>().ok()?;
    let weak = Arc::downgrade(&strong);
    Some(WeakInstance(Arc::new(move || {
        weak.upgrade().map(Instance::from_arc)
    })))
}

/// Weak counterpart of an [`Instance`]
#[derive(Clone)]
pub struct WeakInstance(Arc<dyn Fn() -> Option<Instance> + Send + Sync>);
impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        (self.0)()
    }
}
impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakInstance")
    }
}

/// Converts an instance of an activation type into one of its export types
pub type CastFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Key a producer can be exported under
///
/// Keyed producers are only reachable when the request names their key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportKey {
    Str(Arc<str>),
    Int(i64),
    Type(TypeInfo),
}
impl fmt::Display for ExportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKey::Str(key) => write!(f, "\"{key}\""),
            ExportKey::Int(key) => write!(f, "{key}"),
            ExportKey::Type(key) => write!(f, "{key}"),
        }
    }
}
impl From<&str> for ExportKey {
    fn from(value: &str) -> Self {
        ExportKey::Str(value.into())
    }
}
impl From<String> for ExportKey {
    fn from(value: String) -> Self {
        ExportKey::Str(value.into())
    }
}
impl From<i64> for ExportKey {
    fn from(value: i64) -> Self {
        ExportKey::Int(value)
    }
}
impl From<i32> for ExportKey {
    fn from(value: i32) -> Self {
        ExportKey::Int(value.into())
    }
}
impl From<TypeInfo> for ExportKey {
    fn from(value: TypeInfo) -> Self {
        ExportKey::Type(value)
    }
}

/// Key part of a request - either one key or candidates tried in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    Exact(ExportKey),
    AnyOf(Vec<ExportKey>),
}
impl KeySelector {
    pub fn keys(&self) -> &[ExportKey] {
        match self {
            KeySelector::Exact(key) => std::slice::from_ref(key),
            KeySelector::AnyOf(keys) => keys,
        }
    }
}
impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Exact(key) => write!(f, "{key}"),
            KeySelector::AnyOf(keys) => {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", keys.join(", "))
            }
        }
    }
}
impl From<ExportKey> for KeySelector {
    fn from(value: ExportKey) -> Self {
        KeySelector::Exact(value)
    }
}
impl From<&str> for KeySelector {
    fn from(value: &str) -> Self {
        KeySelector::Exact(value.into())
    }
}
impl From<String> for KeySelector {
    fn from(value: String) -> Self {
        KeySelector::Exact(value.into())
    }
}
impl From<i64> for KeySelector {
    fn from(value: i64) -> Self {
        KeySelector::Exact(value.into())
    }
}
impl From<i32> for KeySelector {
    fn from(value: i32) -> Self {
        KeySelector::Exact(value.into())
    }
}
impl From<Vec<ExportKey>> for KeySelector {
    fn from(value: Vec<ExportKey>) -> Self {
        KeySelector::AnyOf(value)
    }
}
impl<K: Into<ExportKey>> FromIterator<K> for KeySelector {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        KeySelector::AnyOf(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }
    struct English;
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn downcasts_sized_and_unsized_values() {
        let sized = Instance::new(42_u32);
        assert_eq!(*sized.downcast::<u32>().unwrap(), 42);
        assert_eq!(sized.downcast::<i64>().unwrap_err(), "u32");

        let object: Arc<dyn Greeter> = Arc::new(English);
        let unsized_instance = Instance::from_arc(object.clone());
        let back = unsized_instance.downcast::<dyn Greeter>().unwrap();
        assert_eq!(back.greet(), "hello");
        assert!(Arc::ptr_eq(&back, &object));
    }

    #[test]
    fn clones_share_identity() {
        let a = Instance::new(String::from("a"));
        let b = a.clone();
        let c = Instance::new(String::from("a"));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn weak_instances_do_not_keep_values_alive() {
        let strong = Instance::new(String::from("a"));
        let weak = strong.downgrade().unwrap();
        assert!(weak.upgrade().unwrap().ptr_eq(&strong));

        drop(strong);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn key_selector_from_iterator_keeps_order() {
        let selector: KeySelector = ["b", "a"].into_iter().collect();
        assert_eq!(selector.keys(), &[ExportKey::from("b"), ExportKey::from("a")]);
        assert_eq!(selector.to_string(), "[\"b\", \"a\"]");
    }
}
