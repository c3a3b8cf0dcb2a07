use std::{collections::BTreeMap, fmt, sync::Arc};

/// Value stored in a producer's metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}
impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(value) => write!(f, "{value}"),
            MetaValue::Int(value) => write!(f, "{value}"),
            MetaValue::Float(value) => write!(f, "{value}"),
            MetaValue::Str(value) => f.write_str(value),
        }
    }
}
impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}
impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}
impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        MetaValue::Int(value.into())
    }
}
impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}
impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.into())
    }
}
impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value.into())
    }
}

/// Immutable key/value data attached to a producer
///
/// Cloning is cheap, every "mutation" returns a new map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Arc<BTreeMap<String, MetaValue>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`
    pub fn with(&self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        let mut map = (*self.0).clone();
        map.insert(key.into(), value.into());
        Metadata(Arc::new(map))
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// True if `key` is present, and equal to `value` when one is given
    pub fn matches(&self, key: &str, value: Option<&MetaValue>) -> bool {
        match (self.0.get(key), value) {
            (Some(found), Some(expected)) => found == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<MetaValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata(Arc::new(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_leaves_original_untouched() {
        let base = Metadata::new().with("env", "prod");
        let extended = base.with("shard", 3);

        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert_eq!(extended.get("shard"), Some(&MetaValue::Int(3)));
    }

    #[test]
    fn matches_key_and_optional_value() {
        let meta: Metadata = [("env", "prod")].into_iter().collect();

        assert!(meta.matches("env", None));
        assert!(meta.matches("env", Some(&"prod".into())));
        assert!(!meta.matches("env", Some(&"dev".into())));
        assert!(!meta.matches("region", None));
    }
}
