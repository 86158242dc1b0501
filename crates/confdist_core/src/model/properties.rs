//! Case-insensitive configuration property sets.
//!
//! # Responsibility
//! - Hold the key/value content of one configuration record.
//! - Own the reserved keys that the core synthesizes on read and strips on
//!   write.
//!
//! # Invariants
//! - Keys compare case-insensitively; the most recently written spelling of a
//!   key is the one reported back to callers.
//! - Iteration order is stable (sorted by the case-folded key).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key carrying the record identity.
pub const IDENTITY_KEY: &str = "service.pid";
/// Reserved key carrying the factory identity of a factory member.
pub const FACTORY_IDENTITY_KEY: &str = "service.factoryPid";
/// Reserved key carrying the static binding location in persisted form.
pub const LOCATION_KEY: &str = "service.bundleLocation";
/// Persisted marker for a record that exists but was never given content.
pub const NEW_RECORD_MARKER_KEY: &str = "_confdist_.newConfiguration";

const RESERVED_KEYS: &[&str] = &[IDENTITY_KEY, FACTORY_IDENTITY_KEY, LOCATION_KEY];

/// One configuration value.
///
/// Serialized untagged so the persisted JSON stays a plain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns the text payload when this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// `false` for NaN or infinite floats, which JSON cannot represent.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            Self::Array(values) => values.iter().all(Self::is_finite),
            Self::Bool(_) | Self::Integer(_) | Self::Text(_) => true,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered property set with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, PropertyValue>",
    into = "BTreeMap<String, PropertyValue>"
)]
pub struct Properties {
    // folded key -> (caller spelling, value)
    entries: BTreeMap<String, (String, PropertyValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one value, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        self.entries
            .insert(fold_key(&key), (key, value.into()))
            .map(|(_, previous)| previous)
    }

    /// Builder-style variant of [`Properties::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(&fold_key(key)).map(|(_, value)| value)
    }

    /// Returns the string value of `key`, if present and textual.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(&fold_key(key)).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries with the caller's original key spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(key, _)| key.as_str())
    }

    /// Returns the first key whose value is not finite.
    pub fn non_finite_key(&self) -> Option<&str> {
        self.iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(key, _)| key)
    }

    /// Removes identity, factory identity and location keys.
    pub fn strip_reserved(&mut self) {
        for key in RESERVED_KEYS {
            self.remove(key);
        }
    }

    /// Sets `key` to `value`, or removes it when `value` is `None`.
    pub(crate) fn replace_or_remove(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.insert(key, value);
            }
            None => {
                self.remove(key);
            }
        }
    }
}

fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

impl From<BTreeMap<String, PropertyValue>> for Properties {
    fn from(map: BTreeMap<String, PropertyValue>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Properties> for BTreeMap<String, PropertyValue> {
    fn from(properties: Properties) -> Self {
        properties.entries.into_values().collect()
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.insert(key, value);
        }
        properties
    }
}
