//! Untyped device-twin values and desired-property deltas
//!
//! Desired properties arrive from the cloud as JSON, but the delivery path is
//! not trusted to preserve types: integers may show up as numbers or as
//! decimal strings such as `"10.0"`. [`TwinValue`] keeps what was received
//! and leaves interpretation to the consumer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

use crate::error::{DiagError, Result};

/// Metadata keys the service adds to desired documents
const METADATA_PREFIX: char = '$';

/// A raw desired-property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum TwinValue {
    Text(String),
    Number(Number),
    Bool(bool),
    Null,
    /// Arrays and objects
    Other(JsonValue),
}

impl TwinValue {
    pub fn text(value: impl Into<String>) -> Self {
        TwinValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TwinValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric reading of the value, accepting numbers and decimal strings
    ///
    /// Non-finite results are rejected.
    pub fn as_f64_lenient(&self) -> Option<f64> {
        let value = match self {
            TwinValue::Number(n) => n.as_f64()?,
            TwinValue::Text(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Short name of the variant, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            TwinValue::Text(_) => "string",
            TwinValue::Number(_) => "number",
            TwinValue::Bool(_) => "bool",
            TwinValue::Null => "null",
            TwinValue::Other(JsonValue::Array(_)) => "array",
            TwinValue::Other(_) => "object",
        }
    }
}

impl From<JsonValue> for TwinValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => TwinValue::Text(s),
            JsonValue::Number(n) => TwinValue::Number(n),
            JsonValue::Bool(b) => TwinValue::Bool(b),
            JsonValue::Null => TwinValue::Null,
            other => TwinValue::Other(other),
        }
    }
}

impl From<TwinValue> for JsonValue {
    fn from(value: TwinValue) -> Self {
        match value {
            TwinValue::Text(s) => JsonValue::String(s),
            TwinValue::Number(n) => JsonValue::Number(n),
            TwinValue::Bool(b) => JsonValue::Bool(b),
            TwinValue::Null => JsonValue::Null,
            TwinValue::Other(v) => v,
        }
    }
}

impl From<&str> for TwinValue {
    fn from(value: &str) -> Self {
        TwinValue::Text(value.to_string())
    }
}

impl From<String> for TwinValue {
    fn from(value: String) -> Self {
        TwinValue::Text(value)
    }
}

impl From<i64> for TwinValue {
    fn from(value: i64) -> Self {
        TwinValue::Number(value.into())
    }
}

impl From<bool> for TwinValue {
    fn from(value: bool) -> Self {
        TwinValue::Bool(value)
    }
}

impl fmt::Display for TwinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwinValue::Text(s) => f.write_str(s),
            TwinValue::Number(n) => write!(f, "{}", n),
            TwinValue::Bool(b) => write!(f, "{}", b),
            TwinValue::Null => f.write_str("null"),
            TwinValue::Other(v) => write!(f, "{}", v),
        }
    }
}

/// A named property, used for reported properties and desired subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: TwinValue,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<TwinValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The changed keys of one desired-property update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinDelta {
    entries: Vec<(String, TwinValue)>,
}

impl TwinDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TwinValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace an entry; keys are case-sensitive
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TwinValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TwinValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TwinValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build a delta from a JSON object
    ///
    /// Accepts either the desired object itself or a twin document of the
    /// form `{"desired": {...}, "reported": {...}}`. The input is read as a
    /// document only when `desired` holds an object and no keys other than
    /// `reported` and metadata sit beside it; otherwise a `desired` key is an
    /// ordinary property. Metadata keys such as `$version` are dropped.
    pub fn from_json_value(value: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut root) = value else {
            return Err(DiagError::parse("twin document must be a JSON object"));
        };

        if is_twin_document(&root) {
            if let Some(JsonValue::Object(desired)) = root.remove("desired") {
                return Ok(Self::from_map(desired));
            }
        }

        Ok(Self::from_map(root))
    }

    /// Parse a delta from JSON text, see [`TwinDelta::from_json_value`]
    pub fn from_json(text: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(text)?;
        Self::from_json_value(value)
    }

    fn from_map(map: Map<String, JsonValue>) -> Self {
        let entries = map
            .into_iter()
            .filter(|(key, _)| !key.starts_with(METADATA_PREFIX))
            .map(|(key, value)| (key, TwinValue::from(value)))
            .collect();
        Self { entries }
    }
}

fn is_twin_document(root: &Map<String, JsonValue>) -> bool {
    matches!(root.get("desired"), Some(JsonValue::Object(_)))
        && root
            .keys()
            .all(|key| key == "desired" || key == "reported" || key.starts_with(METADATA_PREFIX))
}

impl<K: Into<String>, V: Into<TwinValue>> FromIterator<(K, V)> for TwinDelta {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut delta = TwinDelta::new();
        for (key, value) in iter {
            delta.insert(key, value);
        }
        delta
    }
}

impl IntoIterator for TwinDelta {
    type Item = (String, TwinValue);
    type IntoIter = std::vec::IntoIter<(String, TwinValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
