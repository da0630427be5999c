//! Extended-attribute values.
//!
//! Every fsevent carries a generic mapping of string keys to [`Value`]s.
//! The mapping is also how the pipeline smuggles enrichment requests from
//! a source to an enricher, under the reserved key
//! [`ENRICH_XATTR`](crate::fsevent::ENRICH_XATTR).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Ordered mapping of unique string keys to values.
pub type ValueMap = BTreeMap<String, Value>;

/// An extended-attribute value.
///
/// Binary payloads carry an explicit length and serialize as hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Binary(#[serde(with = "crate::hex")] Vec<u8>),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Ordered sequence of values.
    Sequence(Vec<Value>),
    /// Nested mapping.
    Map(ValueMap),
}

impl Value {
    /// Returns the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the nested mapping, if this is a map value.
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the integer payload widened to 64 bits, if this is an
    /// integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt32(n) => Some(u64::from(*n)),
            Value::UInt64(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInt32(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt64(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}
