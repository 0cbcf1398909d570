use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Untyped value as handed over by the upstream record decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<RawValue>),
    Map(Vec<(RawValue, RawValue)>),
    Ext(i8, Vec<u8>),
}

impl RawValue {
    /// Human-readable kind string used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Nil => "nil",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::UInt(_) => "uint",
            RawValue::Float(_) => "float",
            RawValue::Str(_) => "str",
            RawValue::Bytes(_) => "bytes",
            RawValue::Array(_) => "array",
            RawValue::Map(_) => "map",
            RawValue::Ext(_, _) => "ext",
        }
    }

    /// Convenience helper to build a map from text keys.
    pub fn map(entries: impl IntoIterator<Item = (impl Into<String>, RawValue)>) -> Self {
        RawValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (RawValue::Str(k.into()), v))
                .collect(),
        )
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Str(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Str(value)
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Nil,
            serde_json::Value::Bool(b) => RawValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    RawValue::UInt(u)
                } else {
                    RawValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => RawValue::Str(s),
            serde_json::Value::Array(items) => {
                RawValue::Array(items.into_iter().map(RawValue::from).collect())
            }
            serde_json::Value::Object(map) => RawValue::Map(
                map.into_iter()
                    .map(|(k, v)| (RawValue::Str(k), RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Scalar values that survive normalization untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// Closed value set the normalizer produces and the encoder consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Scalar(Scalar),
    Text(String),
    List(Vec<RecordValue>),
    Mapping(BTreeMap<String, RecordValue>),
}

impl RecordValue {
    pub fn text(value: impl Into<String>) -> Self {
        RecordValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, RecordValue>> {
        match self {
            RecordValue::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

/// String-keyed record ready for encoding. Keys are ordered so the canonical text form is
/// stable across calls.
pub type NormalizedRecord = BTreeMap<String, RecordValue>;
