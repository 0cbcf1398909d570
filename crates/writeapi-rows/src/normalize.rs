//! Converts decoder output into string-keyed records.
//!
//! The upstream decoder guarantees string-coercible keys, so normalization has no error
//! path: byte strings become UTF-8 text (lossy), nested maps recurse, lists are normalized
//! element-wise and the remaining scalars pass through unchanged.

use std::collections::BTreeMap;

use tracing::trace;

use crate::value::{NormalizedRecord, RawValue, RecordValue, Scalar};

/// Normalize the top-level key/value pairs of one raw record.
pub fn normalize_record(fields: Vec<(RawValue, RawValue)>) -> NormalizedRecord {
    normalize_map(fields)
}

/// Normalize a single value.
pub fn normalize_value(value: RawValue) -> RecordValue {
    match value {
        RawValue::Nil => RecordValue::Scalar(Scalar::Null),
        RawValue::Bool(b) => RecordValue::Scalar(Scalar::Bool(b)),
        RawValue::Int(i) => RecordValue::Scalar(Scalar::Int(i)),
        RawValue::UInt(u) => RecordValue::Scalar(Scalar::UInt(u)),
        RawValue::Float(f) => RecordValue::Scalar(Scalar::Float(f)),
        RawValue::Str(s) => RecordValue::Text(s),
        RawValue::Bytes(bytes) | RawValue::Ext(_, bytes) => RecordValue::Text(bytes_to_text(bytes)),
        RawValue::Array(items) => {
            RecordValue::List(items.into_iter().map(normalize_value).collect())
        }
        RawValue::Map(entries) => RecordValue::Mapping(normalize_map(entries)),
    }
}

fn normalize_map(entries: Vec<(RawValue, RawValue)>) -> BTreeMap<String, RecordValue> {
    entries
        .into_iter()
        .map(|(k, v)| (key_text(k), normalize_value(v)))
        .collect()
}

fn key_text(key: RawValue) -> String {
    match key {
        RawValue::Str(s) => s,
        RawValue::Bytes(bytes) | RawValue::Ext(_, bytes) => bytes_to_text(bytes),
        RawValue::Nil => "null".to_string(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Int(i) => i.to_string(),
        RawValue::UInt(u) => u.to_string(),
        RawValue::Float(f) => f.to_string(),
        composite @ (RawValue::Array(_) | RawValue::Map(_)) => {
            serde_json::to_string(&normalize_value(composite)).unwrap_or_default()
        }
    }
}

fn bytes_to_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            trace!(valid_up_to = err.utf8_error().valid_up_to(), "replacing invalid utf-8 in byte value");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}
