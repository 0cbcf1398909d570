//! Record to binary row encoding.
//!
//! A normalized record is marshalled to JSON (null columns dropped so they stay unset,
//! non-finite floats rejected), bound to the row descriptor as a dynamic
//! message (unknown fields and type mismatches are rejected here), checked for missing
//! required fields and finally serialized to the protobuf wire form.

use prost::Message;
use prost_reflect::{
    Cardinality, DeserializeOptions, DynamicMessage, ReflectMessage, SerializeOptions, Value,
};
use thiserror::Error;

use crate::descriptor::RowDescriptor;
use crate::value::{NormalizedRecord, RecordValue, Scalar};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("marshal record: {0}")]
    Marshal(#[source] serde_json::Error),
    #[error("marshal record: field '{0}' is not a finite number")]
    NonFinite(String),
    #[error("bind record to descriptor: {0}")]
    Bind(#[source] serde_json::Error),
    #[error("bind record to descriptor: missing required field '{0}'")]
    MissingRequired(String),
    #[error("serialize row: {0}")]
    Serialize(#[from] prost::EncodeError),
}

impl EncodeError {
    /// Stage of the encode pipeline that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            EncodeError::Marshal(_) | EncodeError::NonFinite(_) => "marshal",
            EncodeError::Bind(_) | EncodeError::MissingRequired(_) => "bind",
            EncodeError::Serialize(_) => "serialize",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeRowError {
    #[error("decode row: {0}")]
    Wire(#[from] prost::DecodeError),
    #[error("render row: {0}")]
    Render(#[from] serde_json::Error),
}

/// Encode one normalized record as a binary row conforming to `descriptor`.
///
/// Deterministic: the same record and descriptor always produce the same bytes.
pub fn encode_row(descriptor: &RowDescriptor, record: &NormalizedRecord) -> Result<Vec<u8>, EncodeError> {
    let record = prune_record(record, None)?;
    let text = serde_json::to_vec(&record).map_err(EncodeError::Marshal)?;
    let message = bind(descriptor, &text)?;
    check_required(&message, None)?;

    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf)?;
    Ok(buf)
}

/// Decode a binary row back into JSON keyed by column name.
pub fn decode_row(descriptor: &RowDescriptor, bytes: &[u8]) -> Result<serde_json::Value, DecodeRowError> {
    let message = DynamicMessage::decode(descriptor.message().clone(), bytes)?;
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false);
    Ok(message.serialize_with_options(serde_json::value::Serializer, &options)?)
}

/// Copy of `record` without null entries, recursing through mappings.
fn prune_record(record: &NormalizedRecord, path: Option<&str>) -> Result<NormalizedRecord, EncodeError> {
    let mut out = NormalizedRecord::new();
    for (key, value) in record {
        let name = match path {
            Some(parent) => format!("{parent}.{key}"),
            None => key.clone(),
        };
        if let Some(value) = prune_value(value, &name)? {
            out.insert(key.clone(), value);
        }
    }
    Ok(out)
}

fn prune_value(value: &RecordValue, name: &str) -> Result<Option<RecordValue>, EncodeError> {
    match value {
        RecordValue::Scalar(Scalar::Null) => Ok(None),
        RecordValue::Scalar(Scalar::Float(f)) if !f.is_finite() => Err(EncodeError::NonFinite(name.to_string())),
        RecordValue::Mapping(entries) => Ok(Some(RecordValue::Mapping(prune_record(entries, Some(name))?))),
        RecordValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match prune_value(item, name)? {
                    Some(item) => out.push(item),
                    // Null list elements are left for the binder to reject.
                    None => out.push(item.clone()),
                }
            }
            Ok(Some(RecordValue::List(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

fn bind(descriptor: &RowDescriptor, text: &[u8]) -> Result<DynamicMessage, EncodeError> {
    let options = DeserializeOptions::new().deny_unknown_fields(true);
    let mut deserializer = serde_json::Deserializer::from_slice(text);
    let message =
        DynamicMessage::deserialize_with_options(descriptor.message().clone(), &mut deserializer, &options)
            .map_err(EncodeError::Bind)?;
    deserializer.end().map_err(EncodeError::Bind)?;
    Ok(message)
}

fn check_required(message: &DynamicMessage, path: Option<&str>) -> Result<(), EncodeError> {
    for field in message.descriptor().fields() {
        let name = match path {
            Some(parent) => format!("{parent}.{}", field.name()),
            None => field.name().to_string(),
        };
        if !message.has_field(&field) {
            if field.cardinality() == Cardinality::Required {
                return Err(EncodeError::MissingRequired(name));
            }
            continue;
        }
        match &*message.get_field(&field) {
            Value::Message(inner) => check_required(inner, Some(&name))?,
            Value::List(items) => {
                for item in items {
                    if let Value::Message(inner) = item {
                        check_required(inner, Some(&name))?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}
