//! MessagePack event stream decoding.
//!
//! The host hands every flush a buffer of concatenated events, each encoded as
//! `[timestamp, record]` or `[[timestamp, metadata], record]`. The timestamp is either an
//! EventTime extension (type 0, big-endian seconds and nanoseconds) or a plain number of
//! seconds. Reaching the end of the buffer ends the batch.

use std::io::Cursor;

use rmpv::Value;
use thiserror::Error;

use crate::value::RawValue;

const EVENT_TIME_EXT: i8 = 0;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed msgpack at byte {offset}: {source}")]
    Msgpack {
        offset: u64,
        #[source]
        source: rmpv::decode::Error,
    },
    #[error("event {index} is not a [header, record] array (got {kind})")]
    MalformedEvent { index: usize, kind: &'static str },
    #[error("event {index} has an invalid timestamp ({kind})")]
    InvalidTimestamp { index: usize, kind: &'static str },
    #[error("event {index} record body is not a map (got {kind})")]
    RecordNotMap { index: usize, kind: &'static str },
}

/// Event timestamp with nanosecond precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    pub seconds: i64,
    pub nanos: u32,
}

impl EventTime {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Header value for this time. The EventTime extension only carries unsigned 32-bit
    /// seconds; anything outside that range falls back to a plain number.
    fn to_header(self) -> Value {
        match u32::try_from(self.seconds) {
            Ok(seconds) => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&seconds.to_be_bytes());
                out.extend_from_slice(&self.nanos.to_be_bytes());
                Value::Ext(EVENT_TIME_EXT, out)
            }
            Err(_) if self.nanos == 0 => Value::from(self.seconds),
            Err(_) => Value::F64(self.seconds as f64 + f64::from(self.nanos) / 1e9),
        }
    }
}

/// One decoded event: timestamp, optional metadata and the record key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: EventTime,
    pub metadata: Vec<(RawValue, RawValue)>,
    pub fields: Vec<(RawValue, RawValue)>,
}

impl RawRecord {
    pub fn new(timestamp: EventTime, fields: Vec<(RawValue, RawValue)>) -> Self {
        Self {
            timestamp,
            metadata: Vec::new(),
            fields,
        }
    }
}

/// Iterator over the events in a host buffer.
pub struct RecordDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
    index: usize,
    failed: bool,
}

impl<'a> RecordDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            index: 0,
            failed: false,
        }
    }

    fn at_end(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }
}

impl Iterator for RecordDecoder<'_> {
    type Item = Result<RawRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at_end() {
            return None;
        }
        let offset = self.cursor.position();
        let index = self.index;
        self.index += 1;

        let result = rmpv::decode::read_value(&mut self.cursor)
            .map_err(|source| DecodeError::Msgpack { offset, source })
            .and_then(|value| event_from_value(index, value));
        if result.is_err() {
            // A broken event leaves the cursor somewhere undefined.
            self.failed = true;
        }
        Some(result)
    }
}

/// Encode events into the buffer layout [`RecordDecoder`] reads.
pub fn encode_events(records: &[RawRecord]) -> Result<Vec<u8>, rmpv::encode::Error> {
    let mut buf = Vec::new();
    for record in records {
        let time = record.timestamp.to_header();
        let header = if record.metadata.is_empty() {
            time
        } else {
            Value::Array(vec![time, map_to_value(&record.metadata)])
        };
        let event = Value::Array(vec![header, map_to_value(&record.fields)]);
        rmpv::encode::write_value(&mut buf, &event)?;
    }
    Ok(buf)
}

fn event_from_value(index: usize, value: Value) -> Result<RawRecord, DecodeError> {
    let items = match value {
        Value::Array(items) if items.len() == 2 => items,
        other => {
            return Err(DecodeError::MalformedEvent {
                index,
                kind: value_kind(&other),
            });
        }
    };
    let mut items = items.into_iter();
    let (Some(header), Some(body)) = (items.next(), items.next()) else {
        return Err(DecodeError::MalformedEvent { index, kind: "array" });
    };

    let (timestamp, metadata) = match header {
        Value::Array(parts) if parts.len() == 2 => {
            let mut parts = parts.into_iter();
            let (Some(ts), Some(meta)) = (parts.next(), parts.next()) else {
                return Err(DecodeError::MalformedEvent { index, kind: "array" });
            };
            let metadata = match RawValue::from(meta) {
                RawValue::Map(entries) => entries,
                RawValue::Nil => Vec::new(),
                other => {
                    return Err(DecodeError::MalformedEvent {
                        index,
                        kind: other.kind(),
                    });
                }
            };
            (parse_timestamp(index, &ts)?, metadata)
        }
        ts => (parse_timestamp(index, &ts)?, Vec::new()),
    };

    let fields = match RawValue::from(body) {
        RawValue::Map(entries) => entries,
        other => {
            return Err(DecodeError::RecordNotMap {
                index,
                kind: other.kind(),
            });
        }
    };

    Ok(RawRecord {
        timestamp,
        metadata,
        fields,
    })
}

fn parse_timestamp(index: usize, value: &Value) -> Result<EventTime, DecodeError> {
    match value {
        Value::Ext(EVENT_TIME_EXT, data) if data.len() == 8 => {
            let seconds = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let nanos = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            Ok(EventTime::new(i64::from(seconds), nanos))
        }
        Value::Integer(i) => i
            .as_i64()
            .map(|seconds| EventTime::new(seconds, 0))
            .ok_or(DecodeError::InvalidTimestamp { index, kind: "integer" }),
        Value::F64(f) => Ok(float_time(*f)),
        Value::F32(f) => Ok(float_time(f64::from(*f))),
        other => Err(DecodeError::InvalidTimestamp {
            index,
            kind: value_kind(other),
        }),
    }
}

fn float_time(value: f64) -> EventTime {
    let seconds = value.floor();
    let nanos = ((value - seconds) * 1e9).round().min(999_999_999.0) as u32;
    EventTime::new(seconds as i64, nanos)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "str",
        Value::Binary(_) => "bin",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(_, _) => "ext",
    }
}

fn map_to_value(entries: &[(RawValue, RawValue)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| (Value::from(k.clone()), Value::from(v.clone())))
            .collect(),
    )
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => RawValue::Nil,
            Value::Boolean(b) => RawValue::Bool(b),
            Value::Integer(i) => match i.as_i64() {
                Some(v) => RawValue::Int(v),
                None => RawValue::UInt(i.as_u64().unwrap_or(u64::MAX)),
            },
            Value::F32(f) => RawValue::Float(f64::from(f)),
            Value::F64(f) => RawValue::Float(f),
            Value::String(s) => {
                if s.is_str() {
                    RawValue::Str(s.into_str().unwrap_or_default())
                } else {
                    RawValue::Bytes(s.into_bytes())
                }
            }
            Value::Binary(bytes) => RawValue::Bytes(bytes),
            Value::Array(items) => RawValue::Array(items.into_iter().map(RawValue::from).collect()),
            Value::Map(entries) => RawValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (RawValue::from(k), RawValue::from(v)))
                    .collect(),
            ),
            Value::Ext(ty, data) => RawValue::Ext(ty, data),
        }
    }
}

impl From<RawValue> for Value {
    fn from(value: RawValue) -> Self {
        match value {
            RawValue::Nil => Value::Nil,
            RawValue::Bool(b) => Value::Boolean(b),
            RawValue::Int(i) => Value::from(i),
            RawValue::UInt(u) => Value::from(u),
            RawValue::Float(f) => Value::F64(f),
            RawValue::Str(s) => Value::from(s),
            RawValue::Bytes(bytes) => Value::Binary(bytes),
            RawValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            RawValue::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::from(k), Value::from(v)))
                    .collect(),
            ),
            RawValue::Ext(ty, data) => Value::Ext(ty, data),
        }
    }
}
