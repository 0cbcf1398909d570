//! Record-to-row conversion for the write API relay.
//!
//! Records arrive from the host as dynamically typed key/value structures. This crate
//! normalizes them, compiles a destination table schema into a proto2 row descriptor and
//! encodes each record into the binary row form the remote append endpoint accepts.

pub mod decoder;
pub mod descriptor;
pub mod encode;
pub mod normalize;
pub mod schema;
pub mod value;

pub use decoder::{DecodeError, EventTime, RawRecord, RecordDecoder, encode_events};
pub use descriptor::{DescriptorAdaptError, ROOT_SCOPE, RowDescriptor};
pub use encode::{DecodeRowError, EncodeError, decode_row, encode_row};
pub use normalize::normalize_record;
pub use schema::{FieldMode, FieldType, TableFieldSchema, TableSchema};
pub use value::{NormalizedRecord, RawValue, RecordValue, Scalar};
