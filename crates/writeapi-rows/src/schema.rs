//! Table schema as reported by the remote schema-discovery service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

impl TableSchema {
    pub fn new(fields: Vec<TableFieldSchema>) -> Self {
        Self { fields }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TableFieldSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableFieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode,
            fields: Vec::new(),
            description: None,
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Nullable)
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Required)
    }

    pub fn repeated(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Repeated)
    }

    pub fn record(name: impl Into<String>, mode: FieldMode, fields: Vec<TableFieldSchema>) -> Self {
        Self {
            fields,
            ..Self::new(name, FieldType::Struct, mode)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    #[serde(alias = "INTEGER")]
    Int64,
    #[serde(alias = "BOOLEAN")]
    Bool,
    #[serde(alias = "FLOAT", alias = "FLOAT64")]
    Double,
    Bytes,
    Timestamp,
    Date,
    Time,
    Datetime,
    Numeric,
    Bignumeric,
    Geography,
    Json,
    Interval,
    #[serde(alias = "RECORD")]
    Struct,
    Range,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    #[default]
    #[serde(alias = "MODE_UNSPECIFIED")]
    Nullable,
    Required,
    Repeated,
}
