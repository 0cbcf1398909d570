//! Compiles a table schema into a self-contained proto2 row descriptor.
//!
//! Nested STRUCT columns become nested message types declared inside the root message, named
//! after their column path (`root__payload__meta`), so the descriptor carries no references
//! to anything outside itself and can be shipped with every append.

use std::collections::HashSet;

use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use thiserror::Error;
use tracing::debug;

use crate::schema::{FieldMode, FieldType, TableFieldSchema, TableSchema};

/// Name of the root message every compiled descriptor uses.
pub const ROOT_SCOPE: &str = "root";

const NESTED_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum DescriptorAdaptError {
    #[error("table schema has no fields")]
    EmptySchema,
    #[error("invalid field name '{0}'")]
    InvalidFieldName(String),
    #[error("duplicate field '{0}'")]
    DuplicateField(String),
    #[error("struct field '{0}' declares no sub-fields")]
    EmptyStruct(String),
    #[error("field '{field}' has unsupported type {field_type:?}")]
    UnsupportedType { field: String, field_type: FieldType },
    #[error("failed to build descriptor pool: {0}")]
    Pool(String),
    #[error("message '{0}' not found in descriptor pool")]
    MessageNotFound(String),
}

/// Compiled structural description of one destination's rows.
///
/// Immutable once built; cloning shares the underlying descriptor pool.
#[derive(Debug, Clone)]
pub struct RowDescriptor {
    proto: DescriptorProto,
    message: MessageDescriptor,
}

impl RowDescriptor {
    /// Compile a table schema using the default root scope.
    pub fn compile(schema: &TableSchema) -> Result<Self, DescriptorAdaptError> {
        Self::compile_scoped(schema, ROOT_SCOPE)
    }

    pub fn compile_scoped(schema: &TableSchema, scope: &str) -> Result<Self, DescriptorAdaptError> {
        if !is_identifier(scope) {
            return Err(DescriptorAdaptError::InvalidFieldName(scope.to_string()));
        }
        if schema.fields.is_empty() {
            return Err(DescriptorAdaptError::EmptySchema);
        }

        let mut nested = Vec::new();
        let fields = compile_fields(&schema.fields, scope, scope, &mut nested)?;
        let proto = DescriptorProto {
            name: Some(scope.to_string()),
            field: fields,
            nested_type: nested,
            ..Default::default()
        };
        debug!(
            scope,
            columns = proto.field.len(),
            nested = proto.nested_type.len(),
            "compiled row descriptor"
        );
        Self::from_proto(proto)
    }

    /// Rebuild a descriptor from an already normalized message proto, as received
    /// alongside appended rows.
    pub fn from_proto(proto: DescriptorProto) -> Result<Self, DescriptorAdaptError> {
        let name = proto
            .name
            .clone()
            .ok_or_else(|| DescriptorAdaptError::MessageNotFound(String::new()))?;
        let file = FileDescriptorProto {
            name: Some(format!("{name}.proto")),
            syntax: Some("proto2".to_string()),
            message_type: vec![proto.clone()],
            ..Default::default()
        };
        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
            .map_err(|err| DescriptorAdaptError::Pool(err.to_string()))?;
        let message = pool
            .get_message_by_name(&name)
            .ok_or(DescriptorAdaptError::MessageNotFound(name))?;
        Ok(Self { proto, message })
    }

    /// Normalized message proto, suitable for sending as the writer schema.
    pub fn proto(&self) -> &DescriptorProto {
        &self.proto
    }

    pub fn message(&self) -> &MessageDescriptor {
        &self.message
    }

    pub fn name(&self) -> &str {
        self.message.full_name()
    }

    /// Top-level column names in field-number order.
    pub fn field_names(&self) -> Vec<String> {
        self.message.fields().map(|f| f.name().to_string()).collect()
    }
}

fn compile_fields(
    fields: &[TableFieldSchema],
    root: &str,
    scope: &str,
    nested: &mut Vec<DescriptorProto>,
) -> Result<Vec<FieldDescriptorProto>, DescriptorAdaptError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(fields.len());

    for (idx, field) in fields.iter().enumerate() {
        if !is_identifier(&field.name) {
            return Err(DescriptorAdaptError::InvalidFieldName(field.name.clone()));
        }
        // Column names are case-insensitive on the remote side.
        if !seen.insert(field.name.to_ascii_lowercase()) {
            return Err(DescriptorAdaptError::DuplicateField(field.name.clone()));
        }

        let mut proto = FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: Some(idx as i32 + 1),
            ..Default::default()
        };
        proto.set_label(label_for(field.mode));

        if field.field_type == FieldType::Struct {
            if field.fields.is_empty() {
                return Err(DescriptorAdaptError::EmptyStruct(field.name.clone()));
            }
            let nested_name = format!("{scope}{NESTED_SEPARATOR}{}", field.name);
            let sub_fields = compile_fields(&field.fields, root, &nested_name, nested)?;
            nested.push(DescriptorProto {
                name: Some(nested_name.clone()),
                field: sub_fields,
                ..Default::default()
            });
            proto.set_type(Type::Message);
            proto.type_name = Some(format!(".{root}.{nested_name}"));
        } else {
            proto.set_type(scalar_type(field)?);
        }
        out.push(proto);
    }

    Ok(out)
}

fn label_for(mode: FieldMode) -> Label {
    match mode {
        FieldMode::Nullable => Label::Optional,
        FieldMode::Required => Label::Required,
        FieldMode::Repeated => Label::Repeated,
    }
}

fn scalar_type(field: &TableFieldSchema) -> Result<Type, DescriptorAdaptError> {
    let ty = match field.field_type {
        FieldType::String
        | FieldType::Datetime
        | FieldType::Time
        | FieldType::Numeric
        | FieldType::Bignumeric
        | FieldType::Geography
        | FieldType::Json
        | FieldType::Interval => Type::String,
        FieldType::Int64 | FieldType::Timestamp => Type::Int64,
        FieldType::Date => Type::Int32,
        FieldType::Bool => Type::Bool,
        FieldType::Double => Type::Double,
        FieldType::Bytes => Type::Bytes,
        FieldType::Struct | FieldType::Range | FieldType::Unspecified => {
            return Err(DescriptorAdaptError::UnsupportedType {
                field: field.name.clone(),
                field_type: field.field_type,
            });
        }
    };
    Ok(ty)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
