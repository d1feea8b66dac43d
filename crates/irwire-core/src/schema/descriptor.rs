//! Schema import from compiled protobuf descriptors.
//!
//! Takes a `FileDescriptorSet` as produced by `protoc --descriptor_set_out`
//! (or `prost-build`) and declares one message type per `DescriptorProto`,
//! nested types included, under their fully qualified names without the
//! leading dot.
//!
//! Mapping rules:
//!
//! - labels map to [`Cardinality`]; proto3 fields without a label keyword
//!   arrive as `LABEL_OPTIONAL`
//! - enums become [`ScalarKind::Enum`]; an enum field without an explicit
//!   default reads as the enum's first declared value
//! - `[packed = true]` is honoured; proto3 repeated numeric fields are packed
//!   unless `[packed = false]` is given
//! - groups are rejected
//! - extensions, services and options other than `packed` are ignored

use super::{Cardinality, FieldDecl, FieldType, ScalarKind, Schema, SchemaBuilder};
use crate::error::{Error, Result};
use crate::value::Value;
use bytes::Bytes;
use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Enum full name to its values in declaration order
type EnumTable = HashMap<String, Vec<(String, i32)>>;

impl Schema {
    /// Builds a schema from every message type in `set`
    pub fn from_file_descriptor_set(set: &FileDescriptorSet) -> Result<Arc<Schema>> {
        let mut enums = EnumTable::new();
        for file in &set.file {
            let package = file.package();
            collect_enums(&scope(package), &file.enum_type, &file.message_type, &mut enums);
        }

        let mut builder = SchemaBuilder::new();
        for file in &set.file {
            let proto3 = file.syntax() == "proto3";
            let package = scope(file.package());
            for message in &file.message_type {
                declare_message(&mut builder, &package, message, proto3, &enums)?;
            }
        }

        debug!(
            "Imported {} files ({} enums) from descriptor set",
            set.file.len(),
            enums.len()
        );
        builder.build()
    }

    /// Builds a schema from a serialized `FileDescriptorSet`
    pub fn from_descriptor_set_bytes(data: &[u8]) -> Result<Arc<Schema>> {
        let set = FileDescriptorSet::decode(data)?;
        Self::from_file_descriptor_set(&set)
    }
}

/// Reads a serialized `FileDescriptorSet` from disk and builds a schema
pub fn load_descriptor_set(path: impl AsRef<Path>) -> Result<Arc<Schema>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    debug!("Loaded descriptor set {} ({} bytes)", path.display(), data.len());
    Schema::from_descriptor_set_bytes(&data)
}

/// Creates a single-file descriptor set, handy when a caller holds one
/// `FileDescriptorProto` rather than a full set
pub fn single_file_set(file: FileDescriptorProto) -> FileDescriptorSet {
    FileDescriptorSet { file: vec![file] }
}

fn scope(package: &str) -> String {
    if package.is_empty() {
        String::new()
    } else {
        format!("{}.", package)
    }
}

fn collect_enums(
    prefix: &str,
    enum_types: &[EnumDescriptorProto],
    messages: &[DescriptorProto],
    out: &mut EnumTable,
) {
    for enum_type in enum_types {
        let values = enum_type
            .value
            .iter()
            .map(|v| (v.name().to_string(), v.number()))
            .collect();
        out.insert(format!("{}{}", prefix, enum_type.name()), values);
    }
    for message in messages {
        let nested = format!("{}{}.", prefix, message.name());
        collect_enums(&nested, &message.enum_type, &message.nested_type, out);
    }
}

fn declare_message(
    builder: &mut SchemaBuilder,
    prefix: &str,
    message: &DescriptorProto,
    proto3: bool,
    enums: &EnumTable,
) -> Result<()> {
    let full_name = format!("{}{}", prefix, message.name());
    if builder.contains(&full_name) {
        return Err(Error::DuplicateMessageType { name: full_name });
    }

    let mut decls = Vec::with_capacity(message.field.len());
    for field in &message.field {
        decls.push(field_decl(&full_name, field, proto3, enums)?);
    }
    let decl = builder.message(full_name.clone());
    for field in decls {
        decl.field(field);
    }

    let nested_prefix = format!("{}.", full_name);
    for nested in &message.nested_type {
        declare_message(builder, &nested_prefix, nested, proto3, enums)?;
    }
    Ok(())
}

fn field_decl(
    message: &str,
    field: &FieldDescriptorProto,
    proto3: bool,
    enums: &EnumTable,
) -> Result<FieldDecl> {
    let cardinality = match field.label() {
        Label::Required => Cardinality::Required,
        Label::Optional => Cardinality::Optional,
        Label::Repeated => Cardinality::Repeated,
    };

    // Out-of-range numbers are rejected by the schema builder
    let number = u32::try_from(field.number()).unwrap_or(0);

    let kind = scalar_kind(field.r#type());
    let ty = match (field.r#type(), kind) {
        (Type::Group, _) => {
            return Err(Error::unsupported_descriptor(
                message,
                field.name(),
                "groups are not supported",
            ))
        }
        (_, Some(kind)) => FieldType::Scalar(kind),
        (_, None) => FieldType::message(field.type_name().trim_start_matches('.')),
    };

    let mut decl = FieldDecl::new(number, field.name(), cardinality, ty);

    if cardinality == Cardinality::Repeated {
        if kind.is_some_and(ScalarKind::is_packable) {
            let explicit = field.options.as_ref().and_then(|o| o.packed);
            decl.packed = explicit.unwrap_or(proto3);
        }
    } else {
        decl.default = match (kind, field.default_value.as_deref()) {
            (Some(ScalarKind::Enum), explicit) => enum_default(message, field, explicit, enums)?,
            (Some(kind), Some(text)) => Some(parse_default(message, field, kind, text)?),
            _ => None,
        };
    }

    Ok(decl)
}

/// Scalar kind for a descriptor type; `None` for messages and groups
fn scalar_kind(ty: Type) -> Option<ScalarKind> {
    let kind = match ty {
        Type::Double => ScalarKind::Double,
        Type::Float => ScalarKind::Float,
        Type::Int64 => ScalarKind::Int64,
        Type::Uint64 => ScalarKind::UInt64,
        Type::Int32 => ScalarKind::Int32,
        Type::Fixed64 => ScalarKind::Fixed64,
        Type::Fixed32 => ScalarKind::Fixed32,
        Type::Bool => ScalarKind::Bool,
        Type::String => ScalarKind::String,
        Type::Bytes => ScalarKind::Bytes,
        Type::Uint32 => ScalarKind::UInt32,
        Type::Enum => ScalarKind::Enum,
        Type::Sfixed32 => ScalarKind::SFixed32,
        Type::Sfixed64 => ScalarKind::SFixed64,
        Type::Sint32 => ScalarKind::SInt32,
        Type::Sint64 => ScalarKind::SInt64,
        Type::Message | Type::Group => return None,
    };
    Some(kind)
}

fn invalid_default(message: &str, field: &FieldDescriptorProto, details: String) -> Error {
    Error::InvalidDefault {
        message: message.to_string(),
        field: field.name().to_string(),
        details,
    }
}

fn enum_default(
    message: &str,
    field: &FieldDescriptorProto,
    explicit: Option<&str>,
    enums: &EnumTable,
) -> Result<Option<Value>> {
    let enum_name = field.type_name().trim_start_matches('.');
    let values = enums.get(enum_name);

    let Some(name) = explicit else {
        // Zero is already the kind's default
        let first = values.and_then(|values| values.first());
        return Ok(first
            .filter(|&&(_, number)| number != 0)
            .map(|&(_, number)| Value::I32(number)));
    };

    values
        .and_then(|values| values.iter().find(|(value_name, _)| value_name == name))
        .map(|&(_, number)| Some(Value::I32(number)))
        .ok_or_else(|| {
            invalid_default(
                message,
                field,
                format!("'{}' is not a value of '{}'", name, enum_name),
            )
        })
}

fn parse_default(
    message: &str,
    field: &FieldDescriptorProto,
    kind: ScalarKind,
    text: &str,
) -> Result<Value> {
    let bad = || {
        invalid_default(
            message,
            field,
            format!("cannot parse '{}' as {}", text, kind.as_str()),
        )
    };
    let value = match kind {
        ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32 | ScalarKind::Enum => {
            Value::I32(text.parse().map_err(|_| bad())?)
        }
        ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64 => {
            Value::I64(text.parse().map_err(|_| bad())?)
        }
        ScalarKind::UInt32 | ScalarKind::Fixed32 => Value::U32(text.parse().map_err(|_| bad())?),
        ScalarKind::UInt64 | ScalarKind::Fixed64 => Value::U64(text.parse().map_err(|_| bad())?),
        ScalarKind::Bool => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad()),
        },
        ScalarKind::Float => Value::F32(text.parse().map_err(|_| bad())?),
        ScalarKind::Double => Value::F64(text.parse().map_err(|_| bad())?),
        ScalarKind::String => Value::String(text.to_string()),
        ScalarKind::Bytes => Value::Bytes(unescape_bytes(text).ok_or_else(bad)?),
    };
    Ok(value)
}

/// Reverses the C-style escaping protoc applies to `bytes` defaults
fn unescape_bytes(text: &str) -> Option<Bytes> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let escape = *raw.get(i + 1)?;
        i += 2;
        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'x' | b'X' => {
                let digits = raw[i..].iter().take(2).take_while(|b| b.is_ascii_hexdigit()).count();
                if digits == 0 {
                    return None;
                }
                let hex = std::str::from_utf8(&raw[i..i + digits]).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += digits;
            }
            b'0'..=b'7' => {
                let start = i - 1;
                let digits = 1 + raw[i..]
                    .iter()
                    .take(2)
                    .take_while(|b| (b'0'..=b'7').contains(*b))
                    .count();
                let octal = std::str::from_utf8(&raw[start..start + digits]).ok()?;
                out.push(u8::try_from(u16::from_str_radix(octal, 8).ok()?).ok()?);
                i = start + digits;
            }
            _ => return None,
        }
    }
    Some(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, MessageType};
    use prost_types::{EnumValueDescriptorProto, FieldOptions};

    fn field(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn message_field(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            type_name: Some(type_name.to_string()),
            ..field(name, number, label, Type::Message)
        }
    }

    fn ir_file() -> FileDescriptorProto {
        let origin_kind = EnumDescriptorProto {
            name: Some("Kind".to_string()),
            value: vec![
                EnumValueDescriptorProto {
                    name: Some("EQ".to_string()),
                    number: Some(3),
                    ..Default::default()
                },
                EnumValueDescriptorProto {
                    name: Some("PLUSEQ".to_string()),
                    number: Some(4),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        FileDescriptorProto {
            name: Some("ir.proto".to_string()),
            package: Some("ir".to_string()),
            syntax: Some("proto2".to_string()),
            message_type: vec![
                DescriptorProto {
                    name: Some("IrSetField".to_string()),
                    field: vec![
                        message_field("field_access", 1, Label::Required, ".ir.FieldAccessCommon"),
                        message_field("value", 2, Label::Required, ".ir.IrExpression"),
                        message_field("origin", 3, Label::Optional, ".ir.IrSetField.Origin"),
                    ],
                    nested_type: vec![DescriptorProto {
                        name: Some("Origin".to_string()),
                        field: vec![FieldDescriptorProto {
                            type_name: Some(".ir.IrSetField.Origin.Kind".to_string()),
                            ..field("kind", 1, Label::Optional, Type::Enum)
                        }],
                        enum_type: vec![origin_kind],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("FieldAccessCommon".to_string()),
                    field: vec![FieldDescriptorProto {
                        default_value: Some("-5".to_string()),
                        ..field("symbol", 1, Label::Required, Type::Int64)
                    }],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("IrExpression".to_string()),
                    field: vec![
                        field("type", 2, Label::Required, Type::Int32),
                        FieldDescriptorProto {
                            options: Some(FieldOptions {
                                packed: Some(true),
                                ..Default::default()
                            }),
                            ..field("offsets", 3, Label::Repeated, Type::Sint32)
                        },
                        FieldDescriptorProto {
                            default_value: Some("a\\001\\x02\\n".to_string()),
                            ..field("raw", 4, Label::Optional, Type::Bytes)
                        },
                    ],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_imports_nested_types_and_defaults() {
        let schema = Schema::from_file_descriptor_set(&single_file_set(ir_file())).unwrap();
        assert_eq!(schema.len(), 4);

        let set_field = MessageType::by_name(&schema, "ir.IrSetField").unwrap();
        let origin = set_field.nested_type(3).unwrap();
        assert_eq!(origin.name(), "ir.IrSetField.Origin");

        let kind = origin.model().field(1).unwrap();
        assert_eq!(kind.kind(), FieldKind::Scalar(ScalarKind::Enum));
        assert_eq!(kind.explicit_default(), Some(&Value::I32(3)));

        let access = set_field.nested_type(1).unwrap();
        let symbol = access.model().field(1).unwrap();
        assert!(symbol.is_required());
        assert_eq!(symbol.explicit_default(), Some(&Value::I64(-5)));

        let expression = set_field.nested_type(2).unwrap();
        assert!(expression.model().field(3).unwrap().is_packed());
        assert_eq!(
            expression.model().field(4).unwrap().explicit_default(),
            Some(&Value::Bytes(Bytes::from_static(b"a\x01\x02\n")))
        );
    }

    #[test]
    fn test_proto3_repeated_scalars_default_to_packed() {
        let file = FileDescriptorProto {
            name: Some("p3.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Numbers".to_string()),
                field: vec![
                    field("a", 1, Label::Repeated, Type::Int32),
                    FieldDescriptorProto {
                        options: Some(FieldOptions {
                            packed: Some(false),
                            ..Default::default()
                        }),
                        ..field("b", 2, Label::Repeated, Type::Int32)
                    },
                    field("c", 3, Label::Repeated, Type::String),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let schema = Schema::from_file_descriptor_set(&single_file_set(file)).unwrap();
        let numbers = MessageType::by_name(&schema, "Numbers").unwrap();
        let model = numbers.model();
        assert!(model.field(1).unwrap().is_packed());
        assert!(!model.field(2).unwrap().is_packed());
        assert!(!model.field(3).unwrap().is_packed());
    }

    #[test]
    fn test_rejects_groups_and_duplicates() {
        let mut file = ir_file();
        file.message_type[1]
            .field
            .push(field("legacy", 9, Label::Optional, Type::Group));
        let err = Schema::from_file_descriptor_set(&single_file_set(file)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDescriptor { .. }));

        let set = FileDescriptorSet {
            file: vec![ir_file(), ir_file()],
        };
        let err = Schema::from_file_descriptor_set(&set).unwrap_err();
        assert!(matches!(err, Error::DuplicateMessageType { .. }));
    }

    #[test]
    fn test_round_trip_through_serialized_set() {
        let bytes = single_file_set(ir_file()).encode_to_vec();
        let schema = Schema::from_descriptor_set_bytes(&bytes).unwrap();
        assert!(schema.lookup("ir.IrExpression").is_some());

        assert!(matches!(
            Schema::from_descriptor_set_bytes(&[0xFF]),
            Err(Error::DescriptorParse(_))
        ));
    }

    #[test]
    fn test_load_descriptor_set_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.pb");
        std::fs::write(&path, single_file_set(ir_file()).encode_to_vec()).unwrap();
        let schema = load_descriptor_set(&path).unwrap();
        assert_eq!(schema.len(), 4);

        let err = load_descriptor_set(dir.path().join("missing.pb")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_unescape_bytes() {
        assert_eq!(unescape_bytes("plain").unwrap(), Bytes::from_static(b"plain"));
        assert_eq!(unescape_bytes("\\377\\0").unwrap(), Bytes::from_static(&[0xFF, 0]));
        assert_eq!(unescape_bytes("\\x4A\\\"").unwrap(), Bytes::from_static(b"J\""));
        assert!(unescape_bytes("\\q").is_none());
        assert!(unescape_bytes("trailing\\").is_none());
    }
}
