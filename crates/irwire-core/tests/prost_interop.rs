//! Byte-level compatibility with prost-generated code.

use irwire_core::{
    decode, Cardinality, DecodeOptions, FieldDecl, FieldType, MessageType, ScalarKind,
    SchemaBuilder, Value,
};
use pretty_assertions::assert_eq;
use prost::Message as _;

#[derive(Clone, PartialEq, prost::Message)]
struct Location {
    #[prost(int64, required, tag = "1")]
    symbol: i64,
    #[prost(string, optional, tag = "2")]
    file: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct Record {
    #[prost(message, optional, tag = "1")]
    location: Option<Location>,
    #[prost(sint32, repeated, packed = "true", tag = "2")]
    offsets: Vec<i32>,
    #[prost(uint64, repeated, packed = "false", tag = "3")]
    ids: Vec<u64>,
    #[prost(fixed32, optional, tag = "4")]
    flags: Option<u32>,
    #[prost(double, optional, tag = "5")]
    weight: Option<f64>,
    #[prost(bool, optional, tag = "6")]
    synthetic: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "7")]
    payload: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "8")]
    children: Vec<Location>,
    #[prost(int32, optional, tag = "9")]
    kind: Option<i32>,
}

fn record_type() -> MessageType {
    let mut builder = SchemaBuilder::new();
    builder
        .message("interop.Location")
        .required(1, "symbol", ScalarKind::Int64)
        .optional(2, "file", ScalarKind::String);
    builder
        .message("interop.Record")
        .optional(1, "location", FieldType::message("interop.Location"))
        .packed(2, "offsets", ScalarKind::SInt32)
        .field(FieldDecl::new(3, "ids", Cardinality::Repeated, ScalarKind::UInt64))
        .optional(4, "flags", ScalarKind::Fixed32)
        .optional(5, "weight", ScalarKind::Double)
        .optional(6, "synthetic", ScalarKind::Bool)
        .optional(7, "payload", ScalarKind::Bytes)
        .repeated(8, "children", FieldType::message("interop.Location"))
        .optional(9, "kind", ScalarKind::Int32);
    let schema = builder.build().unwrap();
    MessageType::by_name(&schema, "interop.Record").unwrap()
}

fn sample_record() -> Record {
    Record {
        location: Some(Location {
            symbol: -17,
            file: Some("Main.kt".to_string()),
        }),
        offsets: vec![0, -1, 1, i32::MIN],
        ids: vec![1, u64::MAX],
        flags: Some(0xDEAD_BEEF),
        weight: Some(0.5),
        synthetic: Some(false),
        payload: Some(vec![0x00, 0xFF]),
        children: vec![
            Location {
                symbol: 1,
                file: None,
            },
            Location {
                symbol: 2,
                file: Some(String::new()),
            },
        ],
        kind: Some(-2),
    }
}

#[test]
fn test_decodes_prost_output_and_reencodes_identically() {
    let ty = record_type();
    let bytes = sample_record().encode_to_vec();

    let message = decode(bytes.clone(), &ty, &DecodeOptions::new(4096)).unwrap();
    let location = message.message(1).unwrap();
    assert_eq!(location.get(1), Some(&Value::I64(-17)));
    assert_eq!(location.get(2).and_then(Value::as_str), Some("Main.kt"));
    assert_eq!(
        message.repeated(2),
        &[
            Value::I32(0),
            Value::I32(-1),
            Value::I32(1),
            Value::I32(i32::MIN)
        ]
    );
    assert_eq!(message.repeated(3), &[Value::U64(1), Value::U64(u64::MAX)]);
    assert_eq!(message.get(4), Some(&Value::U32(0xDEAD_BEEF)));
    assert_eq!(message.get(5), Some(&Value::F64(0.5)));
    assert_eq!(message.get(6), Some(&Value::Bool(false)));
    assert_eq!(message.repeated(8).len(), 2);
    assert_eq!(message.get(9), Some(&Value::I32(-2)));

    assert_eq!(message.serialized_size(), bytes.len());
    assert_eq!(message.encode().to_vec(), bytes);
}

#[test]
fn test_prost_decodes_engine_output() {
    let ty = record_type();
    let location_ty = ty.nested_type(1).unwrap();

    let mut location = location_ty.new_builder();
    location.set(1, 5i64).unwrap();
    let location = location.build().unwrap();

    let mut builder = ty.new_builder();
    builder
        .set(1, location.clone())
        .unwrap()
        .push(2, -3)
        .unwrap()
        .push(2, 4)
        .unwrap()
        .push(3, 7u64)
        .unwrap()
        .set(7, vec![1u8, 2, 3])
        .unwrap()
        .push(8, location)
        .unwrap();
    let message = builder.build().unwrap();

    let decoded = Record::decode(message.encode()).unwrap();
    assert_eq!(
        decoded,
        Record {
            location: Some(Location {
                symbol: 5,
                file: None
            }),
            offsets: vec![-3, 4],
            ids: vec![7],
            payload: Some(vec![1, 2, 3]),
            children: vec![Location {
                symbol: 5,
                file: None
            }],
            ..Default::default()
        }
    );
}

#[test]
fn test_newer_writer_fields_survive_older_reader() {
    // An older schema that only knows the location field
    let mut builder = SchemaBuilder::new();
    builder
        .message("interop.Location")
        .required(1, "symbol", ScalarKind::Int64)
        .optional(2, "file", ScalarKind::String);
    builder
        .message("interop.Record")
        .optional(1, "location", FieldType::message("interop.Location"));
    let schema = builder.build().unwrap();
    let old = MessageType::by_name(&schema, "interop.Record").unwrap();

    let original = sample_record();
    let message = decode(original.encode_to_vec(), &old, &DecodeOptions::new(4096)).unwrap();
    assert!(!message.unknown_fields().is_empty());

    // Unknown bytes are re-emitted after the known fields, which prost accepts
    let reread = Record::decode(message.encode()).unwrap();
    assert_eq!(reread, original);
}

#[test]
fn test_unpacked_input_for_packed_field_is_accepted() {
    let ty = record_type();

    #[derive(Clone, PartialEq, prost::Message)]
    struct LooseOffsets {
        #[prost(sint32, repeated, packed = "false", tag = "2")]
        offsets: Vec<i32>,
    }

    let bytes = LooseOffsets {
        offsets: vec![10, -10],
    }
    .encode_to_vec();
    let message = decode(bytes.clone(), &ty, &DecodeOptions::new(64)).unwrap();
    assert_eq!(message.repeated(2), &[Value::I32(10), Value::I32(-10)]);

    // Re-encoding follows the declaration, so the run comes back packed
    let packed = Record {
        offsets: vec![10, -10],
        ..Default::default()
    }
    .encode_to_vec();
    assert_eq!(message.encode().to_vec(), packed);
    assert_ne!(packed, bytes);
}
