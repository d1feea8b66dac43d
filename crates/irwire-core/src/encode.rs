//! Encoding messages to the wire format.
//!
//! Present fields are written in ascending field-number order, followed by
//! the preserved unknown-field bytes. Packed repeated fields are written as a
//! single length-delimited run; everything else as one record per value.
//! Nested messages reuse their memoized size for the length prefix.

use crate::message::Message;
use crate::schema::{FieldDescriptor, FieldKind};
use crate::value::Value;
use crate::wire::{encode_varint, encoded_len_varint, tag_len, write_tag, WireType};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Computes the encoded size of `message` without writing anything
pub(crate) fn compute_serialized_size(message: &Message) -> usize {
    let fields: usize = message
        .present_fields()
        .map(|(field, value)| field_len(field, value))
        .sum();
    fields + message.unknown_fields().len()
}

/// Encodes `message` into a new buffer
pub(crate) fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.serialized_size());
    encode_to(message, &mut buf);
    trace!("Encoded '{}' into {} bytes", message.type_name(), buf.len());
    buf.freeze()
}

/// Appends the encoding of `message` to `buf`
pub(crate) fn encode_to(message: &Message, buf: &mut impl BufMut) {
    for (field, value) in message.present_fields() {
        write_field(field, value, buf);
    }
    buf.put_slice(message.unknown_fields());
}

fn field_len(field: &FieldDescriptor, value: &Value) -> usize {
    match value {
        Value::List(items) if field.is_packed() => {
            let payload = packed_payload_len(field, items);
            tag_len(field.number()) + encoded_len_varint(payload as u64) + payload
        }
        Value::List(items) => items
            .iter()
            .map(|item| tag_len(field.number()) + payload_len(field, item))
            .sum(),
        single => tag_len(field.number()) + payload_len(field, single),
    }
}

fn packed_payload_len(field: &FieldDescriptor, items: &[Value]) -> usize {
    items.iter().map(|item| payload_len(field, item)).sum()
}

/// Length of a single value's payload, including the length prefix of
/// length-delimited kinds
fn payload_len(field: &FieldDescriptor, value: &Value) -> usize {
    match (field.kind(), value) {
        (FieldKind::Scalar(kind), value) => kind.encoded_len(value),
        (FieldKind::Message(_), Value::Message(nested)) => {
            let len = nested.serialized_size();
            encoded_len_varint(len as u64) + len
        }
        (FieldKind::Message(_), other) => panic!(
            "{} value stored in message field '{}'",
            other.kind_name(),
            field.name()
        ),
    }
}

fn write_field(field: &FieldDescriptor, value: &Value, buf: &mut impl BufMut) {
    match value {
        Value::List(items) if field.is_packed() => {
            write_tag(field.number(), WireType::LengthDelimited, buf);
            encode_varint(packed_payload_len(field, items) as u64, buf);
            for item in items {
                write_payload(field, item, buf);
            }
        }
        Value::List(items) => {
            for item in items {
                write_tag(field.number(), field.kind().wire_type(), buf);
                write_payload(field, item, buf);
            }
        }
        single => {
            write_tag(field.number(), field.kind().wire_type(), buf);
            write_payload(field, single, buf);
        }
    }
}

fn write_payload(field: &FieldDescriptor, value: &Value, buf: &mut impl BufMut) {
    match (field.kind(), value) {
        (FieldKind::Scalar(kind), value) => kind.write(value, buf),
        (FieldKind::Message(_), Value::Message(nested)) => {
            encode_varint(nested.serialized_size() as u64, buf);
            encode_to(nested, buf);
        }
        (FieldKind::Message(_), other) => panic!(
            "{} value stored in message field '{}'",
            other.kind_name(),
            field.name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::{decode, DecodeOptions};
    use crate::schema::{FieldType, MessageType, ScalarKind, SchemaBuilder};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn sample_type() -> MessageType {
        let mut builder = SchemaBuilder::new();
        builder
            .message("Sample")
            .optional(1, "id", ScalarKind::UInt32)
            .optional(2, "inner", FieldType::message("Sample"))
            .repeated(3, "plain", ScalarKind::Int32)
            .packed(4, "dense", ScalarKind::Fixed32)
            .optional(5, "name", ScalarKind::String);
        let schema = builder.build().unwrap();
        MessageType::by_name(&schema, "Sample").unwrap()
    }

    #[test]
    fn test_fields_written_in_number_order() {
        let ty = sample_type();
        let mut builder = ty.new_builder();
        builder.set(5, "a").unwrap();
        builder.set(1, 3u32).unwrap();
        let message = builder.build().unwrap();
        assert_eq!(&message.encode()[..], &[0x08, 0x03, 0x2A, 0x01, b'a']);
    }

    #[test]
    fn test_repeated_unpacked_and_packed() {
        let ty = sample_type();
        let mut builder = ty.new_builder();
        builder.push(3, 1).unwrap().push(3, 2).unwrap();
        builder.push(4, 1u32).unwrap().push(4, 2u32).unwrap();
        let message = builder.build().unwrap();
        assert_eq!(
            &message.encode()[..],
            &[
                0x18, 0x01, 0x18, 0x02, // plain
                0x22, 0x08, 1, 0, 0, 0, 2, 0, 0, 0, // dense
            ]
        );
        assert_eq!(message.serialized_size(), 14);
    }

    #[test]
    fn test_nested_length_prefix() {
        let ty = sample_type();
        let mut inner = ty.new_builder();
        inner.set(1, 300u32).unwrap();
        let mut outer = ty.new_builder();
        outer.set(2, inner.build().unwrap()).unwrap();
        let message = outer.build().unwrap();
        assert_eq!(&message.encode()[..], &[0x12, 0x03, 0x08, 0xAC, 0x02]);
    }

    #[test]
    fn test_empty_nested_message_is_still_present() {
        let ty = sample_type();
        let mut outer = ty.new_builder();
        outer.set(2, ty.default_instance()).unwrap();
        let message = outer.build().unwrap();
        assert_eq!(&message.encode()[..], &[0x12, 0x00]);

        let decoded = decode(message.encode(), &ty, &DecodeOptions::new(64)).unwrap();
        assert!(decoded.has(2));
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_unknown_fields_are_appended() {
        let ty = sample_type();
        let bytes = vec![0x08, 0x01, 0x50, 0x07, 0x2A, 0x01, b'z'];
        let message = decode(bytes, &ty, &DecodeOptions::new(64)).unwrap();
        assert_eq!(&message.unknown_fields()[..], &[0x50, 0x07]);
        assert_eq!(
            &message.encode()[..],
            &[0x08, 0x01, 0x2A, 0x01, b'z', 0x50, 0x07]
        );
    }

    #[test]
    fn test_size_matches_encoding() {
        let ty = sample_type();
        let mut inner = ty.new_builder();
        inner.set(5, "nested").unwrap().push(4, 9u32).unwrap();
        let mut outer = ty.new_builder();
        outer
            .set(2, inner.build().unwrap())
            .unwrap()
            .push(3, -1)
            .unwrap()
            .set(1, u32::MAX)
            .unwrap();
        let message = outer.build().unwrap();
        let size = message.serialized_size();
        assert_eq!(message.encode().len(), size);
        assert_eq!(message.serialized_size(), size);
        assert_eq!(message.get(3), Some(&Value::List(vec![Value::I32(-1)])));
    }
}
