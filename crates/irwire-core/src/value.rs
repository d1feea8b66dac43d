//! Field values and per-kind scalar codecs.

use crate::error::DecodeError;
use crate::message::Message;
use crate::schema::ScalarKind;
use crate::wire::{
    decode_zigzag32, decode_zigzag64, encode_varint, encode_zigzag32, encode_zigzag64,
    encoded_len_varint, ByteCursor,
};
use bytes::{BufMut, Bytes};

/// A value held in a field slot.
///
/// Scalar kinds share representations: `int32`, `sint32`, `sfixed32` and
/// `enum` all hold [`Value::I32`]; the field's [`ScalarKind`] decides the
/// wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// int32, sint32, sfixed32, enum
    I32(i32),
    /// int64, sint64, sfixed64
    I64(i64),
    /// uint32, fixed32
    U32(u32),
    /// uint64, fixed64
    U64(u64),
    /// bool
    Bool(bool),
    /// float
    F32(f32),
    /// double
    F64(f64),
    /// string
    String(String),
    /// bytes
    Bytes(Bytes),
    /// A nested message
    Message(Message),
    /// Elements of a repeated field
    List(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::Bool(_) => "bool",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Message(_) => "message",
            Value::List(_) => "list",
        }
    }

    /// Returns the value if this is an `I32`
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is an `I64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is a `U32`
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is a `U64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is a `Bool`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is an `F32`
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if this is an `F64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string if this is a `String`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the bytes if this is a `Bytes`
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the message if this is a `Message`
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a `List`
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    bool => Bool,
    f32 => F32,
    f64 => F64,
    String => String,
    &str => String,
    Bytes => Bytes,
    Vec<u8> => Bytes,
    Message => Message,
    Vec<Value> => List,
}

impl ScalarKind {
    /// The value a field of this kind reads as when unset and no explicit
    /// default was declared
    pub fn default_value(self) -> Value {
        match self {
            ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32 | ScalarKind::Enum => {
                Value::I32(0)
            }
            ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64 => Value::I64(0),
            ScalarKind::UInt32 | ScalarKind::Fixed32 => Value::U32(0),
            ScalarKind::UInt64 | ScalarKind::Fixed64 => Value::U64(0),
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::Float => Value::F32(0.0),
            ScalarKind::Double => Value::F64(0.0),
            ScalarKind::String => Value::String(String::new()),
            ScalarKind::Bytes => Value::Bytes(Bytes::new()),
        }
    }

    /// Whether `value` is the representation this kind holds
    pub fn accepts(self, value: &Value) -> bool {
        std::mem::discriminant(&self.default_value()) == std::mem::discriminant(value)
    }

    /// Reads one value of this kind; the tag has already been consumed
    pub(crate) fn read(self, cursor: &mut ByteCursor, limit: usize) -> Result<Value, DecodeError> {
        let value = match self {
            ScalarKind::Int32 | ScalarKind::Enum => Value::I32(cursor.read_varint()? as i32),
            ScalarKind::Int64 => Value::I64(cursor.read_varint()? as i64),
            ScalarKind::UInt32 => Value::U32(cursor.read_varint()? as u32),
            ScalarKind::UInt64 => Value::U64(cursor.read_varint()?),
            ScalarKind::SInt32 => Value::I32(decode_zigzag32(cursor.read_varint()? as u32)),
            ScalarKind::SInt64 => Value::I64(decode_zigzag64(cursor.read_varint()?)),
            ScalarKind::Bool => Value::Bool(cursor.read_varint()? != 0),
            ScalarKind::Fixed32 => Value::U32(cursor.read_fixed32()?),
            ScalarKind::SFixed32 => Value::I32(cursor.read_fixed32()? as i32),
            ScalarKind::Float => Value::F32(f32::from_bits(cursor.read_fixed32()?)),
            ScalarKind::Fixed64 => Value::U64(cursor.read_fixed64()?),
            ScalarKind::SFixed64 => Value::I64(cursor.read_fixed64()? as i64),
            ScalarKind::Double => Value::F64(f64::from_bits(cursor.read_fixed64()?)),
            ScalarKind::String => {
                let offset = cursor.offset();
                let raw = cursor.read_length_delimited(limit)?;
                let text = String::from_utf8(raw.to_vec())
                    .map_err(|_| DecodeError::InvalidUtf8 { offset })?;
                Value::String(text)
            }
            ScalarKind::Bytes => Value::Bytes(cursor.read_length_delimited(limit)?),
        };
        Ok(value)
    }

    /// Payload size of `value` without the tag
    ///
    /// # Panics
    ///
    /// Panics if `value` is not accepted by this kind. Builders validate values
    /// on the way in, so this only fires on a logic error.
    pub(crate) fn encoded_len(self, value: &Value) -> usize {
        match (self, value) {
            (ScalarKind::Int32 | ScalarKind::Enum, Value::I32(v)) => {
                encoded_len_varint(i64::from(*v) as u64)
            }
            (ScalarKind::SInt32, Value::I32(v)) => encoded_len_varint(u64::from(encode_zigzag32(*v))),
            (ScalarKind::SFixed32, Value::I32(_)) => 4,
            (ScalarKind::Int64, Value::I64(v)) => encoded_len_varint(*v as u64),
            (ScalarKind::SInt64, Value::I64(v)) => encoded_len_varint(encode_zigzag64(*v)),
            (ScalarKind::SFixed64, Value::I64(_)) => 8,
            (ScalarKind::UInt32, Value::U32(v)) => encoded_len_varint(u64::from(*v)),
            (ScalarKind::Fixed32, Value::U32(_)) => 4,
            (ScalarKind::UInt64, Value::U64(v)) => encoded_len_varint(*v),
            (ScalarKind::Fixed64, Value::U64(_)) => 8,
            (ScalarKind::Bool, Value::Bool(_)) => 1,
            (ScalarKind::Float, Value::F32(_)) => 4,
            (ScalarKind::Double, Value::F64(_)) => 8,
            (ScalarKind::String, Value::String(s)) => encoded_len_varint(s.len() as u64) + s.len(),
            (ScalarKind::Bytes, Value::Bytes(b)) => encoded_len_varint(b.len() as u64) + b.len(),
            (kind, value) => mismatch(kind, value),
        }
    }

    /// Writes the payload of `value` without the tag
    ///
    /// # Panics
    ///
    /// Panics under the same condition as [`encoded_len`](Self::encoded_len).
    pub(crate) fn write(self, value: &Value, buf: &mut impl BufMut) {
        match (self, value) {
            (ScalarKind::Int32 | ScalarKind::Enum, Value::I32(v)) => {
                encode_varint(i64::from(*v) as u64, buf)
            }
            (ScalarKind::SInt32, Value::I32(v)) => encode_varint(u64::from(encode_zigzag32(*v)), buf),
            (ScalarKind::SFixed32, Value::I32(v)) => buf.put_i32_le(*v),
            (ScalarKind::Int64, Value::I64(v)) => encode_varint(*v as u64, buf),
            (ScalarKind::SInt64, Value::I64(v)) => encode_varint(encode_zigzag64(*v), buf),
            (ScalarKind::SFixed64, Value::I64(v)) => buf.put_i64_le(*v),
            (ScalarKind::UInt32, Value::U32(v)) => encode_varint(u64::from(*v), buf),
            (ScalarKind::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
            (ScalarKind::UInt64, Value::U64(v)) => encode_varint(*v, buf),
            (ScalarKind::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
            (ScalarKind::Bool, Value::Bool(v)) => buf.put_u8(u8::from(*v)),
            (ScalarKind::Float, Value::F32(v)) => buf.put_f32_le(*v),
            (ScalarKind::Double, Value::F64(v)) => buf.put_f64_le(*v),
            (ScalarKind::String, Value::String(s)) => {
                encode_varint(s.len() as u64, buf);
                buf.put_slice(s.as_bytes());
            }
            (ScalarKind::Bytes, Value::Bytes(b)) => {
                encode_varint(b.len() as u64, buf);
                buf.put_slice(b);
            }
            (kind, value) => mismatch(kind, value),
        }
    }
}

fn mismatch(kind: ScalarKind, value: &Value) -> ! {
    panic!(
        "{} value stored in a {} field",
        value.kind_name(),
        kind.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(kind: ScalarKind, value: impl Into<Value>) -> Vec<u8> {
        let value = value.into();
        let mut buf = Vec::new();
        kind.write(&value, &mut buf);
        assert_eq!(buf.len(), kind.encoded_len(&value));
        buf
    }

    fn decode(kind: ScalarKind, data: Vec<u8>) -> Value {
        let mut cursor = ByteCursor::new(data);
        let value = kind.read(&mut cursor, 1024).unwrap();
        assert!(cursor.is_empty());
        value
    }

    #[test]
    fn test_negative_int32_is_sign_extended() {
        let bytes = encode(ScalarKind::Int32, -1);
        assert_eq!(bytes.len(), 10);
        assert_eq!(decode(ScalarKind::Int32, bytes), Value::I32(-1));
    }

    #[test]
    fn test_zigzag_kinds() {
        assert_eq!(encode(ScalarKind::SInt32, -1), vec![0x01]);
        assert_eq!(encode(ScalarKind::SInt64, -2i64), vec![0x03]);
        assert_eq!(decode(ScalarKind::SInt32, vec![0x03]), Value::I32(-2));
    }

    #[test]
    fn test_fixed_kinds_are_little_endian() {
        assert_eq!(encode(ScalarKind::Fixed32, 1u32), vec![1, 0, 0, 0]);
        assert_eq!(encode(ScalarKind::SFixed64, -1i64), vec![0xFF; 8]);
        assert_eq!(
            decode(ScalarKind::Double, 1.5f64.to_le_bytes().to_vec()),
            Value::F64(1.5)
        );
        assert_eq!(
            decode(ScalarKind::Float, 2.25f32.to_le_bytes().to_vec()),
            Value::F32(2.25)
        );
    }

    #[test]
    fn test_length_delimited_kinds() {
        assert_eq!(encode(ScalarKind::String, "hi"), vec![0x02, b'h', b'i']);
        assert_eq!(
            decode(ScalarKind::Bytes, vec![0x03, 1, 2, 3]),
            Value::Bytes(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut cursor = ByteCursor::new(vec![0x02, 0xC3, 0x28]);
        assert_eq!(
            ScalarKind::String.read(&mut cursor, 1024),
            Err(DecodeError::InvalidUtf8 { offset: 0 })
        );
    }

    #[test]
    fn test_accepts() {
        assert!(ScalarKind::Enum.accepts(&Value::I32(3)));
        assert!(ScalarKind::Fixed64.accepts(&Value::U64(3)));
        assert!(!ScalarKind::Int64.accepts(&Value::I32(3)));
        assert!(!ScalarKind::String.accepts(&Value::Bytes(Bytes::new())));
    }

    #[test]
    #[should_panic(expected = "stored in a bool field")]
    fn test_mismatch_is_a_logic_error() {
        ScalarKind::Bool.encoded_len(&Value::I32(1));
    }
}
