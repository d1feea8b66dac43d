//! Low-level wire format primitives.
//!
//! ## Wire Format Overview
//!
//! A message is a flat sequence of `(tag, payload)` records:
//! - A varint "tag" holding `field_number << 3 | wire_type`
//! - The payload, shaped by the wire type
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: FIXED64 (fixed64, sfixed64, double), little-endian
//! - 2: LENGTH_DELIMITED (string, bytes, nested messages, packed runs)
//! - 5: FIXED32 (fixed32, sfixed32, float), little-endian
//!
//! Codes 3 and 4 open and close a group. Groups are never declared by a
//! schema, but [`ByteCursor::skip_group`] steps over one so it can be kept as
//! an unknown field. Codes 6 and 7 are not supported. [`decode_tag`] does not
//! reject any of them; [`Tag::wire_type`] returns `None` and the decoder decides.

pub mod cursor;

pub use cursor::ByteCursor;

use bytes::BufMut;
use thiserror::Error;

/// Maximum valid field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Wire code opening a group
pub const START_GROUP: u8 = 3;

/// Wire code closing a group
pub const END_GROUP: u8 = 4;

/// A varint never needs more than this many bytes for a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

/// Supported wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    Fixed64 = 1,
    /// Length-prefixed byte range
    LengthDelimited = 2,
    /// 32-bit fixed-width
    Fixed32 = 5,
}

impl WireType {
    /// Returns the 3-bit code stored in a tag
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Maps a 3-bit code back to a supported wire type
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "length-delimited",
            WireType::Fixed32 => "fixed32",
        }
    }
}

/// A decoded `(field number, wire type)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    field_number: u32,
    wire_code: u8,
}

impl Tag {
    /// Creates a tag for a supported wire type
    pub fn new(field_number: u32, wire_type: WireType) -> Self {
        Self {
            field_number,
            wire_code: wire_type.code(),
        }
    }

    /// The field number
    pub fn field_number(&self) -> u32 {
        self.field_number
    }

    /// The raw 3-bit wire type code
    pub fn wire_code(&self) -> u8 {
        self.wire_code
    }

    /// The wire type, or `None` for an unsupported code
    pub fn wire_type(&self) -> Option<WireType> {
        WireType::from_code(self.wire_code)
    }
}

/// Packs a field number and wire type into a raw tag value
pub fn encode_tag(field_number: u32, wire_type: WireType) -> u64 {
    (u64::from(field_number) << 3) | u64::from(wire_type.code())
}

/// Splits a raw tag value.
///
/// Returns `None` if the field number is 0 or above [`MAX_FIELD_NUMBER`].
pub fn decode_tag(raw: u64) -> Option<Tag> {
    let field_number = raw >> 3;
    if field_number == 0 || field_number > u64::from(MAX_FIELD_NUMBER) {
        return None;
    }
    Some(Tag {
        field_number: field_number as u32,
        wire_code: (raw & 0x07) as u8,
    })
}

/// Writes a tag
pub fn write_tag(field_number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    encode_varint(encode_tag(field_number, wire_type), buf);
}

/// Bytes taken by the tag of `field_number` (the wire type never changes it)
pub fn tag_len(field_number: u32) -> usize {
    encoded_len_varint(encode_tag(field_number, WireType::Varint))
}

/// Varint decoding failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// Input ended before the final byte
    #[error("varint runs past end of input")]
    Truncated,
    /// More than ten bytes, or bits beyond 64
    #[error("varint is longer than 64 bits")]
    Overlong,
}

/// Writes a base-128 varint
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Bytes needed to encode `value` as a varint
pub fn encoded_len_varint(value: u64) -> usize {
    ((64 - (value | 1).leading_zeros()) as usize + 6) / 7
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut result: u64 = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(VarintError::Overlong);
        }
        // The tenth byte may only contribute the top bit
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(VarintError::Overlong);
        }

        result |= u64::from(byte & 0x7F) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(VarintError::Truncated)
}

/// ZigZag-encodes a signed 32-bit value
pub fn encode_zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`encode_zigzag32`]
pub fn decode_zigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// ZigZag-encodes a signed 64-bit value
pub fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`encode_zigzag64`]
pub fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
