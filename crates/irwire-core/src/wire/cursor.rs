//! Positioned reader over an in-memory byte buffer.

use super::{decode_tag, decode_varint, Tag, VarintError, WireType, END_GROUP, START_GROUP};
use crate::error::DecodeError;
use bytes::Bytes;

/// Reads wire primitives from a [`Bytes`] buffer.
///
/// Offsets reported in errors are absolute: a cursor created for a nested
/// payload with [`ByteCursor::sub_cursor`] keeps counting from the start of
/// the outermost input.
#[derive(Debug, Clone)]
pub struct ByteCursor {
    data: Bytes,
    pos: usize,
    base: usize,
}

impl ByteCursor {
    /// Creates a cursor at the start of `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            base: 0,
        }
    }

    /// Creates a cursor over a payload that started at absolute `offset`
    fn with_base(data: Bytes, base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Absolute offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Position relative to the start of this cursor
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unread byte count
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true when every byte has been read
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated {
            offset: self.offset(),
        }
    }

    /// Reads a varint
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        match decode_varint(&self.data[self.pos..]) {
            Ok((value, len)) => {
                self.pos += len;
                Ok(value)
            }
            Err(VarintError::Truncated) => Err(self.truncated()),
            Err(VarintError::Overlong) => Err(DecodeError::MalformedVarint {
                offset: self.offset(),
            }),
        }
    }

    /// Reads the next tag, or `None` at end of input.
    ///
    /// A tag that is not a well-formed varint, or that names field 0, is an
    /// [`DecodeError::InvalidTag`] rather than end of input.
    pub fn read_tag(&mut self) -> Result<Option<Tag>, DecodeError> {
        if self.is_empty() {
            return Ok(None);
        }
        let start = self.offset();
        let raw = match decode_varint(&self.data[self.pos..]) {
            Ok((raw, len)) => {
                self.pos += len;
                raw
            }
            Err(_) => return Err(DecodeError::InvalidTag { offset: start }),
        };
        decode_tag(raw)
            .map(Some)
            .ok_or(DecodeError::InvalidTag { offset: start })
    }

    /// Reads a little-endian `u32`
    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads a little-endian `u64`
    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let raw = self.read_array::<8>()?;
        Ok(u64::from_le_bytes(raw))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.remaining() < N {
            return Err(self.truncated());
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads a varint length followed by that many bytes.
    ///
    /// The declared length is checked against `limit` before it is checked
    /// against the available input, so an adversarial prefix never drives an
    /// allocation or a long skip.
    pub fn read_length_delimited(&mut self, limit: usize) -> Result<Bytes, DecodeError> {
        let declared = self.read_varint()?;
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);
        if declared > limit {
            return Err(DecodeError::SizeLimitExceeded { declared, limit });
        }
        self.read_bytes(declared)
    }

    /// Reads exactly `len` raw bytes without copying
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        if self.remaining() < len {
            return Err(self.truncated());
        }
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    /// Like [`read_length_delimited`](Self::read_length_delimited) but returns a
    /// cursor over the payload that keeps absolute offsets
    pub fn sub_cursor(&mut self, limit: usize) -> Result<ByteCursor, DecodeError> {
        let declared = self.read_varint()?;
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);
        if declared > limit {
            return Err(DecodeError::SizeLimitExceeded { declared, limit });
        }
        let base = self.offset();
        let payload = self.read_bytes(declared)?;
        Ok(ByteCursor::with_base(payload, base))
    }

    /// Skips the payload of a field whose tag has just been read
    pub fn skip_payload(&mut self, wire_type: WireType, limit: usize) -> Result<(), DecodeError> {
        match wire_type {
            WireType::Varint => self.read_varint().map(drop),
            WireType::Fixed64 => self.read_fixed64().map(drop),
            WireType::Fixed32 => self.read_fixed32().map(drop),
            WireType::LengthDelimited => self.read_length_delimited(limit).map(drop),
        }
    }

    /// Skips a group whose start tag for `field_number` has just been read,
    /// up to and including the matching end tag.
    ///
    /// `depth` is the nesting level of the message holding the group; the
    /// group and every group inside it count one level each against
    /// `recursion_limit`. Length-delimited payloads inside are bounded by
    /// `limit`.
    pub fn skip_group(
        &mut self,
        field_number: u32,
        depth: usize,
        recursion_limit: usize,
        limit: usize,
    ) -> Result<(), DecodeError> {
        let mut open = vec![field_number];
        if depth + open.len() > recursion_limit {
            return Err(DecodeError::RecursionLimitExceeded {
                limit: recursion_limit,
            });
        }

        while let Some(&current) = open.last() {
            let offset = self.offset();
            let Some(tag) = self.read_tag()? else {
                return Err(self.truncated());
            };
            match tag.wire_code() {
                START_GROUP => {
                    open.push(tag.field_number());
                    if depth + open.len() > recursion_limit {
                        return Err(DecodeError::RecursionLimitExceeded {
                            limit: recursion_limit,
                        });
                    }
                }
                END_GROUP if tag.field_number() == current => {
                    open.pop();
                }
                END_GROUP => {
                    return Err(DecodeError::UnmatchedEndGroup {
                        field_number: tag.field_number(),
                        offset,
                    })
                }
                code => match WireType::from_code(code) {
                    Some(wire_type) => self.skip_payload(wire_type, limit)?,
                    None => {
                        return Err(DecodeError::UnsupportedWireType {
                            wire_type: code,
                            offset,
                        })
                    }
                },
            }
        }
        Ok(())
    }

    /// Returns the bytes between relative position `start` and the current position
    pub fn slice_from(&self, start: usize) -> Bytes {
        self.data.slice(start..self.pos)
    }
}
