//! Schema-driven decoding.
//!
//! ## Algorithm Overview
//!
//! 1. Read a tag; end of input ends the message
//! 2. If the field number is declared and the wire type matches, read the
//!    payload into the slot (nested messages recurse, re-occurrences merge)
//! 3. Otherwise copy the raw tag and payload into the unknown-field bytes;
//!    groups are skipped to their end tag and copied the same way
//! 4. Build the nested messages that were merged in place
//! 5. After the loop, check that every required field is set
//!
//! Every failure is returned as a [`DecodeFailure`] that carries whatever
//! was read before it.

use crate::builder::{Builder, SlotInfo};
use crate::error::{DecodeError, DecodeFailure};
use crate::message::Message;
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, MessageType, ScalarKind};
use crate::value::Value;
use crate::wire::{ByteCursor, WireType, END_GROUP, START_GROUP};
use bytes::Bytes;
use tracing::{debug, trace};

/// Default maximum nesting depth, matching common protobuf runtimes
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Bounds applied while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Largest accepted input, and largest accepted length-delimited payload
    pub max_message_size: usize,
    /// Deepest accepted message nesting
    pub recursion_limit: usize,
}

impl DecodeOptions {
    /// Creates options with the given size bound and the default recursion limit.
    ///
    /// There is deliberately no `Default`: the size bound must be chosen by
    /// the caller.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Sets the maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the maximum nesting depth
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }
}

/// Decodes byte streams into messages under a fixed set of [`DecodeOptions`]
#[derive(Debug, Clone)]
pub struct Decoder {
    options: DecodeOptions,
}

impl Decoder {
    /// Creates a decoder
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    /// The options in effect
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decodes a complete message and checks that it is initialized
    pub fn decode(
        &self,
        bytes: impl Into<Bytes>,
        ty: &MessageType,
    ) -> Result<Message, DecodeFailure> {
        let message = self.decode_partial(bytes, ty)?;
        let missing = message.missing_fields();
        if !missing.is_empty() {
            debug!(
                "Decoded '{}' is missing required fields: {}",
                message.type_name(),
                missing
            );
            return Err(DecodeFailure::new(
                DecodeError::MissingRequiredField(missing),
                message,
            ));
        }
        Ok(message)
    }

    /// Decodes a message without the required-field check
    pub fn decode_partial(
        &self,
        bytes: impl Into<Bytes>,
        ty: &MessageType,
    ) -> Result<Message, DecodeFailure> {
        let bytes = bytes.into();
        let mut builder = ty.new_builder();

        if let Err(error) = check_input_size(bytes.len(), &self.options) {
            return Err(DecodeFailure::new(error, builder.build_partial()));
        }

        let input_len = bytes.len();
        let mut cursor = ByteCursor::new(bytes);
        let result = merge_fields(&mut builder, &mut cursor, &self.options, 0);
        let message = builder.build_partial();

        match result {
            Ok(()) => {
                debug!("Decoded '{}' from {} bytes", ty.name(), input_len);
                Ok(message)
            }
            Err(error) => {
                debug!("Failed to decode '{}': {}", ty.name(), error);
                Err(DecodeFailure::new(error, message))
            }
        }
    }
}

/// Decodes `bytes` as a complete, initialized message of type `ty`
pub fn decode(
    bytes: impl Into<Bytes>,
    ty: &MessageType,
    options: &DecodeOptions,
) -> Result<Message, DecodeFailure> {
    Decoder::new(options.clone()).decode(bytes, ty)
}

pub(crate) fn check_input_size(len: usize, options: &DecodeOptions) -> Result<(), DecodeError> {
    if len > options.max_message_size {
        return Err(DecodeError::SizeLimitExceeded {
            declared: len,
            limit: options.max_message_size,
        });
    }
    Ok(())
}

/// Reads records from `cursor` into `builder` until the cursor is exhausted.
///
/// Whatever was read is left in `builder`, including on error.
pub(crate) fn merge_fields(
    builder: &mut Builder,
    cursor: &mut ByteCursor,
    options: &DecodeOptions,
    depth: usize,
) -> Result<(), DecodeError> {
    let result = merge_records(builder, cursor, options, depth);
    builder.close_open_messages();
    result
}

/// The record loop. Singular nested messages stay open in `builder` until
/// [`merge_fields`] closes them, so repeated occurrences merge in place.
fn merge_records(
    builder: &mut Builder,
    cursor: &mut ByteCursor,
    options: &DecodeOptions,
    depth: usize,
) -> Result<(), DecodeError> {
    let ty = builder.message_type().clone();
    let model = ty.model();

    loop {
        let record_start = cursor.position();
        let tag_offset = cursor.offset();
        let Some(tag) = cursor.read_tag()? else {
            return Ok(());
        };
        let Some(wire_type) = tag.wire_type() else {
            if tag.wire_code() != START_GROUP {
                return Err(match tag.wire_code() {
                    END_GROUP => DecodeError::UnmatchedEndGroup {
                        field_number: tag.field_number(),
                        offset: tag_offset,
                    },
                    code => DecodeError::UnsupportedWireType {
                        wire_type: code,
                        offset: tag_offset,
                    },
                });
            }
            cursor.skip_group(
                tag.field_number(),
                depth,
                options.recursion_limit,
                options.max_message_size,
            )?;
            trace!(
                "Preserving unknown group {} of '{}'",
                tag.field_number(),
                ty.name()
            );
            builder.append_unknown(&cursor.slice_from(record_start));
            continue;
        };

        let field = model.field(tag.field_number());
        let handled = match field {
            Some(field) if wire_type == field.kind().wire_type() => {
                let info = SlotInfo::of(field);
                match field.kind() {
                    FieldKind::Scalar(kind) => {
                        let value = kind.read(cursor, options.max_message_size)?;
                        store_scalar(builder, info, value);
                    }
                    FieldKind::Message(id) => {
                        if depth + 1 > options.recursion_limit {
                            return Err(DecodeError::RecursionLimitExceeded {
                                limit: options.recursion_limit,
                            });
                        }
                        let mut payload = cursor.sub_cursor(options.max_message_size)?;
                        let nested_ty = ty.related(id);
                        if info.cardinality == Cardinality::Repeated {
                            let mut nested = nested_ty.new_builder();
                            let result = merge_fields(&mut nested, &mut payload, options, depth + 1);
                            builder.push_element(info, Value::Message(nested.build_partial()));
                            result.map_err(|e| e.nested(field.name()))?;
                        } else {
                            let nested = builder.open_message(info.index, nested_ty);
                            merge_records(nested, &mut payload, options, depth + 1)
                                .map_err(|e| e.nested(field.name()))?;
                        }
                    }
                }
                true
            }
            Some(field) => match packed_element_kind(field, wire_type) {
                Some(kind) => {
                    let info = SlotInfo::of(field);
                    let mut run = cursor.sub_cursor(options.max_message_size)?;
                    while !run.is_empty() {
                        let value = kind.read(&mut run, options.max_message_size)?;
                        builder.push_element(info, value);
                    }
                    true
                }
                None => false,
            },
            None => false,
        };

        if !handled {
            cursor.skip_payload(wire_type, options.max_message_size)?;
            trace!(
                "Preserving unknown field {} ({}) of '{}'",
                tag.field_number(),
                wire_type.as_str(),
                ty.name()
            );
            builder.append_unknown(&cursor.slice_from(record_start));
        }
    }
}

/// The element kind when a length-delimited record is a packed run for a
/// repeated scalar field. Accepted whether or not the field is declared packed.
fn packed_element_kind(field: &FieldDescriptor, wire_type: WireType) -> Option<ScalarKind> {
    match field.kind() {
        FieldKind::Scalar(kind)
            if field.is_repeated()
                && kind.is_packable()
                && wire_type == WireType::LengthDelimited =>
        {
            Some(kind)
        }
        _ => None,
    }
}

/// Stores a freshly read scalar: repeated fields append, singular fields
/// overwrite
fn store_scalar(builder: &mut Builder, info: SlotInfo, value: Value) {
    if info.cardinality == Cardinality::Repeated {
        builder.push_element(info, value);
    } else {
        builder.store(info, value);
    }
}
