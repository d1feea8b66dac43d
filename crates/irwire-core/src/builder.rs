//! Mutable staging area for assembling messages.
//!
//! A [`Builder`] owns its field values exclusively. Setters validate each
//! value against the field's declared kind and set the presence bit; the
//! merge operations follow the usual rules:
//!
//! - singular scalar: the incoming value overwrites
//! - singular nested message: merged recursively into the existing value
//! - repeated: incoming elements are appended
//! - unknown field bytes: concatenated, never interpreted
//!
//! [`Builder::build`] is the only way to obtain a message that is guaranteed
//! to be initialized.

use crate::decode::{self, DecodeOptions};
use crate::error::{Error, Result, UninitializedError};
use crate::message::Message;
use crate::presence::FieldPresence;
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, MessageType};
use crate::value::Value;
use crate::wire::ByteCursor;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use tracing::trace;

/// Mutable counterpart of [`Message`].
///
/// Not shareable while being mutated; hand out the result of
/// [`build`](Self::build) instead. The builder stays usable afterwards, and
/// later mutations never affect messages already built from it.
#[derive(Debug, Clone)]
pub struct Builder {
    ty: MessageType,
    presence: FieldPresence,
    slots: Vec<Option<Value>>,
    unknown: BytesMut,
    /// Singular nested messages still being decoded, by slot index
    open_messages: BTreeMap<usize, Builder>,
}

/// Copyable facts about a field, so slots can be mutated while they are used
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotInfo {
    pub(crate) index: usize,
    pub(crate) cardinality: Cardinality,
    pub(crate) kind: FieldKind,
}

impl SlotInfo {
    pub(crate) fn of(field: &FieldDescriptor) -> Self {
        Self {
            index: field.index(),
            cardinality: field.cardinality(),
            kind: field.kind(),
        }
    }
}

impl Builder {
    /// Creates an empty builder for `ty`
    pub fn new(ty: MessageType) -> Self {
        let len = ty.model().fields().len();
        Self {
            ty,
            presence: FieldPresence::new(len),
            slots: vec![None; len],
            unknown: BytesMut::new(),
            open_messages: BTreeMap::new(),
        }
    }

    pub(crate) fn from_message(message: &Message) -> Self {
        Self {
            ty: message.message_type().clone(),
            presence: message.presence().clone(),
            slots: message.slots().to_vec(),
            unknown: BytesMut::from(&message.unknown_fields()[..]),
            open_messages: BTreeMap::new(),
        }
    }

    /// The type being built
    pub fn message_type(&self) -> &MessageType {
        &self.ty
    }

    fn slot_info(&self, number: u32) -> Result<SlotInfo> {
        self.ty
            .model()
            .field(number)
            .map(SlotInfo::of)
            .ok_or_else(|| Error::unknown_field(self.ty.name(), number))
    }

    fn field_path(&self, info: SlotInfo) -> String {
        format!("{}.{}", self.ty.name(), self.ty.model().fields()[info.index].name())
    }

    /// Checks a single (non-list) value against the field's kind
    fn check_element(&self, info: SlotInfo, value: &Value) -> Result<()> {
        let ok = match (info.kind, value) {
            (FieldKind::Scalar(kind), value) => kind.accepts(value),
            (FieldKind::Message(id), Value::Message(message)) => {
                *message.message_type() == self.ty.related(id)
            }
            (FieldKind::Message(_), _) => false,
        };
        if ok {
            return Ok(());
        }
        let expected = match info.kind {
            FieldKind::Scalar(kind) => kind.as_str().to_string(),
            FieldKind::Message(id) => format!("message '{}'", self.ty.related(id).name()),
        };
        let found = match value {
            Value::Message(message) => format!("message '{}'", message.type_name()),
            other => other.kind_name().to_string(),
        };
        Err(Error::type_mismatch(self.field_path(info), expected, found))
    }

    /// Checks a value as a whole-field assignment
    fn check_value(&self, info: SlotInfo, value: &Value) -> Result<()> {
        match (info.cardinality, value) {
            (Cardinality::Repeated, Value::List(items)) => {
                items.iter().try_for_each(|item| self.check_element(info, item))
            }
            (Cardinality::Repeated, other) => Err(Error::type_mismatch(
                self.field_path(info),
                "list",
                other.kind_name(),
            )),
            (_, value) => self.check_element(info, value),
        }
    }

    /// Whether field `number` is set
    pub fn has(&self, number: u32) -> bool {
        self.slot_info(number)
            .is_ok_and(|info| self.presence.get(info.index))
    }

    /// The current value of field `number`, if set
    pub fn get(&self, number: u32) -> Option<&Value> {
        let info = self.slot_info(number).ok()?;
        if self.presence.get(info.index) {
            self.slots[info.index].as_ref()
        } else {
            None
        }
    }

    /// Assigns field `number` and sets its presence bit.
    ///
    /// Repeated fields take a [`Value::List`] that replaces every element;
    /// an empty list leaves the field unset.
    pub fn set(&mut self, number: u32, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        let info = self.slot_info(number)?;
        self.check_value(info, &value)?;
        self.store(info, value);
        Ok(self)
    }

    /// Appends one element to repeated field `number`
    pub fn push(&mut self, number: u32, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        let info = self.slot_info(number)?;
        if info.cardinality != Cardinality::Repeated {
            return Err(Error::type_mismatch(
                self.field_path(info),
                "repeated field",
                format!("{} field", info.cardinality.as_str()),
            ));
        }
        self.check_element(info, &value)?;
        self.push_element(info, value);
        Ok(self)
    }

    /// Merges `value` into field `number` with the merge rules of this
    /// module: overwrite a scalar, merge a nested message, append to a
    /// repeated field (either a single element or a [`Value::List`]).
    pub fn merge_field(&mut self, number: u32, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        let info = self.slot_info(number)?;
        match (info.cardinality, &value) {
            (Cardinality::Repeated, Value::List(_)) => self.check_value(info, &value)?,
            _ => self.check_element(info, &value)?,
        }
        self.merge_value(info, value);
        Ok(self)
    }

    /// Unsets field `number`
    pub fn clear_field(&mut self, number: u32) -> Result<&mut Self> {
        let info = self.slot_info(number)?;
        self.presence.clear(info.index);
        self.slots[info.index] = None;
        Ok(self)
    }

    /// Unsets every field and drops unknown bytes
    pub fn clear(&mut self) -> &mut Self {
        self.presence.clear_all();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.unknown.clear();
        self
    }

    /// Merges every present field of `other` into this builder.
    ///
    /// `other` must be of the same message type.
    pub fn merge_from(&mut self, other: &Message) -> Result<&mut Self> {
        if *other.message_type() != self.ty {
            return Err(Error::type_mismatch(
                self.ty.name(),
                format!("message '{}'", self.ty.name()),
                format!("message '{}'", other.type_name()),
            ));
        }
        self.merge_message(other);
        Ok(self)
    }

    /// Merges the current contents of another builder
    pub fn merge_from_builder(&mut self, other: &Builder) -> Result<&mut Self> {
        self.merge_from(&other.build_partial())
    }

    /// Decodes `bytes` on top of the current contents.
    ///
    /// Fields read from the stream merge exactly like
    /// [`merge_from`](Self::merge_from). Required fields are not checked;
    /// call [`build`](Self::build) for that. On error the builder keeps
    /// everything read before the failure.
    pub fn merge_from_bytes(
        &mut self,
        bytes: impl Into<Bytes>,
        options: &DecodeOptions,
    ) -> Result<&mut Self> {
        let bytes = bytes.into();
        decode::check_input_size(bytes.len(), options)?;
        let mut cursor = ByteCursor::new(bytes);
        decode::merge_fields(self, &mut cursor, options, 0)?;
        Ok(self)
    }

    /// Unknown field bytes collected so far
    pub fn unknown_fields(&self) -> &[u8] {
        &self.unknown
    }

    /// Replaces the unknown field bytes
    pub fn set_unknown_fields(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.unknown.clear();
        self.unknown.extend_from_slice(bytes.as_ref());
        self
    }

    /// Whether [`build`](Self::build) would succeed
    pub fn is_initialized(&self) -> bool {
        self.build_partial().is_initialized()
    }

    /// Produces an immutable message, failing if any required field is unset
    /// at any nesting level
    pub fn build(&self) -> std::result::Result<Message, UninitializedError> {
        let message = self.build_partial();
        if message.is_initialized() {
            return Ok(message);
        }
        Err(UninitializedError {
            type_name: self.ty.name().to_string(),
            missing: message.missing_fields(),
        })
    }

    /// Produces an immutable message without the initialization check
    pub fn build_partial(&self) -> Message {
        Message::from_parts(
            self.ty.clone(),
            self.presence.clone(),
            self.slots.clone().into_boxed_slice(),
            Bytes::copy_from_slice(&self.unknown),
        )
    }

    /// The present nested message at `index`, if any
    pub(crate) fn present_message(&self, index: usize) -> Option<&Message> {
        if !self.presence.get(index) {
            return None;
        }
        self.slots[index].as_ref().and_then(Value::as_message)
    }

    /// Stores an already validated value
    pub(crate) fn store(&mut self, info: SlotInfo, value: Value) {
        let present = !matches!(&value, Value::List(items) if items.is_empty());
        if present {
            self.presence.set(info.index);
            self.slots[info.index] = Some(value);
        } else {
            self.presence.clear(info.index);
            self.slots[info.index] = None;
        }
    }

    /// Appends an already validated element
    pub(crate) fn push_element(&mut self, info: SlotInfo, value: Value) {
        let index = info.index;
        if self.presence.get(index) {
            if let Some(Value::List(items)) = self.slots[index].as_mut() {
                items.push(value);
                return;
            }
        }
        self.slots[index] = Some(Value::List(vec![value]));
        self.presence.set(index);
    }

    /// The builder for the singular nested message at `index`, kept open
    /// across occurrences so each one merges in place. Seeded from the
    /// present value on first use. Must be followed by
    /// [`close_open_messages`](Self::close_open_messages).
    pub(crate) fn open_message(&mut self, index: usize, ty: MessageType) -> &mut Builder {
        let nested = match self.open_messages.remove(&index) {
            Some(open) => {
                trace!(
                    "Nested '{}' occurred again in '{}', merging",
                    ty.name(),
                    self.ty.name()
                );
                open
            }
            None => match self.present_message(index) {
                Some(existing) => existing.to_builder(),
                None => ty.new_builder(),
            },
        };
        self.presence.set(index);
        self.open_messages.entry(index).or_insert(nested)
    }

    /// Builds every open nested message, innermost first, into its slot
    pub(crate) fn close_open_messages(&mut self) {
        for (index, mut nested) in std::mem::take(&mut self.open_messages) {
            nested.close_open_messages();
            self.slots[index] = Some(Value::Message(nested.build_partial()));
            self.presence.set(index);
        }
    }

    pub(crate) fn append_unknown(&mut self, bytes: &[u8]) {
        self.unknown.extend_from_slice(bytes);
    }

    fn merge_value(&mut self, info: SlotInfo, value: Value) {
        match (info.cardinality, value) {
            (Cardinality::Repeated, Value::List(items)) => {
                for item in items {
                    self.push_element(info, item);
                }
            }
            (Cardinality::Repeated, item) => self.push_element(info, item),
            (_, Value::Message(incoming)) => {
                let merged = match self.present_message(info.index) {
                    Some(existing) => {
                        trace!(
                            "Merging nested '{}' into existing value",
                            existing.type_name()
                        );
                        let mut nested = existing.to_builder();
                        nested.merge_message(&incoming);
                        nested.build_partial()
                    }
                    None => incoming,
                };
                self.store(info, Value::Message(merged));
            }
            (_, scalar) => self.store(info, scalar),
        }
    }

    /// Merges a message already known to be of this builder's type
    fn merge_message(&mut self, other: &Message) {
        for (field, value) in other.present_fields() {
            self.merge_value(SlotInfo::of(field), value.clone());
        }
        self.unknown.extend_from_slice(other.unknown_fields());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, ScalarKind, SchemaBuilder};

    fn schema_types() -> (MessageType, MessageType) {
        let mut builder = SchemaBuilder::new();
        builder
            .message("Outer")
            .required(1, "x", FieldType::message("Inner"))
            .optional(2, "count", ScalarKind::UInt32)
            .repeated(3, "tags", ScalarKind::String);
        builder
            .message("Inner")
            .optional(1, "p", ScalarKind::Int32)
            .optional(2, "q", ScalarKind::Int32);
        let schema = builder.build().unwrap();
        (
            MessageType::by_name(&schema, "Outer").unwrap(),
            MessageType::by_name(&schema, "Inner").unwrap(),
        )
    }

    fn inner(ty: &MessageType, number: u32, value: i32) -> Message {
        let mut builder = ty.new_builder();
        builder.set(number, value).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_required_gate() {
        let (outer, inner_ty) = schema_types();
        let mut builder = outer.new_builder();
        builder.set(2, 5u32).unwrap();

        let err = builder.build().unwrap_err();
        assert_eq!(err.type_name, "Outer");
        assert_eq!(err.missing.iter().collect::<Vec<_>>(), vec!["x"]);

        builder.set(1, inner(&inner_ty, 1, 1)).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_merge_unions_nested_fields() {
        let (outer, inner_ty) = schema_types();

        let mut a = outer.new_builder();
        a.set(1, inner(&inner_ty, 1, 1)).unwrap();
        let a = a.build().unwrap();

        let mut b = outer.new_builder();
        b.set(1, inner(&inner_ty, 2, 2)).unwrap();
        let b = b.build().unwrap();

        let mut merged = outer.new_builder();
        merged.merge_from(&a).unwrap().merge_from(&b).unwrap();

        let x = merged.get(1).and_then(Value::as_message).unwrap();
        assert_eq!(x.get(1), Some(&Value::I32(1)));
        assert_eq!(x.get(2), Some(&Value::I32(2)));
    }

    #[test]
    fn test_merge_scalar_overrides_only_when_present() {
        let (outer, _) = schema_types();
        let mut base = outer.new_builder();
        base.set(2, 7u32).unwrap();

        let empty = outer.default_instance();
        base.merge_from(&empty).unwrap();
        assert_eq!(base.get(2), Some(&Value::U32(7)));

        let mut other = outer.new_builder();
        other.set(2, 9u32).unwrap();
        base.merge_from(&other.build_partial()).unwrap();
        assert_eq!(base.get(2), Some(&Value::U32(9)));
    }

    #[test]
    fn test_repeated_append_and_merge() {
        let (outer, _) = schema_types();
        let mut builder = outer.new_builder();
        builder.push(3, "a").unwrap().push(3, "b").unwrap();

        let mut other = outer.new_builder();
        other.set(3, vec![Value::from("c")]).unwrap();
        builder.merge_from_builder(&other).unwrap();

        let built = builder.build_partial();
        let tags: Vec<&str> = built.repeated(3).iter().filter_map(Value::as_str).collect();
        assert_eq!(tags, vec!["a", "b", "c"]);

        builder.set(3, Vec::<Value>::new()).unwrap();
        assert!(!builder.has(3));
    }

    #[test]
    fn test_unknown_fields_concatenate() {
        let (outer, _) = schema_types();
        let mut a = outer.new_builder();
        a.set_unknown_fields([0x50u8, 0x01]);
        let mut b = outer.new_builder();
        b.set_unknown_fields([0x58u8, 0x02]);

        a.merge_from_builder(&b).unwrap();
        assert_eq!(a.unknown_fields(), &[0x50, 0x01, 0x58, 0x02]);
    }

    #[test]
    fn test_built_messages_are_isolated_from_later_mutation() {
        let (outer, inner_ty) = schema_types();
        let mut builder = outer.new_builder();
        builder.set(1, inner(&inner_ty, 1, 1)).unwrap();
        let first = builder.build().unwrap();

        builder.merge_field(1, inner(&inner_ty, 2, 2)).unwrap();
        builder.set(2, 3u32).unwrap();
        let second = builder.build().unwrap();

        assert!(!first.message(1).unwrap().has(2));
        assert!(!first.has(2));
        assert!(second.message(1).unwrap().has(2));
    }

    #[test]
    fn test_type_checks() {
        let (outer, inner_ty) = schema_types();
        let mut builder = outer.new_builder();

        assert!(matches!(builder.set(2, 1i32), Err(Error::TypeMismatch { .. })));
        assert!(matches!(builder.set(9, 1i32), Err(Error::UnknownField { number: 9, .. })));
        assert!(matches!(builder.push(2, 1u32), Err(Error::TypeMismatch { .. })));
        assert!(matches!(builder.set(3, "single"), Err(Error::TypeMismatch { .. })));

        let inner_message = inner_ty.default_instance();
        assert!(matches!(
            builder.set(1, outer.default_instance()),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(builder.set(1, inner_message.clone()).is_ok());
        assert!(matches!(
            builder.merge_from(&inner_message),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_clear() {
        let (outer, inner_ty) = schema_types();
        let mut builder = outer.new_builder();
        builder.set(1, inner(&inner_ty, 1, 1)).unwrap();
        builder.set(2, 1u32).unwrap();
        builder.set_unknown_fields([0x50u8, 0x01]);

        builder.clear_field(2).unwrap();
        assert!(!builder.has(2));
        assert!(builder.has(1));

        builder.clear();
        assert!(!builder.has(1));
        assert!(builder.unknown_fields().is_empty());
    }
}
