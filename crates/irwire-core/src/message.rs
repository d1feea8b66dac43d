//! Immutable messages.

use crate::builder::Builder;
use crate::encode;
use crate::error::MissingFields;
use crate::presence::FieldPresence;
use crate::schema::{FieldDescriptor, FieldKind, MessageType};
use crate::text;
use crate::value::Value;
use bytes::{BufMut, Bytes};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// An immutable message value.
///
/// Messages are produced by [`Builder::build`], [`Builder::build_partial`]
/// or the [`Decoder`](crate::Decoder). Cloning is cheap: nested messages are
/// shared, never copied, and a message can be sent across threads freely.
///
/// Fields are addressed by number through a uniform protocol:
/// [`has`](Self::has), [`get`](Self::get) and
/// [`get_or_default`](Self::get_or_default).
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

struct MessageInner {
    ty: MessageType,
    presence: FieldPresence,
    /// `Some` exactly where the presence bit is set
    slots: Box<[Option<Value>]>,
    unknown: Bytes,
    serialized_size: OnceLock<usize>,
    initialized: OnceLock<bool>,
}

impl Message {
    pub(crate) fn from_parts(
        ty: MessageType,
        presence: FieldPresence,
        slots: Box<[Option<Value>]>,
        unknown: Bytes,
    ) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                ty,
                presence,
                slots,
                unknown,
                serialized_size: OnceLock::new(),
                initialized: OnceLock::new(),
            }),
        }
    }

    /// The all-defaults instance of `ty`
    pub fn empty(ty: MessageType) -> Self {
        let len = ty.model().fields().len();
        Self::from_parts(
            ty,
            FieldPresence::new(len),
            vec![None; len].into_boxed_slice(),
            Bytes::new(),
        )
    }

    /// The message type
    pub fn message_type(&self) -> &MessageType {
        &self.inner.ty
    }

    /// Fully qualified type name
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    pub(crate) fn presence(&self) -> &FieldPresence {
        &self.inner.presence
    }

    pub(crate) fn slots(&self) -> &[Option<Value>] {
        &self.inner.slots
    }

    fn descriptor(&self, number: u32) -> Option<&FieldDescriptor> {
        self.inner.ty.model().field(number)
    }

    /// Whether field `number` was explicitly set.
    ///
    /// Returns false for numbers the type does not declare.
    pub fn has(&self, number: u32) -> bool {
        self.descriptor(number)
            .is_some_and(|field| self.inner.presence.get(field.index()))
    }

    /// The value of field `number` if it was set
    pub fn get(&self, number: u32) -> Option<&Value> {
        let field = self.descriptor(number)?;
        self.present_value(field)
    }

    fn present_value(&self, field: &FieldDescriptor) -> Option<&Value> {
        if self.inner.presence.get(field.index()) {
            self.inner.slots[field.index()].as_ref()
        } else {
            None
        }
    }

    /// The value of field `number`, falling back to the schema default.
    ///
    /// Unset nested-message fields read as the nested type's default
    /// instance, unset repeated fields as an empty list. Returns `None` only
    /// for numbers the type does not declare.
    pub fn get_or_default(&self, number: u32) -> Option<Cow<'_, Value>> {
        let field = self.descriptor(number)?;
        if let Some(value) = self.present_value(field) {
            return Some(Cow::Borrowed(value));
        }
        if field.is_repeated() {
            return Some(Cow::Owned(Value::List(Vec::new())));
        }
        let default = match field.kind() {
            FieldKind::Scalar(kind) => field
                .explicit_default()
                .cloned()
                .unwrap_or_else(|| kind.default_value()),
            FieldKind::Message(id) => {
                Value::Message(self.inner.ty.related(id).default_instance())
            }
        };
        Some(Cow::Owned(default))
    }

    /// The nested message in field `number`, if set
    pub fn message(&self, number: u32) -> Option<&Message> {
        self.get(number).and_then(Value::as_message)
    }

    /// Elements of repeated field `number`; empty when unset
    pub fn repeated(&self, number: u32) -> &[Value] {
        self.get(number).and_then(Value::as_list).unwrap_or(&[])
    }

    /// Present fields with their values, in ascending field-number order
    pub fn present_fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> + '_ {
        self.inner
            .ty
            .model()
            .fields_by_number()
            .filter_map(move |field| self.present_value(field).map(|value| (field, value)))
    }

    /// Bytes of fields the schema did not recognise, kept verbatim
    pub fn unknown_fields(&self) -> &Bytes {
        &self.inner.unknown
    }

    /// Whether every required field is set, recursively through every
    /// present nested message. Computed once per instance.
    pub fn is_initialized(&self) -> bool {
        *self.inner.initialized.get_or_init(|| {
            let model = self.inner.ty.model();
            model
                .required_fields()
                .all(|field| self.inner.presence.get(field.index()))
                && self.present_fields().all(|(_, value)| match value {
                    Value::Message(nested) => nested.is_initialized(),
                    Value::List(items) => items
                        .iter()
                        .filter_map(Value::as_message)
                        .all(Message::is_initialized),
                    _ => true,
                })
        })
    }

    /// Dotted paths of every unset required field, including those inside
    /// present nested messages. Repeated elements appear as `name[i]`.
    pub fn missing_fields(&self) -> MissingFields {
        let mut missing = Vec::new();
        if !self.is_initialized() {
            self.collect_missing("", &mut missing);
        }
        MissingFields(missing)
    }

    fn collect_missing(&self, prefix: &str, out: &mut Vec<String>) {
        for field in self.inner.ty.model().fields() {
            match self.present_value(field) {
                None if field.is_required() => out.push(format!("{}{}", prefix, field.name())),
                None => {}
                Some(Value::Message(nested)) => {
                    if !nested.is_initialized() {
                        nested.collect_missing(&format!("{}{}.", prefix, field.name()), out);
                    }
                }
                Some(Value::List(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::Message(nested) = item {
                            if !nested.is_initialized() {
                                let nested_prefix = format!("{}{}[{}].", prefix, field.name(), i);
                                nested.collect_missing(&nested_prefix, out);
                            }
                        }
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Size of the encoded message in bytes. Computed once per instance.
    pub fn serialized_size(&self) -> usize {
        *self
            .inner
            .serialized_size
            .get_or_init(|| encode::compute_serialized_size(self))
    }

    /// Encodes the message
    pub fn encode(&self) -> Bytes {
        encode::encode(self)
    }

    /// Encodes the message into `buf`
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        encode::encode_to(self, buf)
    }

    /// A builder holding a copy of this message's fields
    pub fn to_builder(&self) -> Builder {
        Builder::from_message(self)
    }
}

/// Structural equality over type, presence, field values and unknown bytes.
/// Memoized size and initialization state are ignored.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.ty == other.inner.ty
            && self.inner.presence == other.inner.presence
            && self.present_fields().eq(other.present_fields())
            && self.inner.unknown == other.inner.unknown
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name());
        for (field, value) in self.present_fields() {
            s.field(field.name(), value);
        }
        if !self.inner.unknown.is_empty() {
            s.field("unknown_fields", &self.inner.unknown.len());
        }
        s.finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        text::write_message(f, self, &text::TextConfig::default())
    }
}
