//! Schema-level message descriptions.
//!
//! A [`Schema`] is a table of [`MessageModel`]s keyed by [`MessageTypeId`].
//! Fields that hold nested messages refer to other models by id, so a type
//! may refer to itself (an expression containing expressions) while every
//! message instance stays a finite tree.
//!
//! Schemas are assembled with [`SchemaBuilder`], which validates field
//! numbers, names, defaults and type references before anything can be
//! encoded or decoded against them:
//!
//! ```
//! use irwire_core::{ScalarKind, SchemaBuilder, FieldType, MessageType};
//!
//! let mut builder = SchemaBuilder::new();
//! builder
//!     .message("IrStatementOrigin")
//!     .required(1, "name", ScalarKind::Int32);
//! builder
//!     .message("IrSetField")
//!     .optional(3, "origin", FieldType::message("IrStatementOrigin"));
//! let schema = builder.build()?;
//!
//! let set_field = MessageType::by_name(&schema, "IrSetField").unwrap();
//! assert_eq!(set_field.model().fields().len(), 1);
//! # Ok::<(), irwire_core::Error>(())
//! ```

pub mod descriptor;

use crate::builder::Builder;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::value::Value;
use crate::wire::{WireType, MAX_FIELD_NUMBER};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Whether a field must, may, or may repeatedly appear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Must be set for the message to be initialized
    Required,
    /// May be absent
    Optional,
    /// Zero or more values
    Repeated,
}

impl Cardinality {
    /// Returns the schema keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::Required => "required",
            Cardinality::Optional => "optional",
            Cardinality::Repeated => "repeated",
        }
    }
}

/// Scalar value kinds and their wire representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Varint, negative values sign-extended to 64 bits
    Int32,
    /// Varint
    Int64,
    /// Varint
    UInt32,
    /// Varint
    UInt64,
    /// ZigZag varint
    SInt32,
    /// ZigZag varint
    SInt64,
    /// Varint 0 or 1
    Bool,
    /// Varint, encoded like `Int32`
    Enum,
    /// Little-endian 4 bytes
    Fixed32,
    /// Little-endian 8 bytes
    Fixed64,
    /// Little-endian 4 bytes, signed
    SFixed32,
    /// Little-endian 8 bytes, signed
    SFixed64,
    /// IEEE 754 single precision
    Float,
    /// IEEE 754 double precision
    Double,
    /// Length-delimited UTF-8
    String,
    /// Length-delimited raw bytes
    Bytes,
}

impl ScalarKind {
    /// The wire type used for a single value of this kind
    pub fn wire_type(self) -> WireType {
        match self {
            ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::UInt32
            | ScalarKind::UInt64
            | ScalarKind::SInt32
            | ScalarKind::SInt64
            | ScalarKind::Bool
            | ScalarKind::Enum => WireType::Varint,
            ScalarKind::Fixed64 | ScalarKind::SFixed64 | ScalarKind::Double => WireType::Fixed64,
            ScalarKind::Fixed32 | ScalarKind::SFixed32 | ScalarKind::Float => WireType::Fixed32,
            ScalarKind::String | ScalarKind::Bytes => WireType::LengthDelimited,
        }
    }

    /// Whether repeated values of this kind may use the packed encoding
    pub fn is_packable(self) -> bool {
        self.wire_type() != WireType::LengthDelimited
    }

    /// Returns the schema keyword
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::SInt32 => "sint32",
            ScalarKind::SInt64 => "sint64",
            ScalarKind::Bool => "bool",
            ScalarKind::Enum => "enum",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::SFixed32 => "sfixed32",
            ScalarKind::SFixed64 => "sfixed64",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }
}

/// Index of a message model within its [`Schema`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTypeId(u32);

impl MessageTypeId {
    /// Position in [`Schema::models`]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a field slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A scalar value
    Scalar(ScalarKind),
    /// A nested message of the given type
    Message(MessageTypeId),
}

impl FieldKind {
    /// The wire type of a single (unpacked) value
    pub fn wire_type(self) -> WireType {
        match self {
            FieldKind::Scalar(kind) => kind.wire_type(),
            FieldKind::Message(_) => WireType::LengthDelimited,
        }
    }
}

/// A resolved field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    number: u32,
    name: String,
    cardinality: Cardinality,
    kind: FieldKind,
    default: Option<Value>,
    packed: bool,
    index: usize,
}

impl FieldDescriptor {
    /// Field number, unique within the message
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required, optional or repeated
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Scalar kind or nested message type
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Explicit schema default, if one was declared
    pub fn explicit_default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Whether repeated values are written as one packed run
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Presence-bit and slot index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Shorthand for `cardinality() == Required`
    pub fn is_required(&self) -> bool {
        self.cardinality == Cardinality::Required
    }

    /// Shorthand for `cardinality() == Repeated`
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }
}

/// Ordered field declarations of one message type
#[derive(Debug, Clone, PartialEq)]
pub struct MessageModel {
    name: String,
    fields: Vec<FieldDescriptor>,
    /// Indices into `fields`, sorted by field number
    by_number: Vec<usize>,
}

impl MessageModel {
    /// Fully qualified type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order; `fields()[i].index() == i`
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by number
    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number
            .binary_search_by_key(&number, |&i| self.fields[i].number)
            .ok()
            .map(|pos| &self.fields[self.by_number[pos]])
    }

    /// Looks up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields in ascending field-number order, the order they are encoded in
    pub fn fields_by_number(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.by_number.iter().map(move |&i| &self.fields[i])
    }

    /// Fields declared `required`
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.fields.iter().filter(|f| f.is_required())
    }
}

/// A table of message models
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    models: Vec<MessageModel>,
    by_name: HashMap<String, MessageTypeId>,
}

impl Schema {
    /// All models, indexed by [`MessageTypeId::index`]
    pub fn models(&self) -> &[MessageModel] {
        &self.models
    }

    /// Returns the model for `id`
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a different schema with more models.
    pub fn model(&self, id: MessageTypeId) -> &MessageModel {
        &self.models[id.index()]
    }

    /// Resolves a fully qualified type name
    pub fn lookup(&self, name: &str) -> Option<MessageTypeId> {
        self.by_name.get(name).copied()
    }

    /// Number of message types
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if the schema declares no message types
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// A message type bound to the schema it came from.
///
/// Cheap to clone. Two handles are equal when they name the same model of
/// the same schema instance.
#[derive(Clone)]
pub struct MessageType {
    schema: Arc<Schema>,
    id: MessageTypeId,
}

impl MessageType {
    /// Resolves `name` in `schema`
    pub fn by_name(schema: &Arc<Schema>, name: &str) -> Option<Self> {
        schema.lookup(name).map(|id| Self {
            schema: Arc::clone(schema),
            id,
        })
    }

    /// The model's id
    pub fn id(&self) -> MessageTypeId {
        self.id
    }

    /// The owning schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The field declarations
    pub fn model(&self) -> &MessageModel {
        self.schema.model(self.id)
    }

    /// Fully qualified type name
    pub fn name(&self) -> &str {
        self.model().name()
    }

    /// Another type of the same schema
    pub fn related(&self, id: MessageTypeId) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            id,
        }
    }

    /// The type held by a nested-message field, if `number` is one
    pub fn nested_type(&self, number: u32) -> Option<Self> {
        match self.model().field(number)?.kind() {
            FieldKind::Message(id) => Some(self.related(id)),
            FieldKind::Scalar(_) => None,
        }
    }

    /// Creates an empty builder for this type
    pub fn new_builder(&self) -> Builder {
        Builder::new(self.clone())
    }

    /// The all-defaults instance with no field set
    pub fn default_instance(&self) -> Message {
        Message::empty(self.clone())
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.schema, &other.schema)
    }
}

impl Eq for MessageType {}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name()).finish()
    }
}

/// The declared type of a field before names are resolved
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// A scalar kind
    Scalar(ScalarKind),
    /// A message type, by fully qualified name
    Message(String),
}

impl FieldType {
    /// A nested message of the named type
    pub fn message(name: impl Into<String>) -> Self {
        FieldType::Message(name.into())
    }
}

impl From<ScalarKind> for FieldType {
    fn from(kind: ScalarKind) -> Self {
        FieldType::Scalar(kind)
    }
}

/// An unresolved field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    /// Field number
    pub number: u32,
    /// Field name
    pub name: String,
    /// Required, optional or repeated
    pub cardinality: Cardinality,
    /// Scalar kind or message type name
    pub ty: FieldType,
    /// Explicit default for singular scalar fields
    pub default: Option<Value>,
    /// Packed encoding for repeated numeric fields
    pub packed: bool,
}

impl FieldDecl {
    /// Creates a declaration with no default, unpacked
    pub fn new(
        number: u32,
        name: impl Into<String>,
        cardinality: Cardinality,
        ty: impl Into<FieldType>,
    ) -> Self {
        Self {
            number,
            name: name.into(),
            cardinality,
            ty: ty.into(),
            default: None,
            packed: false,
        }
    }

    /// Sets the explicit default
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets packed encoding
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = packed;
        self
    }
}

/// Field declarations for one message type, collected by [`SchemaBuilder`]
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDecl {
    name: String,
    fields: Vec<FieldDecl>,
}

impl MessageDecl {
    /// Adds a field declaration
    pub fn field(&mut self, decl: FieldDecl) -> &mut Self {
        self.fields.push(decl);
        self
    }

    /// Declares a required field
    pub fn required(
        &mut self,
        number: u32,
        name: impl Into<String>,
        ty: impl Into<FieldType>,
    ) -> &mut Self {
        self.field(FieldDecl::new(number, name, Cardinality::Required, ty))
    }

    /// Declares an optional field
    pub fn optional(
        &mut self,
        number: u32,
        name: impl Into<String>,
        ty: impl Into<FieldType>,
    ) -> &mut Self {
        self.field(FieldDecl::new(number, name, Cardinality::Optional, ty))
    }

    /// Declares an optional scalar field with an explicit default
    pub fn optional_with_default(
        &mut self,
        number: u32,
        name: impl Into<String>,
        kind: ScalarKind,
        default: impl Into<Value>,
    ) -> &mut Self {
        self.field(FieldDecl::new(number, name, Cardinality::Optional, kind).with_default(default))
    }

    /// Declares a repeated field
    pub fn repeated(
        &mut self,
        number: u32,
        name: impl Into<String>,
        ty: impl Into<FieldType>,
    ) -> &mut Self {
        self.field(FieldDecl::new(number, name, Cardinality::Repeated, ty))
    }

    /// Declares a repeated numeric field written in packed form
    pub fn packed(&mut self, number: u32, name: impl Into<String>, kind: ScalarKind) -> &mut Self {
        self.field(FieldDecl::new(number, name, Cardinality::Repeated, kind).packed(true))
    }
}

/// Collects message declarations and resolves them into a [`Schema`]
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    messages: Vec<MessageDecl>,
}

impl SchemaBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `name` has been declared
    pub fn contains(&self, name: &str) -> bool {
        self.messages.iter().any(|m| m.name == name)
    }

    /// Starts (or continues) the declaration of message type `name`
    pub fn message(&mut self, name: impl Into<String>) -> &mut MessageDecl {
        let name = name.into();
        let pos = match self.messages.iter().position(|m| m.name == name) {
            Some(pos) => pos,
            None => {
                self.messages.push(MessageDecl {
                    name,
                    fields: Vec::new(),
                });
                self.messages.len() - 1
            }
        };
        &mut self.messages[pos]
    }

    /// Validates every declaration and resolves type references
    pub fn build(self) -> Result<Arc<Schema>> {
        // `message()` merges declarations by name, so names are unique here
        let by_name: HashMap<String, MessageTypeId> = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.name.clone(), MessageTypeId(i as u32)))
            .collect();

        let mut models = Vec::with_capacity(self.messages.len());
        for decl in self.messages {
            models.push(resolve_message(decl, &by_name)?);
        }

        debug!(
            "Built schema with {} message types and {} fields",
            models.len(),
            models.iter().map(|m| m.fields.len()).sum::<usize>()
        );

        Ok(Arc::new(Schema { models, by_name }))
    }
}

fn resolve_message(
    decl: MessageDecl,
    by_name: &HashMap<String, MessageTypeId>,
) -> Result<MessageModel> {
    let mut numbers = HashSet::new();
    let mut names = HashSet::new();
    let mut fields = Vec::with_capacity(decl.fields.len());

    for (index, field) in decl.fields.into_iter().enumerate() {
        if field.number == 0 || field.number > MAX_FIELD_NUMBER {
            return Err(Error::InvalidFieldNumber {
                message: decl.name.clone(),
                number: field.number,
                max: MAX_FIELD_NUMBER,
            });
        }
        if !numbers.insert(field.number) {
            return Err(Error::DuplicateFieldNumber {
                message: decl.name.clone(),
                number: field.number,
            });
        }
        if !names.insert(field.name.clone()) {
            return Err(Error::DuplicateFieldName {
                message: decl.name.clone(),
                name: field.name.clone(),
            });
        }

        let kind = match &field.ty {
            FieldType::Scalar(kind) => FieldKind::Scalar(*kind),
            FieldType::Message(name) => {
                let id = by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| Error::UnknownMessageType { name: name.clone() })?;
                FieldKind::Message(id)
            }
        };

        if let Some(default) = &field.default {
            let rejection = match (kind, field.cardinality) {
                (_, Cardinality::Repeated) => Some("repeated fields cannot declare a default".to_string()),
                (FieldKind::Message(_), _) => Some("message fields cannot declare a default".to_string()),
                (FieldKind::Scalar(scalar), _) if !scalar.accepts(default) => Some(format!(
                    "{} value does not fit a {} field",
                    default.kind_name(),
                    scalar.as_str()
                )),
                _ => None,
            };
            if let Some(details) = rejection {
                return Err(Error::InvalidDefault {
                    message: decl.name.clone(),
                    field: field.name.clone(),
                    details,
                });
            }
        }

        if field.packed {
            let packable = field.cardinality == Cardinality::Repeated
                && matches!(kind, FieldKind::Scalar(scalar) if scalar.is_packable());
            if !packable {
                return Err(Error::type_mismatch(
                    format!("{}.{}", decl.name, field.name),
                    "repeated numeric field for packed encoding",
                    format!("{} field", field.cardinality.as_str()),
                ));
            }
        }

        fields.push(FieldDescriptor {
            number: field.number,
            name: field.name,
            cardinality: field.cardinality,
            kind,
            default: field.default,
            packed: field.packed,
            index,
        });
    }

    let mut by_number: Vec<usize> = (0..fields.len()).collect();
    by_number.sort_by_key(|&i| fields[i].number);

    Ok(MessageModel {
        name: decl.name,
        fields,
        by_number,
    })
}
