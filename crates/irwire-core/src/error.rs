//! Error types for the irwire-core library.
//!
//! Three families live here:
//!
//! - [`Error`]: schema construction, descriptor import and API misuse
//! - [`DecodeError`]: everything that can go wrong while reading a byte stream,
//!   wrapped in a [`DecodeFailure`] that still carries the partial message
//! - [`UninitializedError`]: a [`Builder::build`](crate::Builder::build) that
//!   was missing required fields

use crate::message::Message;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for irwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for schema and message API operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a serialized descriptor set
    #[error("failed to parse FileDescriptorSet: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// The descriptor uses a construct the engine does not model
    #[error("unsupported descriptor construct in '{message}.{field}': {details}")]
    UnsupportedDescriptor {
        /// Message owning the field
        message: String,
        /// Offending field
        field: String,
        /// What is unsupported
        details: String,
    },

    /// Invalid field number in a message declaration
    #[error("invalid field number {number} in '{message}': must be between 1 and {max}")]
    InvalidFieldNumber {
        /// Message being declared
        message: String,
        /// The invalid field number
        number: u32,
        /// Maximum valid field number
        max: u32,
    },

    /// Two fields of one message share a number
    #[error("duplicate field number {number} in '{message}'")]
    DuplicateFieldNumber {
        /// Message being declared
        message: String,
        /// The repeated number
        number: u32,
    },

    /// Two fields of one message share a name
    #[error("duplicate field name '{name}' in '{message}'")]
    DuplicateFieldName {
        /// Message being declared
        message: String,
        /// The repeated name
        name: String,
    },

    /// A message type was declared twice
    #[error("message type '{name}' declared more than once")]
    DuplicateMessageType {
        /// The repeated type name
        name: String,
    },

    /// A field references a message type that was never declared
    #[error("unknown message type '{name}'")]
    UnknownMessageType {
        /// The unresolved type name
        name: String,
    },

    /// A declared default does not fit its field
    #[error("invalid default for '{message}.{field}': {details}")]
    InvalidDefault {
        /// Message being declared
        message: String,
        /// Field carrying the default
        field: String,
        /// Why it was rejected
        details: String,
    },

    /// The field number is not declared on the message type
    #[error("message '{message}' has no field number {number}")]
    UnknownField {
        /// Message type name
        message: String,
        /// The undeclared field number
        number: u32,
    },

    /// A value or message of the wrong shape was supplied
    #[error("type mismatch for '{target}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field path or message name
        target: String,
        /// Expected kind
        expected: String,
        /// Supplied kind
        found: String,
    },

    /// Building a message failed the initialization check
    #[error(transparent)]
    Uninitialized(#[from] UninitializedError),

    /// Decoding into an existing builder failed
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new unknown field error
    pub fn unknown_field(message: impl Into<String>, number: u32) -> Self {
        Self::UnknownField {
            message: message.into(),
            number,
        }
    }

    /// Creates a new type mismatch error
    pub fn type_mismatch(
        target: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            target: target.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a new unsupported descriptor error
    pub fn unsupported_descriptor(
        message: impl Into<String>,
        field: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::UnsupportedDescriptor {
            message: message.into(),
            field: field.into(),
            details: details.into(),
        }
    }

    /// Returns true if the error concerns a single input rather than the
    /// schema or the calling code, so a batch can skip it and continue
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::Decode(_) | Self::Uninitialized(_)
        )
    }
}

/// Dotted paths of required fields that are not set, e.g. `value.type`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingFields(pub Vec<String>);

impl MissingFields {
    /// Returns true if nothing is missing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the missing paths
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for MissingFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Errors raised while reading a byte stream against a message type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Input ended in the middle of a field
    #[error("truncated input at offset {offset}")]
    Truncated {
        /// Byte offset where more input was needed
        offset: usize,
    },

    /// A tag varint was malformed or named field number 0
    #[error("invalid tag at offset {offset}")]
    InvalidTag {
        /// Byte offset of the tag
        offset: usize,
    },

    /// A varint payload ran past ten bytes
    #[error("malformed varint at offset {offset}")]
    MalformedVarint {
        /// Byte offset of the varint
        offset: usize,
    },

    /// The tag carries a wire type whose payload length cannot be determined
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType {
        /// Raw 3-bit wire type code
        wire_type: u8,
        /// Byte offset of the tag
        offset: usize,
    },

    /// An end-group tag without a matching start-group tag
    #[error("unmatched end of group {field_number} at offset {offset}")]
    UnmatchedEndGroup {
        /// Field number carried by the end tag
        field_number: u32,
        /// Byte offset of the tag
        offset: usize,
    },

    /// A string field did not hold valid UTF-8
    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the payload
        offset: usize,
    },

    /// Required fields were absent after the whole stream was read
    #[error("missing required fields: {0}")]
    MissingRequiredField(MissingFields),

    /// A nested message failed to decode
    #[error("in nested field '{field}': {source}")]
    NestedDecodeFailure {
        /// Name of the field holding the nested message
        field: String,
        /// Failure inside the nested message
        #[source]
        source: Box<DecodeError>,
    },

    /// A declared length exceeds the configured maximum message size
    #[error("declared length {declared} exceeds size limit {limit}")]
    SizeLimitExceeded {
        /// Declared payload length
        declared: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Messages were nested deeper than the configured limit
    #[error("message nesting exceeds recursion limit {limit}")]
    RecursionLimitExceeded {
        /// Configured maximum depth
        limit: usize,
    },
}

impl DecodeError {
    /// Wraps this error with the name of the nested field it occurred in
    pub fn nested(self, field: impl Into<String>) -> Self {
        Self::NestedDecodeFailure {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Follows nested failures down to the originating error
    pub fn root_cause(&self) -> &DecodeError {
        match self {
            Self::NestedDecodeFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Dotted path of nested fields leading to the originating error
    pub fn field_path(&self) -> String {
        let mut segments = Vec::new();
        let mut current = self;
        while let Self::NestedDecodeFailure { field, source } = current {
            segments.push(field.as_str());
            current = source;
        }
        segments.join(".")
    }
}

/// A failed decode together with whatever was recovered before the failure
#[derive(Error, Debug, Clone)]
#[error("failed to decode '{}': {error}", .partial.type_name())]
pub struct DecodeFailure {
    /// What went wrong
    #[source]
    pub error: DecodeError,
    /// Best-effort partially populated message
    pub partial: Message,
}

impl DecodeFailure {
    /// Creates a failure from an error and the partial message
    pub fn new(error: DecodeError, partial: Message) -> Self {
        Self { error, partial }
    }

    /// Discards the partial message
    pub fn into_error(self) -> DecodeError {
        self.error
    }
}

impl From<DecodeFailure> for Error {
    fn from(failure: DecodeFailure) -> Self {
        Self::Decode(failure.error)
    }
}

/// Returned by [`Builder::build`](crate::Builder::build) when required
/// fields are not set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message '{type_name}' is missing required fields: {missing}")]
pub struct UninitializedError {
    /// Name of the message type being built
    pub type_name: String,
    /// Paths of the unset required fields
    pub missing: MissingFields,
}
