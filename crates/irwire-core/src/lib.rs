//! # irwire-core
//!
//! A schema-driven engine for typed messages in the protobuf binary wire format.
//!
//! This crate provides the core functionality for:
//! - Describing message types at runtime (fields, cardinality, defaults)
//! - Decoding byte streams into immutable, shareable messages, keeping
//!   unrecognised fields byte-for-byte
//! - Building and merging messages, with a required-field gate on `build`
//! - Encoding messages back to bytes, with memoized sizes
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`wire`]: varints, tags, zigzag and the [`ByteCursor`] reader
//! - [`schema`]: message models, the [`Schema`] registry and descriptor import
//! - [`message`] / [`builder`]: the immutable value and its mutable staging area
//! - [`decode`] / [`encode`]: conversion between bytes and messages
//! - [`text`]: human-readable dump used by `Display`
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use irwire_core::{DecodeOptions, MessageType, ScalarKind, SchemaBuilder, Value};
//!
//! let mut schema = SchemaBuilder::new();
//! schema
//!     .message("IrStatementOrigin")
//!     .required(1, "name", ScalarKind::Int32);
//! let schema = schema.build()?;
//! let origin = MessageType::by_name(&schema, "IrStatementOrigin").unwrap();
//!
//! let mut builder = origin.new_builder();
//! builder.set(1, 7)?;
//! let message = builder.build()?;
//!
//! let bytes = message.encode();
//! assert_eq!(&bytes[..], &[0x08, 0x07]);
//!
//! let decoded = irwire_core::decode(bytes, &origin, &DecodeOptions::new(1 << 20))?;
//! assert_eq!(decoded.get(1), Some(&Value::I32(7)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod builder;
pub mod decode;
pub mod encode;
pub mod error;
pub mod message;
pub mod presence;
pub mod schema;
pub mod text;
pub mod value;
pub mod wire;

// Re-export primary types for convenience
pub use builder::Builder;
pub use decode::{decode, DecodeOptions, Decoder, DEFAULT_RECURSION_LIMIT};
pub use error::{DecodeError, DecodeFailure, Error, MissingFields, Result, UninitializedError};
pub use message::Message;
pub use presence::FieldPresence;
pub use schema::descriptor::load_descriptor_set;
pub use schema::{
    Cardinality, FieldDecl, FieldDescriptor, FieldKind, FieldType, MessageModel, MessageType,
    MessageTypeId, ScalarKind, Schema, SchemaBuilder,
};
pub use text::TextConfig;
pub use value::Value;
pub use wire::{ByteCursor, Tag, WireType, MAX_FIELD_NUMBER};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
