//! Human-readable text dump of messages.
//!
//! One `name: value` line per present field in ascending field-number order.
//! Nested messages become indented `name { ... }` blocks and repeated fields
//! repeat the line once per element:
//!
//! ```text
//! field_access {
//!   symbol: 42
//! }
//! tags: "a"
//! tags: "b"
//! ```

use crate::message::Message;
use crate::value::Value;
use std::fmt::{Result, Write as FmtWrite};

/// Configuration for the text dump
#[derive(Debug, Clone)]
pub struct TextConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
    /// Append a comment line with the size of preserved unknown fields
    pub show_unknown: bool,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
            show_unknown: true,
        }
    }
}

impl TextConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Sets whether unknown fields are summarized
    pub fn show_unknown(mut self, show: bool) -> Self {
        self.show_unknown = show;
        self
    }
}

/// Writes the text dump of `message` to `w`
pub fn write_message(w: &mut impl FmtWrite, message: &Message, config: &TextConfig) -> Result {
    TextWriter::new(w, config).write_fields(message)
}

/// Renders the text dump of `message` to a string
pub fn to_text(message: &Message, config: &TextConfig) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_message(&mut out, message, config);
    out
}

struct TextWriter<'a, W: FmtWrite> {
    writer: &'a mut W,
    config: &'a TextConfig,
    indent_level: usize,
}

impl<'a, W: FmtWrite> TextWriter<'a, W> {
    fn new(writer: &'a mut W, config: &'a TextConfig) -> Self {
        Self {
            writer,
            config,
            indent_level: 0,
        }
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn write_indent(&mut self) -> Result {
        for _ in 0..self.indent_level {
            write!(self.writer, "{}", self.config.indent_str)?;
        }
        Ok(())
    }

    fn write_fields(&mut self, message: &Message) -> Result {
        for (field, value) in message.present_fields() {
            match value {
                Value::List(items) => {
                    for item in items {
                        self.write_field(field.name(), item)?;
                    }
                }
                single => self.write_field(field.name(), single)?,
            }
        }

        let unknown = message.unknown_fields();
        if self.config.show_unknown && !unknown.is_empty() {
            self.write_indent()?;
            writeln!(self.writer, "# {} bytes of unknown fields", unknown.len())?;
        }
        Ok(())
    }

    fn write_field(&mut self, name: &str, value: &Value) -> Result {
        self.write_indent()?;
        match value {
            Value::Message(nested) => {
                writeln!(self.writer, "{} {{", name)?;
                self.indent();
                self.write_fields(nested)?;
                self.dedent();
                self.write_indent()?;
                writeln!(self.writer, "}}")
            }
            scalar => {
                write!(self.writer, "{}: ", name)?;
                self.write_scalar(scalar)?;
                writeln!(self.writer)
            }
        }
    }

    fn write_scalar(&mut self, value: &Value) -> Result {
        match value {
            Value::I32(v) => write!(self.writer, "{}", v),
            Value::I64(v) => write!(self.writer, "{}", v),
            Value::U32(v) => write!(self.writer, "{}", v),
            Value::U64(v) => write!(self.writer, "{}", v),
            Value::Bool(v) => write!(self.writer, "{}", v),
            Value::F32(v) => write!(self.writer, "{}", v),
            Value::F64(v) => write!(self.writer, "{}", v),
            Value::String(s) => write!(self.writer, "\"{}\"", escape_string(s)),
            Value::Bytes(b) => write!(self.writer, "\"{}\"", escape_bytes(b)),
            // Lists are flattened and messages written as blocks by the caller
            Value::Message(_) | Value::List(_) => write!(self.writer, "<{}>", value.kind_name()),
        }
    }
}

/// Escape a string for a double-quoted text literal
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}

/// Escape raw bytes; anything outside printable ASCII becomes `\xNN`
fn escape_bytes(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => result.push_str("\\\\"),
            b'"' => result.push_str("\\\""),
            0x20..=0x7E => result.push(b as char),
            _ => result.push_str(&format!("\\x{:02x}", b)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, MessageType, ScalarKind, SchemaBuilder};
    use pretty_assertions::assert_eq;

    fn tree_type() -> MessageType {
        let mut builder = SchemaBuilder::new();
        builder
            .message("Tree")
            .optional(1, "name", ScalarKind::String)
            .repeated(2, "children", FieldType::message("Tree"))
            .optional(3, "blob", ScalarKind::Bytes)
            .repeated(4, "sizes", ScalarKind::UInt64);
        let schema = builder.build().unwrap();
        MessageType::by_name(&schema, "Tree").unwrap()
    }

    #[test]
    fn test_nested_blocks_and_repeats() {
        let ty = tree_type();
        let mut leaf = ty.new_builder();
        leaf.set(1, "leaf").unwrap().push(4, 7u64).unwrap();
        let leaf = leaf.build().unwrap();

        let mut root = ty.new_builder();
        root.set(1, "root \"one\"")
            .unwrap()
            .push(2, leaf.clone())
            .unwrap()
            .push(2, leaf)
            .unwrap()
            .set(3, vec![0x00u8, b'a'])
            .unwrap();
        let message = root.build().unwrap();

        let expected = "\
name: \"root \\\"one\\\"\"
children {
  name: \"leaf\"
  sizes: 7
}
children {
  name: \"leaf\"
  sizes: 7
}
blob: \"\\x00a\"
";
        assert_eq!(message.to_string(), expected);
    }

    #[test]
    fn test_custom_indent_and_unknown_summary() {
        let ty = tree_type();
        let mut child = ty.new_builder();
        child.set(1, "c").unwrap();
        child.set_unknown_fields([0x50u8, 0x01, 0x58, 0x02]);
        let mut root = ty.new_builder();
        root.push(2, child.build().unwrap()).unwrap();
        let message = root.build().unwrap();

        let config = TextConfig::new().indent_str("\t");
        assert_eq!(
            to_text(&message, &config),
            "children {\n\tname: \"c\"\n\t# 4 bytes of unknown fields\n}\n"
        );

        let hidden = TextConfig::new().show_unknown(false);
        assert_eq!(to_text(&message, &hidden), "children {\n  name: \"c\"\n}\n");
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("a\tb\\"), "a\\tb\\\\");
        assert_eq!(escape_string("\u{1}"), "\\x01");
    }
}
