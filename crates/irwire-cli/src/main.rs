//! irwire - Inspect, decode and verify serialized IR message streams
//!
//! This tool reads files in the protobuf binary wire format, either
//! schema-less (record listing) or against a compiled descriptor set.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use irwire_core::wire::{ByteCursor, START_GROUP};
use irwire_core::{
    load_descriptor_set, DecodeOptions, Decoder, MessageType, TextConfig, WireType,
    DEFAULT_RECURSION_LIMIT,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Default upper bound on input and payload sizes (64 MiB)
const DEFAULT_MAX_SIZE: usize = 64 * 1024 * 1024;

/// Inspect, decode and verify serialized IR message streams
#[derive(Parser, Debug)]
#[command(name = "irwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the top-level records of a file without a schema
    Inspect {
        /// Encoded message file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Decode a file against a message type and print it as text
    Decode {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Encoded message file
        #[arg(short, long)]
        file: PathBuf,

        /// Print the partially decoded message when decoding fails
        #[arg(long)]
        partial: bool,

        /// Hide the unknown-field summary in the text output
        #[arg(long)]
        hide_unknown: bool,
    },
    /// Decode and re-encode every file in a directory, checking the bytes match
    Verify {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Directory of encoded message files
        #[arg(short, long)]
        directory: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Serialized FileDescriptorSet (protoc --descriptor_set_out)
    #[arg(long)]
    descriptor: PathBuf,

    /// Fully qualified message type name, e.g. ir.IrSetField
    #[arg(short = 't', long = "type")]
    type_name: String,

    /// Maximum accepted message or payload size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE)]
    max_size: usize,

    /// Maximum nesting depth
    #[arg(long, default_value_t = irwire_core::DEFAULT_RECURSION_LIMIT)]
    recursion_limit: usize,
}

impl SchemaArgs {
    fn options(&self) -> DecodeOptions {
        DecodeOptions::new(self.max_size).recursion_limit(self.recursion_limit)
    }

    fn message_type(&self) -> Result<MessageType> {
        load_message_type(&self.descriptor, &self.type_name)
    }
}

/// Outcome counts for `verify`
#[derive(Debug, Default, PartialEq, Eq)]
struct VerifyStats {
    verified: usize,
    mismatched: usize,
    failed: usize,
}

impl VerifyStats {
    fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.failed == 0
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} verified, {} mismatched, {} failed",
            self.verified, self.mismatched, self.failed
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Inspect { file } => inspect_file(file),
        Command::Decode {
            schema,
            file,
            partial,
            hide_unknown,
        } => decode_file(schema, file, *partial, *hide_unknown),
        Command::Verify { schema, directory } => verify_command(schema, directory),
    }
}

/// Load a descriptor set and resolve one message type from it
fn load_message_type(descriptor: &Path, type_name: &str) -> Result<MessageType> {
    let schema = load_descriptor_set(descriptor)
        .with_context(|| format!("Failed to load descriptor set: {}", descriptor.display()))?;
    debug!(
        "Loaded {} message types from {}",
        schema.len(),
        descriptor.display()
    );
    match MessageType::by_name(&schema, type_name.trim_start_matches('.')) {
        Some(ty) => Ok(ty),
        None => bail!(
            "Message type '{}' not found in {}",
            type_name,
            descriptor.display()
        ),
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        bail!("Input file does not exist: {}", path.display());
    }
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
    trace!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

/// Print one line per top-level record
fn inspect_file(file: &Path) -> Result<()> {
    let data = read_input(file)?;
    for line in describe_records(&data)? {
        println!("{}", line);
    }
    Ok(())
}

/// Describe each top-level record as `offset field wire-type detail`
fn describe_records(data: &[u8]) -> Result<Vec<String>> {
    let mut cursor = ByteCursor::new(data.to_vec());
    let mut lines = Vec::new();

    loop {
        let offset = cursor.offset();
        let Some(tag) = cursor
            .read_tag()
            .with_context(|| format!("Corrupt record at offset {}", offset))?
        else {
            break;
        };
        let Some(wire_type) = tag.wire_type() else {
            if tag.wire_code() == START_GROUP {
                let body_start = cursor.offset();
                cursor
                    .skip_group(tag.field_number(), 0, DEFAULT_RECURSION_LIMIT, data.len())
                    .with_context(|| {
                        format!("Malformed group {} at offset {}", tag.field_number(), offset)
                    })?;
                lines.push(format!(
                    "{:>8}  field {:<6} {:<16} {} bytes",
                    offset,
                    tag.field_number(),
                    "group",
                    cursor.offset() - body_start
                ));
                continue;
            }
            bail!(
                "Unsupported wire type {} for field {} at offset {}",
                tag.wire_code(),
                tag.field_number(),
                offset
            );
        };

        let detail = match wire_type {
            WireType::Varint => cursor.read_varint().map(|v| v.to_string()),
            WireType::Fixed32 => cursor.read_fixed32().map(|v| format!("0x{:08x}", v)),
            WireType::Fixed64 => cursor.read_fixed64().map(|v| format!("0x{:016x}", v)),
            WireType::LengthDelimited => cursor
                .read_length_delimited(data.len())
                .map(|payload| format!("{} bytes", payload.len())),
        }
        .with_context(|| format!("Truncated field {} at offset {}", tag.field_number(), offset))?;

        lines.push(format!(
            "{:>8}  field {:<6} {:<16} {}",
            offset,
            tag.field_number(),
            wire_type.as_str(),
            detail
        ));
    }

    Ok(lines)
}

/// Decode a single file and print its text form
fn decode_file(schema: &SchemaArgs, file: &Path, partial: bool, hide_unknown: bool) -> Result<()> {
    let ty = schema.message_type()?;
    let data = read_input(file)?;
    let config = TextConfig::new().show_unknown(!hide_unknown);

    match Decoder::new(schema.options()).decode(data, &ty) {
        Ok(message) => {
            debug!("Decoded {} ({} bytes)", ty.name(), message.serialized_size());
            print!("{}", irwire_core::text::to_text(&message, &config));
            Ok(())
        }
        Err(failure) => {
            if partial {
                println!("# partial {}", ty.name());
                print!("{}", irwire_core::text::to_text(&failure.partial, &config));
            }
            Err(anyhow::Error::new(failure))
                .with_context(|| format!("Failed to decode {}", file.display()))
        }
    }
}

fn verify_command(schema: &SchemaArgs, directory: &Path) -> Result<()> {
    let ty = schema.message_type()?;
    let stats = verify_directory(&ty, directory, &schema.options())?;
    stats.print_summary();
    if !stats.is_clean() {
        bail!(
            "{} file(s) did not round-trip ({} mismatched, {} failed)",
            stats.mismatched + stats.failed,
            stats.mismatched,
            stats.failed
        );
    }
    Ok(())
}

/// Round-trip every regular, non-hidden file under `directory`
fn verify_directory(
    ty: &MessageType,
    directory: &Path,
    options: &DecodeOptions,
) -> Result<VerifyStats> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Verifying directory: {}", directory.display());

    let decoder = Decoder::new(options.clone());
    let mut stats = VerifyStats::default();

    // Walk the directory
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        // Skip directories
        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                stats.failed += 1;
                continue;
            }
        };

        let original_digest = short_digest(&data);
        match decoder.decode(data.clone(), ty) {
            Ok(message) => {
                let encoded = message.encode();
                let digest = short_digest(&encoded);
                if encoded[..] == data[..] {
                    println!("ok        {}  {}", digest, path.display());
                    stats.verified += 1;
                } else {
                    println!(
                        "mismatch  {} -> {}  {}",
                        original_digest,
                        digest,
                        path.display()
                    );
                    stats.mismatched += 1;
                }
            }
            Err(failure) => {
                warn!("Error processing {}: {}", path.display(), failure);
                println!("failed    {}  {}", original_digest, path.display());
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// First 8 hex characters of the blake3 hash
fn short_digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..8].to_string()
}
