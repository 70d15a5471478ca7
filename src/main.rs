use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ddf::wire::{ByteCursor, WireType};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ddf-dump",
    version,
    about = "Print the raw field tree of encoded DDF messages"
)]
struct Cli {
    /// Path to the encoded message.
    path: PathBuf,
    /// Deepest nesting at which length-delimited payloads are still probed as messages.
    #[arg(long, default_value_t = ddf::decoding::DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

/// Whether `cursor` holds nothing but well-formed fields.
fn looks_like_message(mut cursor: ByteCursor<'_>) -> bool {
    if cursor.is_at_end() {
        return false;
    }
    while !cursor.is_at_end() {
        let Ok(tag) = cursor.read_tag() else {
            return false;
        };
        if cursor.skip_field(tag.wire_type).is_err() {
            return false;
        }
    }
    true
}

fn dump_message(mut cursor: ByteCursor<'_>, depth: usize, max_depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    while !cursor.is_at_end() {
        let offset = cursor.tell();
        let tag = cursor.read_tag()?;
        let number = tag.field_number;
        tracing::trace!(offset, number, wire_type = ?tag.wire_type, "field");
        match tag.wire_type {
            WireType::Varint => println!("{indent}{number}: {}", cursor.read_varint64()?),
            WireType::Fixed64 => println!("{indent}{number}: 0x{:016x}", cursor.read_fixed64()?),
            WireType::Fixed32 => println!("{indent}{number}: 0x{:08x}", cursor.read_fixed32()?),
            WireType::LengthDelimited => {
                let mut payload = cursor.read_sub_range()?;
                if depth < max_depth && looks_like_message(payload) {
                    println!("{indent}{number} {{");
                    dump_message(payload, depth + 1, max_depth)?;
                    println!("{indent}}}");
                } else {
                    let bytes = payload.read_raw(payload.remaining())?;
                    match std::str::from_utf8(bytes) {
                        Ok(text) => println!("{indent}{number}: {text:?}"),
                        Err(_) => println!("{indent}{number}: {bytes:02x?}"),
                    }
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let bytes = std::fs::read(&cli.path)
        .with_context(|| format!("read {}", cli.path.display()))?;
    tracing::debug!(len = bytes.len(), path = %cli.path.display(), "loaded input");

    dump_message(ByteCursor::new(&bytes), 0, cli.max_depth)
        .with_context(|| format!("dump {}", cli.path.display()))
}
