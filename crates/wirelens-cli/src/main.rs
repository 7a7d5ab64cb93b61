//! wirelens - Inspect arbitrary Protocol Buffer payloads
//!
//! This tool decodes a raw protobuf payload, given as a file, stdin or an
//! inline string, optionally guided by a `.proto` schema, and prints the
//! result as JSON, an annotated field tree, or a path → byte-range index.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, ValueEnum};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use wirelens_core::decode::GUESSED_STRING;
use wirelens_core::{
    normalize, DecodeReply, DecodeRequest, DecodeWorker, DecodedField, DecoderConfig,
    FieldContent, InputFormat, PackedScalar,
};

/// Longest text or hex preview shown in the tree view
const PREVIEW_CHARS: usize = 48;

/// Most packed elements shown in the tree view
const PREVIEW_ELEMENTS: usize = 8;

/// Inspect arbitrary Protocol Buffer payloads, with or without a schema
#[derive(Parser, Debug)]
#[command(name = "wirelens")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    source: PayloadSource,

    /// Encoding of the payload
    ///
    /// `auto` reads payloads that look like hex, base64 or decimal text as
    /// text, so a raw file made only of printable hex digits needs
    /// `--input-format binary`. A file or stdin payload that fails to parse
    /// as text is read as raw bytes.
    #[arg(short, long, value_enum, default_value = "auto")]
    input_format: InputArg,

    /// Path to a .proto file describing the payload
    #[arg(short, long, env = "WIRELENS_SCHEMA")]
    schema: Option<PathBuf>,

    /// Top-level message name (defaults to the first message in the schema)
    #[arg(short, long)]
    message: Option<String>,

    /// Absolute offset of the payload's first byte in a larger buffer
    #[arg(long, default_value = "0")]
    base_offset: usize,

    /// Maximum sub-message nesting depth
    #[arg(long, default_value = "64")]
    max_depth: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Emit single-line JSON
    #[arg(long)]
    compact: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct PayloadSource {
    /// Path to the payload file, or `-` for stdin
    payload: Option<PathBuf>,

    /// Inline payload text
    #[arg(short, long)]
    data: Option<String>,
}

/// Payload encoding accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputArg {
    /// Detect from the payload itself
    Auto,
    /// Hex digits, separators and 0x prefixes allowed
    Hex,
    /// Standard or URL-safe base64
    Base64,
    /// Decimal byte values
    Decimal,
    /// Raw bytes
    Binary,
}

impl From<InputArg> for InputFormat {
    fn from(arg: InputArg) -> Self {
        match arg {
            InputArg::Auto => InputFormat::Auto,
            InputArg::Hex => InputFormat::Hex,
            InputArg::Base64 => InputFormat::Base64,
            InputArg::Decimal => InputFormat::Decimal,
            InputArg::Binary => InputFormat::Binary,
        }
    }
}

/// Output format for the decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// JSON projection of the decoded fields
    Json,
    /// Indented field listing with byte ranges
    Tree,
    /// Path to byte-range index, one entry per line
    Paths,
    /// The full decode result, including errors and the undecoded remainder
    Result,
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
        .with_writer(io::stderr)
        .init();

    let raw = read_payload(&cli.source)?;
    let bytes = normalize_payload(&raw, cli.input_format.into(), cli.source.data.is_none())?;
    info!("Payload is {} bytes", bytes.len());

    let schema_text = match &cli.schema {
        Some(path) => read_schema(path)?,
        None => String::new(),
    };

    let config = DecoderConfig::new()
        .max_depth(cli.max_depth)
        .base_offset(cli.base_offset);
    let mut request = DecodeRequest::new(bytes).schema(schema_text).config(config);
    if let Some(name) = &cli.message {
        request = request.message(name.clone());
    }

    let mut worker = DecodeWorker::spawn().context("Failed to start decode worker")?;
    let reply = worker.decode(request).context("Decode worker failed")?;
    debug!(
        "Decoded {} top-level fields (request {})",
        reply.result.fields.len(),
        reply.id
    );

    report_diagnostics(&reply);
    println!("{}", render(&reply, cli.format, cli.compact)?);

    Ok(())
}

/// Read the raw payload from a file, stdin or the inline argument
fn read_payload(source: &PayloadSource) -> Result<Vec<u8>> {
    if let Some(data) = &source.data {
        return Ok(data.as_bytes().to_vec());
    }

    match source.payload.as_deref() {
        Some(path) if path == Path::new("-") => {
            trace!("Reading payload from stdin");
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read payload from stdin")?;
            Ok(buffer)
        }
        Some(path) => {
            trace!("Reading {}", path.display());
            fs::read(path)
                .with_context(|| format!("Failed to read payload file: {}", path.display()))
        }
        None => anyhow::bail!("Either a payload path or --data must be specified"),
    }
}

/// Turn the raw payload into protobuf bytes.
///
/// With auto detection, a payload read from a file or stdin that is not
/// valid hex, base64 or decimal text is taken as raw bytes. Inline text
/// must parse.
fn normalize_payload(raw: &[u8], format: InputFormat, from_file: bool) -> Result<Bytes> {
    match normalize(raw, format) {
        Ok(bytes) => Ok(bytes),
        Err(e)
            if from_file
                && format == InputFormat::Auto
                && e.is_input_error()
                && !raw.is_empty() =>
        {
            warn!("Payload is not valid text input ({}), reading it as raw bytes", e);
            Ok(Bytes::copy_from_slice(raw))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read payload as {}", format)),
    }
}

fn read_schema(path: &Path) -> Result<String> {
    trace!("Reading schema {}", path.display());
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))
}

/// Print warnings and the decode failure, if any, to stderr
fn report_diagnostics(reply: &DecodeReply) {
    let result = &reply.result;

    match &result.error {
        // Warnings are already prepended to the error text
        Some(error) => {
            eprintln!("{}", error);
            if let (Some(offset), Some(remainder)) =
                (result.error_byte_offset, &result.unparsed_hex)
            {
                eprintln!(
                    "Decoding stopped at offset {} with {} bytes undecoded: {}",
                    offset,
                    remainder.len() / 2,
                    remainder
                );
            }
        }
        None => {
            for warning in &result.warnings {
                eprintln!("Warning: {}", warning);
            }
        }
    }
}

/// Render a reply in the requested output format
fn render(reply: &DecodeReply, format: OutputFormat, compact: bool) -> Result<String> {
    match format {
        OutputFormat::Json => match &reply.projection {
            Some(projection) => to_json(&projection.json, compact),
            None => Ok("{}".to_string()),
        },
        OutputFormat::Result => to_json(&reply.result, compact),
        OutputFormat::Paths => {
            let mut out = String::new();
            if let Some(projection) = &reply.projection {
                for (path, range) in &projection.path_index {
                    let _ = writeln!(out, "{}\t{}-{}", path, range.start, range.end);
                }
            }
            Ok(out.trim_end().to_string())
        }
        OutputFormat::Tree => {
            let mut out = String::new();
            render_tree(&reply.result.fields, 0, &mut out);
            Ok(out.trim_end().to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T, compact: bool) -> Result<String> {
    let text = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    text.context("Failed to serialize output")
}

/// Append one line per field, indenting children under their parent
fn render_tree(fields: &[DecodedField], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);

    for field in fields {
        let label = match &field.field_name {
            Some(name) => format!("{} #{}", name, field.field_number),
            None => format!("#{}", field.field_number),
        };
        let _ = writeln!(
            out,
            "{}[{}-{}] {} {} {}: {}",
            indent,
            field.byte_range.start,
            field.byte_range.end,
            label,
            field.wire_type,
            field.type_name,
            preview(field)
        );

        if let Some(children) = field.children() {
            render_tree(children, depth + 1, out);
        }
    }
}

/// Short, single-line rendering of a field's value
fn preview(field: &DecodedField) -> String {
    match &field.content {
        FieldContent::Varint(value) => match &value.enum_name {
            Some(name) => format!("{} ({})", name, value.twos_complement),
            None if value.unsigned != value.signed as u64 => {
                format!("{} (zigzag {})", value.unsigned, value.signed)
            }
            None => value.unsigned.to_string(),
        },
        FieldContent::Fixed32(value) => format!("{} (float {})", value.unsigned, value.float),
        FieldContent::Fixed64(value) => format!("{} (double {})", value.unsigned, value.double),
        FieldContent::Text(text)
            if field.type_name == "string" || field.type_name == GUESSED_STRING =>
        {
            format!("{:?}", truncate(text))
        }
        FieldContent::Text(hex) => format!("0x{}", truncate(hex)),
        FieldContent::Message(children) => format!("{} fields", children.len()),
        FieldContent::Packed(values) => {
            let shown: Vec<String> = values
                .iter()
                .take(PREVIEW_ELEMENTS)
                .map(packed_preview)
                .collect();
            let more = if values.len() > PREVIEW_ELEMENTS {
                format!(", ... {} more", values.len() - PREVIEW_ELEMENTS)
            } else {
                String::new()
            };
            format!("[{}{}]", shown.join(", "), more)
        }
    }
}

fn packed_preview(value: &PackedScalar) -> String {
    match value {
        PackedScalar::Unsigned(v) => v.to_string(),
        PackedScalar::Signed(v) => v.to_string(),
        PackedScalar::Float(v) => v.to_string(),
        PackedScalar::Double(v) => v.to_string(),
        PackedScalar::Bool(v) => v.to_string(),
        PackedScalar::Enum {
            name: Some(name), ..
        } => name.clone(),
        PackedScalar::Enum { number, name: None } => number.to_string(),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reply_for(hex: &str, schema: &str) -> DecodeReply {
        let bytes = normalize(hex.as_bytes(), InputFormat::Hex).unwrap();
        DecodeRequest::new(bytes)
            .schema(schema)
            .execute(Default::default())
    }

    #[test]
    fn test_read_payload_sources() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x08, 0x96, 0x01]).unwrap();

        let from_file = PayloadSource {
            payload: Some(file.path().to_path_buf()),
            data: None,
        };
        assert_eq!(read_payload(&from_file).unwrap(), vec![0x08, 0x96, 0x01]);

        let inline = PayloadSource {
            payload: None,
            data: Some("08 96 01".to_string()),
        };
        assert_eq!(read_payload(&inline).unwrap(), b"08 96 01".to_vec());

        let missing = PayloadSource {
            payload: Some(PathBuf::from("/nonexistent/payload.bin")),
            data: None,
        };
        let err = read_payload(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read payload file"));
    }

    #[test]
    fn test_normalize_payload_falls_back_to_raw_for_files() {
        let bytes = normalize_payload(b"08 96 01", InputFormat::Auto, true).unwrap();
        assert_eq!(bytes.as_ref(), &[0x08, 0x96, 0x01]);

        let bytes = normalize_payload(b"08 ZZ", InputFormat::Auto, true).unwrap();
        assert_eq!(bytes.as_ref(), b"08 ZZ");

        let err = normalize_payload(b"08 ZZ", InputFormat::Auto, false).unwrap_err();
        assert!(err.to_string().contains("Failed to read payload as auto"));
        assert!(normalize_payload(b"08 ZZ", InputFormat::Hex, true).is_err());
        assert!(normalize_payload(b"", InputFormat::Auto, true).is_err());

        let bytes = normalize_payload(b"05", InputFormat::Binary, true).unwrap();
        assert_eq!(bytes.as_ref(), b"05");
    }

    #[test]
    fn test_read_schema_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "message Test {{ int32 id = 1; }}").unwrap();

        let schema = read_schema(file.path()).unwrap();
        let reply = reply_for("08 96 01", &schema);
        assert_eq!(reply.result.fields[0].field_name.as_deref(), Some("id"));
    }

    #[test]
    fn test_render_json() {
        let reply = reply_for("08 96 01", "message Test { int32 id = 1; }");
        assert_eq!(
            render(&reply, OutputFormat::Json, true).unwrap(),
            r#"{"id":150}"#
        );

        let empty = reply_for("08", "");
        assert_eq!(render(&empty, OutputFormat::Json, true).unwrap(), "{}");
    }

    #[test]
    fn test_render_paths() {
        let reply = reply_for("08 01 08 02 1a 02 08 05", "");
        let paths = render(&reply, OutputFormat::Paths, false).unwrap();
        assert_eq!(
            paths,
            "root.unknown_field_1[0]\t0-1\n\
             root.unknown_field_1[1]\t2-3\n\
             root.unknown_field_3\t4-7\n\
             root.unknown_field_3.unknown_field_1\t6-7"
        );
    }

    #[test]
    fn test_render_tree() {
        let reply = reply_for(
            "08 96 01 12 02 68 69 1a 02 08 05",
            "message T { int32 id = 1; string s = 2; }",
        );
        let tree = render(&reply, OutputFormat::Tree, false).unwrap();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(
            lines,
            [
                "[0-2] id #1 VARINT int32: 150 (zigzag 75)",
                "[3-6] s #2 LENGTH_DELIMITED string: \"hi\"",
                "[7-10] #3 LENGTH_DELIMITED Embedded Message: 1 fields",
                "  [9-10] #1 VARINT varint: 5 (zigzag -3)",
            ]
        );
    }

    #[test]
    fn test_render_result_carries_error() {
        let reply = reply_for("08", "");
        let result = render(&reply, OutputFormat::Result, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["errorByteOffset"], 1);
        assert_eq!(value["unparsedHex"], "");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "a".repeat(PREVIEW_CHARS + 10);
        assert_eq!(truncate(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
