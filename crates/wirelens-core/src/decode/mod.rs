//! Wire-format decoding into a byte-annotated field tree.
//!
//! ## Architecture
//!
//! [`decode_protobuf`] is the top-level entry. It parses the optional schema
//! text, runs a [`Decoder`] over the buffer and applies the fallback rules:
//!
//! 1. No schema text: decode schema-less.
//! 2. Schema text that does not parse: decode schema-less, with a warning.
//! 3. A parsed schema that yields no fields on a non-empty buffer: retry
//!    schema-less and, if that finds fields, return it with a warning.
//!
//! Decoding always prefers partial success. On the first failure the
//! decoder stops and the [`DecodeResult`] carries every field decoded so
//! far, the error text, its absolute offset and the undecoded remainder.

mod decoder;

use crate::error::Error;
use crate::schema::{self, ParsedSchema};
use crate::wire::WireType;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

pub use decoder::Decoder;

/// Type label for a length-delimited payload that decoded as a message
pub const EMBEDDED_MESSAGE: &str = "Embedded Message";

/// Type label for a length-delimited payload that decoded as UTF-8
pub const GUESSED_STRING: &str = "string (guessed)";

/// Inclusive byte range inside the top-level buffer.
///
/// Serializes as a `[start, end]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte of the range
    pub start: usize,
    /// Last byte of the range
    pub end: usize,
}

impl ByteRange {
    /// Creates a range from its inclusive bounds
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered
    pub fn size(&self) -> usize {
        self.end - self.start + 1
    }
}

impl Serialize for ByteRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.start, self.end].serialize(serializer)
    }
}

/// Every interpretation of a varint value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarintValue {
    /// Raw unsigned value
    pub unsigned: u64,
    /// Zigzag-decoded value (`sint32`/`sint64`)
    pub signed: i64,
    /// Two's complement reinterpretation (`int32`/`int64`)
    pub twos_complement: i64,
    /// Symbolic name, when the field's enum declares this value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
}

impl VarintValue {
    /// Builds every interpretation of `raw`
    pub fn new(raw: u64) -> Self {
        Self {
            unsigned: raw,
            signed: crate::wire::zigzag_decode_64(raw),
            twos_complement: raw as i64,
            enum_name: None,
        }
    }
}

/// Every interpretation of a 32-bit fixed value
///
/// Equality compares bits, so a NaN reinterpretation equals itself.
#[derive(Debug, Clone, Serialize)]
pub struct Fixed32Value {
    /// Raw unsigned value
    pub unsigned: u32,
    /// Signed value (`sfixed32`)
    pub signed: i32,
    /// IEEE-754 value (`float`)
    pub float: f32,
}

impl Fixed32Value {
    /// Builds every interpretation of `raw`
    pub fn new(raw: u32) -> Self {
        Self {
            unsigned: raw,
            signed: raw as i32,
            float: f32::from_bits(raw),
        }
    }
}

/// Every interpretation of a 64-bit fixed value
///
/// Equality compares bits, so a NaN reinterpretation equals itself.
#[derive(Debug, Clone, Serialize)]
pub struct Fixed64Value {
    /// Raw unsigned value
    pub unsigned: u64,
    /// Signed value (`sfixed64`)
    pub signed: i64,
    /// IEEE-754 value (`double`)
    pub double: f64,
}

impl Fixed64Value {
    /// Builds every interpretation of `raw`
    pub fn new(raw: u64) -> Self {
        Self {
            unsigned: raw,
            signed: raw as i64,
            double: f64::from_bits(raw),
        }
    }
}

impl PartialEq for Fixed32Value {
    fn eq(&self, other: &Self) -> bool {
        self.unsigned == other.unsigned
            && self.signed == other.signed
            && self.float.to_bits() == other.float.to_bits()
    }
}

impl Eq for Fixed32Value {}

impl PartialEq for Fixed64Value {
    fn eq(&self, other: &Self) -> bool {
        self.unsigned == other.unsigned
            && self.signed == other.signed
            && self.double.to_bits() == other.double.to_bits()
    }
}

impl Eq for Fixed64Value {}

/// One element of a packed repeated field
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PackedScalar {
    /// `uint32`, `uint64`, `fixed32`, `fixed64`
    Unsigned(u64),
    /// `int32`, `int64`, `sint32`, `sint64`, `sfixed32`, `sfixed64`
    Signed(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `bool`
    Bool(bool),
    /// An enum value and, when declared, its symbolic name
    Enum {
        /// Numeric value
        number: i64,
        /// Symbolic name
        name: Option<String>,
    },
}

impl PartialEq for PackedScalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unsigned(a), Self::Unsigned(b)) => a == b,
            (Self::Signed(a), Self::Signed(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (
                Self::Enum { number: a, name: x },
                Self::Enum { number: b, name: y },
            ) => a == b && x == y,
            _ => false,
        }
    }
}

impl Eq for PackedScalar {}

/// Decoded content of a field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldContent {
    /// UTF-8 text, or hex-rendered bytes
    Text(String),
    /// Fields of a sub-message
    Message(Vec<DecodedField>),
    /// Elements of a packed repeated field
    Packed(Vec<PackedScalar>),
    /// A varint value
    Varint(VarintValue),
    /// A 32-bit fixed value
    Fixed32(Fixed32Value),
    /// A 64-bit fixed value
    Fixed64(Fixed64Value),
}

/// One decoded field occurrence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedField {
    /// Bytes spanned by tag, length and payload in the top-level buffer
    pub byte_range: ByteRange,
    /// Field number from the tag
    pub field_number: u32,
    /// Declared name, if the active message definition has this number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Wire type from the tag
    pub wire_type: WireType,
    /// Schema type name or heuristic label
    pub type_name: String,
    /// Decoded content
    pub content: FieldContent,
    /// The bytes covered by `byte_range`
    #[serde(serialize_with = "serialize_hex")]
    pub raw_bytes: Bytes,
    /// Absolute offset of a length-delimited payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_start_offset: Option<usize>,
}

impl DecodedField {
    /// Key used when projecting: the field name, or `unknown_field_<n>`
    pub fn key(&self) -> String {
        match &self.field_name {
            Some(name) => name.clone(),
            None => format!("unknown_field_{}", self.field_number),
        }
    }

    /// Child fields, if this field holds a sub-message
    pub fn children(&self) -> Option<&[DecodedField]> {
        match &self.content {
            FieldContent::Message(children) => Some(children),
            _ => None,
        }
    }
}

fn serialize_hex<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// Configuration for a decode
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum sub-message nesting
    pub max_depth: usize,
    /// Absolute offset of the buffer's first byte in the original input
    pub base_offset: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            base_offset: 0,
        }
    }
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum sub-message nesting
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the absolute offset of the buffer's first byte
    pub fn base_offset(mut self, offset: usize) -> Self {
        self.base_offset = offset;
        self
    }
}

/// Outcome of a decode
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeResult {
    /// Fields decoded before decoding stopped
    pub fields: Vec<DecodedField>,
    /// Why decoding stopped, with any warnings prepended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Hex of the bytes left undecoded after a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unparsed_hex: Option<String>,
    /// Absolute offset of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_byte_offset: Option<usize>,
    /// Schema fallback notices
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DecodeResult {
    /// Returns true if decoding stopped on a failure
    pub fn is_partial(&self) -> bool {
        self.error_byte_offset.is_some()
    }

    /// Records a warning, prepending it to the error text if there is one
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if let Some(error) = &mut self.error {
            *error = format!("Warning: {}\n{}", warning, error);
        }
        self.warnings.push(warning);
    }

    fn from_parts(
        data: &Bytes,
        base: usize,
        fields: Vec<DecodedField>,
        error: Option<Error>,
    ) -> Self {
        let mut result = Self {
            fields,
            ..Self::default()
        };

        if let Some(error) = error {
            let offset = error.offset().unwrap_or(base);
            let local = offset.saturating_sub(base).min(data.len());
            result.unparsed_hex = Some(hex::encode(&data[local..]));
            result.error_byte_offset = Some(offset);
            result.error = Some(error.to_string());
        }

        result
    }
}

/// Decodes `data` against an already-parsed schema.
///
/// `message_name` selects the message definition for the top level; with
/// `None` the schema's root message is used. A name the schema does not
/// know is reported as a warning and decoding continues schema-less.
pub fn decode(
    data: &Bytes,
    schema: Option<&ParsedSchema>,
    message_name: Option<&str>,
    config: &DecoderConfig,
) -> DecodeResult {
    let mut missing = None;
    let message = schema.and_then(|schema| {
        let name = message_name.or(schema.root_message.as_deref())?;
        let found = schema.message(name);
        if found.is_none() {
            missing = Some(name.to_string());
        }
        found
    });

    debug!(
        "decoding {} bytes at base {} as {:?}",
        data.len(),
        config.base_offset,
        message.map(|m| m.name.as_str())
    );

    let decoder = Decoder::new(schema, config);
    let (fields, error) = decoder.decode_message(data, config.base_offset, message, 0);
    let mut result = DecodeResult::from_parts(data, config.base_offset, fields, error);

    if let Some(name) = missing {
        warn!("message '{}' not found in schema", name);
        result.add_warning(format!(
            "message '{}' not found in schema; decoded without a message definition",
            name
        ));
    }

    debug!(
        "decoded {} top-level fields, error: {:?}",
        result.fields.len(),
        result.error_byte_offset
    );
    result
}

/// Decodes `data`, guided by optional `.proto` schema text.
///
/// A schema failure never blocks decoding: unparseable schema text, or a
/// schema that matches none of the data, falls back to schema-less
/// decoding with a warning.
pub fn decode_protobuf(
    data: &Bytes,
    schema_text: &str,
    message_name: Option<&str>,
    config: &DecoderConfig,
) -> DecodeResult {
    if schema_text.trim().is_empty() {
        return decode(data, None, None, config);
    }

    let schema = match schema::parse(schema_text) {
        Ok(schema) => schema,
        Err(e) => {
            warn!("schema parse failed: {}", e);
            let mut result = decode(data, None, None, config);
            result.add_warning(format!(
                "schema could not be parsed ({}); decoded without schema",
                e
            ));
            return result;
        }
    };

    let result = decode(data, Some(&schema), message_name, config);
    if !result.fields.is_empty() || data.is_empty() {
        return result;
    }

    let mut fallback = decode(data, None, None, config);
    if fallback.fields.is_empty() {
        return result;
    }

    warn!("schema matched none of the data, using schema-less decode");
    let mut warning = String::from("schema did not match the data; showing schema-less decode");
    if let Some(error) = &result.error {
        warning.push_str(&format!(" (schema decode failed: {})", error));
    }
    fallback.add_warning(warning);
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[test]
    fn test_varint_interpretations() {
        let value = VarintValue::new(150);
        assert_eq!(value.unsigned, 150);
        assert_eq!(value.signed, 75);
        assert_eq!(value.twos_complement, 150);

        let value = VarintValue::new(u64::MAX);
        assert_eq!(value.twos_complement, -1);
    }

    #[test]
    fn test_fixed_interpretations() {
        let value = Fixed32Value::new(1.5f32.to_bits());
        assert_eq!(value.float, 1.5);

        let value = Fixed32Value::new(u32::MAX);
        assert_eq!(value.signed, -1);

        let value = Fixed64Value::new((-2.25f64).to_bits());
        assert_eq!(value.double, -2.25);
        assert!(value.signed < 0);
    }

    #[test]
    fn test_nan_fixed_values_equal_themselves() {
        let double = Fixed64Value::new(u64::MAX);
        assert!(double.double.is_nan());
        assert_eq!(double, double.clone());
        assert_ne!(double, Fixed64Value::new(f64::NAN.to_bits()));

        let float = Fixed32Value::new(u32::MAX);
        assert_eq!(float, float.clone());

        let packed = PackedScalar::Float(f32::from_bits(u32::MAX));
        assert_eq!(packed, packed.clone());
        assert_ne!(PackedScalar::Float(0.0), PackedScalar::Float(-0.0));
        assert_ne!(PackedScalar::Unsigned(1), PackedScalar::Signed(1));
    }

    #[test]
    fn test_nan_payload_decodes_identically() {
        let data = bytes(&[0x09, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let first = decode_protobuf(&data, "", None, &DecoderConfig::new());
        let second = decode_protobuf(&data, "", None, &DecoderConfig::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_byte_range_len() {
        assert_eq!(ByteRange::new(3, 3).size(), 1);
        assert_eq!(ByteRange::new(0, 8).size(), 9);
    }

    #[test]
    fn test_schema_less_entry() {
        let data = bytes(&[0x08, 0x96, 0x01]);
        let result = decode_protobuf(&data, "", None, &DecoderConfig::new());
        assert_eq!(result.fields.len(), 1);
        assert!(result.error.is_none());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_schema_field_names() {
        let result = decode_protobuf(
            &bytes(&[0x08, 0x96, 0x01]),
            "message Test { int32 id = 1; }",
            None,
            &DecoderConfig::new(),
        );
        let field = &result.fields[0];
        assert_eq!(field.field_name.as_deref(), Some("id"));
        assert_eq!(field.type_name, "int32");
    }

    #[test]
    fn test_unparseable_schema_falls_back() {
        let result = decode_protobuf(
            &bytes(&[0x08, 0x96, 0x01, 0x0F]),
            "this is not a schema",
            None,
            &DecoderConfig::new(),
        );
        assert_eq!(result.fields.len(), 1);
        assert!(result.fields[0].field_name.is_none());
        assert_eq!(result.warnings.len(), 1);

        let error = result.error.unwrap();
        assert!(error.starts_with("Warning: schema could not be parsed"));
        assert!(error.contains("unsupported wire type 7 at offset 3"));
    }

    #[test]
    fn test_non_matching_schema_falls_back() {
        // Field 1 declared as a string, but the payload is not UTF-8
        let data = bytes(&[0x0A, 0x02, 0xFF, 0xFE, 0x10, 0x01]);
        let result = decode_protobuf(
            &data,
            "message Text { string body = 1; }",
            None,
            &DecoderConfig::new(),
        );

        assert_eq!(result.fields.len(), 2);
        assert!(result.fields[0].field_name.is_none());
        assert_eq!(result.fields[0].type_name, "bytes");
        assert!(result.error.is_none());
        assert!(result.warnings[0].contains("schema did not match"));
        assert!(result.warnings[0].contains("invalid UTF-8"));
    }

    #[test]
    fn test_unknown_message_name_warns() {
        let result = decode_protobuf(
            &bytes(&[0x08, 0x01]),
            "message Test { int32 id = 1; }",
            Some("Nope"),
            &DecoderConfig::new(),
        );
        assert_eq!(result.fields.len(), 1);
        assert!(result.fields[0].field_name.is_none());
        assert!(result.warnings[0].contains("'Nope'"));
    }

    #[test]
    fn test_truncated_varint_reports_offset() {
        let result = decode_protobuf(&bytes(&[0x08]), "", None, &DecoderConfig::new());
        assert!(result.fields.is_empty());
        assert_eq!(result.error_byte_offset, Some(1));
        assert_eq!(result.unparsed_hex.as_deref(), Some(""));
        assert!(result.error.unwrap().contains("malformed varint at offset 1"));
    }

    #[test]
    fn test_base_offset_shifts_everything() {
        let config = DecoderConfig::new().base_offset(100);
        let result = decode_protobuf(&bytes(&[0x08, 0x05, 0x10]), "", None, &config);
        assert_eq!(result.fields[0].byte_range, ByteRange::new(100, 101));
        assert_eq!(result.error_byte_offset, Some(103));
        assert_eq!(result.unparsed_hex.as_deref(), Some(""));
    }
}
