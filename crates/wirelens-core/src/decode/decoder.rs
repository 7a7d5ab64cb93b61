//! Recursive wire-format decoder.

use super::{
    ByteRange, DecodedField, DecoderConfig, FieldContent, Fixed32Value, Fixed64Value,
    PackedScalar, VarintValue, EMBEDDED_MESSAGE, GUESSED_STRING,
};
use crate::error::{Error, Result};
use crate::schema::{EnumDef, FieldDef, MessageDef, ParsedSchema};
use crate::wire::{
    split_tag, zigzag_decode_32, zigzag_decode_64, ByteCursor, WireType, MAX_VALID_NUMBER,
};
use bytes::Bytes;
use tracing::trace;

/// Decodes protobuf messages, consulting an optional schema.
///
/// A decoder holds no mutable state; every call to
/// [`decode_message`](Decoder::decode_message) owns its own cursor, and
/// nested payloads are decoded by recursion over zero-copy sub-slices of
/// the parent buffer.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    schema: Option<&'a ParsedSchema>,
    config: &'a DecoderConfig,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over an optional schema
    pub fn new(schema: Option<&'a ParsedSchema>, config: &'a DecoderConfig) -> Self {
        Self { schema, config }
    }

    /// Decodes fields from `data` until the buffer ends or a field fails.
    ///
    /// `base` is the absolute offset of `data[0]` in the top-level buffer.
    /// Returns the fields decoded before any failure, and the failure.
    pub fn decode_message(
        &self,
        data: &Bytes,
        base: usize,
        message: Option<&'a MessageDef>,
        depth: usize,
    ) -> (Vec<DecodedField>, Option<Error>) {
        let mut fields = Vec::new();

        if depth > self.config.max_depth {
            let error = Error::DepthLimitExceeded {
                offset: base,
                limit: self.config.max_depth,
            };
            return (fields, Some(error));
        }

        let mut cursor = ByteCursor::with_base(data, base);
        while !cursor.at_end() {
            match self.decode_field(&mut cursor, data, message, depth) {
                Ok(field) => fields.push(field),
                Err(e) => {
                    trace!("decode stopped after {} fields: {}", fields.len(), e);
                    return (fields, Some(e));
                }
            }
        }

        (fields, None)
    }

    fn decode_field(
        &self,
        cursor: &mut ByteCursor<'_>,
        data: &Bytes,
        message: Option<&'a MessageDef>,
        depth: usize,
    ) -> Result<DecodedField> {
        let start = cursor.position();
        let tag_offset = cursor.absolute_position();

        let (number, bits) = split_tag(cursor.read_varint()?);
        let wire_type = WireType::from_tag_bits(bits, tag_offset)?;
        if number == 0 || number > MAX_VALID_NUMBER {
            return Err(Error::InvalidFieldNumber {
                number,
                offset: tag_offset,
            });
        }

        let field_def = message.and_then(|m| m.field(number));
        // A declared type that cannot arrive on this wire type is ignored
        let typed = field_def.filter(|def| self.accepts(def, message, wire_type));

        let mut payload_start_offset = None;
        let (type_name, content) = match wire_type {
            WireType::Varint => {
                let mut value = VarintValue::new(cursor.read_varint()?);
                if let Some(def) = typed {
                    value.enum_name = self
                        .resolve_enum(message, def)
                        .and_then(|e| e.name_of(value.twos_complement))
                        .map(String::from);
                }
                let type_name = typed.map_or("varint", |def| def.type_name.as_str());
                (type_name.to_string(), FieldContent::Varint(value))
            }
            WireType::Fixed64 => {
                let value = Fixed64Value::new(cursor.read_fixed64()?);
                let type_name = typed.map_or("fixed64", |def| def.type_name.as_str());
                (type_name.to_string(), FieldContent::Fixed64(value))
            }
            WireType::Fixed32 => {
                let value = Fixed32Value::new(cursor.read_fixed32()?);
                let type_name = typed.map_or("fixed32", |def| def.type_name.as_str());
                (type_name.to_string(), FieldContent::Fixed32(value))
            }
            WireType::LengthDelimited => {
                let length = cursor.read_varint()?;
                let length = usize::try_from(length).unwrap_or(usize::MAX);
                let payload_start = cursor.position();
                let payload_offset = cursor.absolute_position();
                cursor.read_bytes(length)?;
                payload_start_offset = Some(payload_offset);

                let payload = data.slice(payload_start..payload_start + length);
                self.decode_length_delimited(&payload, payload_offset, typed, message, depth)?
            }
        };

        let end = cursor.position();
        let field = DecodedField {
            byte_range: ByteRange::new(tag_offset, cursor.absolute_position() - 1),
            field_number: number as u32,
            field_name: field_def.map(|def| def.name.clone()),
            wire_type,
            type_name,
            content,
            raw_bytes: data.slice(start..end),
            payload_start_offset,
        };

        trace!(
            "field {} ({}) {} at {}..={}",
            field.field_number,
            field.wire_type,
            field.type_name,
            field.byte_range.start,
            field.byte_range.end
        );
        Ok(field)
    }

    fn decode_length_delimited(
        &self,
        payload: &Bytes,
        offset: usize,
        typed: Option<&'a FieldDef>,
        message: Option<&'a MessageDef>,
        depth: usize,
    ) -> Result<(String, FieldContent)> {
        let Some(def) = typed else {
            return Ok(self.guess_payload(payload, offset, depth));
        };

        if self.is_packable(def, message) {
            let values = self.decode_packed(payload, offset, def, message)?;
            return Ok((
                format!("repeated {}", def.type_name),
                FieldContent::Packed(values),
            ));
        }

        if let Some(sub) = self.schema.and_then(|s| s.message(&def.type_name)) {
            let (children, error) = self.decode_message(payload, offset, Some(sub), depth + 1);
            if let Some(error) = error {
                return Err(Error::nested(def.type_name.clone(), &error));
            }
            return Ok((def.type_name.clone(), FieldContent::Message(children)));
        }

        match def.type_name.as_str() {
            "string" => match std::str::from_utf8(payload) {
                Ok(text) => Ok((def.type_name.clone(), FieldContent::Text(text.to_string()))),
                Err(_) => Err(Error::InvalidUtf8 { offset }),
            },
            "bytes" => Ok((
                def.type_name.clone(),
                FieldContent::Text(hex::encode(payload)),
            )),
            _ => Ok(self.guess_payload(payload, offset, depth)),
        }
    }

    /// Schema-less interpretation of a payload: an embedded message if it
    /// decodes cleanly to at least one field, else UTF-8 text, else hex.
    fn guess_payload(
        &self,
        payload: &Bytes,
        offset: usize,
        depth: usize,
    ) -> (String, FieldContent) {
        if !payload.is_empty() && depth < self.config.max_depth {
            let (children, error) = self.decode_message(payload, offset, None, depth + 1);
            if error.is_none() && !children.is_empty() {
                trace!("payload at {} guessed as message", offset);
                return (EMBEDDED_MESSAGE.to_string(), FieldContent::Message(children));
            }
        }

        match std::str::from_utf8(payload) {
            Ok(text) => (GUESSED_STRING.to_string(), FieldContent::Text(text.to_string())),
            Err(_) => ("bytes".to_string(), FieldContent::Text(hex::encode(payload))),
        }
    }

    fn decode_packed(
        &self,
        payload: &[u8],
        offset: usize,
        def: &FieldDef,
        message: Option<&'a MessageDef>,
    ) -> Result<Vec<PackedScalar>> {
        let enum_def = self.resolve_enum(message, def);
        let mut cursor = ByteCursor::with_base(payload, offset);
        let mut values = Vec::new();

        while !cursor.at_end() {
            let value = match def.type_name.as_str() {
                "int32" => PackedScalar::Signed(cursor.read_varint()? as i32 as i64),
                "int64" => PackedScalar::Signed(cursor.read_varint()? as i64),
                "uint32" | "uint64" => PackedScalar::Unsigned(cursor.read_varint()?),
                "sint32" => PackedScalar::Signed(zigzag_decode_32(cursor.read_varint()?) as i64),
                "sint64" => PackedScalar::Signed(zigzag_decode_64(cursor.read_varint()?)),
                "bool" => PackedScalar::Bool(cursor.read_varint()? != 0),
                "fixed32" => PackedScalar::Unsigned(cursor.read_fixed32()? as u64),
                "fixed64" => PackedScalar::Unsigned(cursor.read_fixed64()?),
                "sfixed32" => PackedScalar::Signed(cursor.read_fixed32()? as i32 as i64),
                "sfixed64" => PackedScalar::Signed(cursor.read_fixed64()? as i64),
                "float" => PackedScalar::Float(f32::from_bits(cursor.read_fixed32()?)),
                "double" => PackedScalar::Double(f64::from_bits(cursor.read_fixed64()?)),
                _ => {
                    let number = cursor.read_varint()? as i64;
                    PackedScalar::Enum {
                        number,
                        name: enum_def.and_then(|e| e.name_of(number)).map(String::from),
                    }
                }
            };
            values.push(value);
        }

        Ok(values)
    }

    fn is_packable(&self, def: &FieldDef, message: Option<&'a MessageDef>) -> bool {
        self.schema
            .map_or(false, |schema| def.is_packable(schema, message))
    }

    fn resolve_enum(
        &self,
        message: Option<&'a MessageDef>,
        def: &FieldDef,
    ) -> Option<&'a EnumDef> {
        self.schema
            .and_then(|schema| schema.resolve_enum(message, &def.type_name))
    }

    /// Returns true if `def`'s declared type can arrive as `wire_type`.
    /// Types the decoder cannot classify are always accepted.
    fn accepts(
        &self,
        def: &FieldDef,
        message: Option<&'a MessageDef>,
        wire_type: WireType,
    ) -> bool {
        let expected = match def.type_name.as_str() {
            "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "bool" | "enum" => {
                Some(WireType::Varint)
            }
            "fixed64" | "sfixed64" | "double" => Some(WireType::Fixed64),
            "fixed32" | "sfixed32" | "float" => Some(WireType::Fixed32),
            "string" | "bytes" => Some(WireType::LengthDelimited),
            _ if def.is_map => Some(WireType::LengthDelimited),
            name if self.schema.and_then(|s| s.message(name)).is_some() => {
                Some(WireType::LengthDelimited)
            }
            _ if self.resolve_enum(message, def).is_some() => Some(WireType::Varint),
            _ => None,
        };

        match expected {
            None => true,
            Some(expected) if expected == wire_type => true,
            Some(_) => wire_type == WireType::LengthDelimited && self.is_packable(def, message),
        }
    }
}
