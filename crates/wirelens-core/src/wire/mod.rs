//! Low-level protobuf wire format primitives.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types understood by the decoder:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! The deprecated group wire types (3 and 4) and the unassigned values 6 and
//! 7 are rejected.

mod cursor;

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

pub use cursor::ByteCursor;

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_VALID_NUMBER: u64 = 536_870_911;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types supported by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    Fixed64 = 1,
    /// Length-delimited (strings, bytes, embedded messages, packed fields)
    LengthDelimited = 2,
    /// 32-bit fixed-width
    Fixed32 = 5,
}

impl WireType {
    /// Resolves the low three bits of a tag, reporting `offset` on failure
    pub fn from_tag_bits(value: u8, offset: usize) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            _ => Err(Error::unsupported_wire_type(value, offset)),
        }
    }

    /// Returns the canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Varint => "VARINT",
            WireType::Fixed64 => "FIXED64",
            WireType::LengthDelimited => "LENGTH_DELIMITED",
            WireType::Fixed32 => "FIXED32",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a decoded tag into its field number and raw wire type bits
pub fn split_tag(tag: u64) -> (u64, u8) {
    (tag >> 3, (tag & 0x07) as u8)
}

/// Zigzag-decodes a 64-bit varint (`sint64` interpretation)
pub fn zigzag_decode_64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Zigzag-decodes the low 32 bits of a varint (`sint32` interpretation)
pub fn zigzag_decode_32(value: u64) -> i32 {
    let value = value as u32;
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}
