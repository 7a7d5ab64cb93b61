//! Error types for the wirelens-core library.
//!
//! This module provides error handling using the `thiserror` crate. Every
//! decode-side variant carries the absolute byte offset at which the failure
//! happened, so a caller can point at the exact position in the original
//! input where decoding stopped.

use thiserror::Error;

/// Result type alias for wirelens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all wirelens operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A varint did not terminate within 10 bytes or ran past the buffer
    #[error("malformed varint at offset {offset}: unterminated or wider than 64 bits")]
    MalformedVarint {
        /// Absolute offset of the first byte of the varint
        offset: usize,
    },

    /// A fixed-width or length-prefixed read went past the end of the buffer
    #[error("buffer underflow at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow {
        /// Absolute offset where the read started
        offset: usize,
        /// Number of bytes the read required
        needed: usize,
        /// Number of bytes left in the buffer
        remaining: usize,
    },

    /// The tag carried a wire type other than VARINT, I64, LEN or I32
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType {
        /// The raw 3-bit wire type
        wire_type: u8,
        /// Absolute offset of the tag
        offset: usize,
    },

    /// The tag carried a field number outside 1..=2^29-1
    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber {
        /// The decoded field number
        number: u64,
        /// Absolute offset of the tag
        offset: usize,
    },

    /// A schema-declared string field did not hold valid UTF-8
    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 {
        /// Absolute offset of the payload
        offset: usize,
    },

    /// A schema-declared sub-message failed to decode
    #[error("failed to decode nested message '{type_name}' at offset {offset}: {cause}")]
    NestedDecodeFailure {
        /// Name of the sub-message type
        type_name: String,
        /// Absolute offset at which the nested decode stopped
        offset: usize,
        /// Rendered cause of the nested failure
        cause: String,
    },

    /// Sub-message nesting exceeded the configured limit
    #[error("nesting depth limit of {limit} exceeded at offset {offset}")]
    DepthLimitExceeded {
        /// Absolute offset of the payload that would exceed the limit
        offset: usize,
        /// The configured limit
        limit: usize,
    },

    /// Schema text was present but held no message definitions
    #[error("no message definitions found in schema")]
    NoMessagesFound,

    /// Hex input held a character that is neither a digit nor a separator
    #[error("invalid hex character '{character}' at index {index}")]
    InvalidHexCharacter {
        /// The offending character
        character: char,
        /// Character index in the input text
        index: usize,
    },

    /// Hex input held an odd number of digits
    #[error("hex input has an odd number of digits ({length})")]
    OddHexLength {
        /// Number of hex digits found
        length: usize,
    },

    /// Base64 input could not be decoded
    #[error("invalid base64 input: {0}")]
    InvalidBase64(String),

    /// Decimal input held a token that is not a byte value
    #[error("invalid decimal byte '{token}' at token {index}")]
    InvalidDecimal {
        /// The offending token
        token: String,
        /// Zero-based token index
        index: usize,
    },

    /// Input text held no data
    #[error("input is empty")]
    EmptyInput,

    /// The decode worker thread is gone
    #[error("decode worker is unavailable")]
    WorkerUnavailable,
}

impl Error {
    /// Creates a new malformed varint error
    pub fn malformed_varint(offset: usize) -> Self {
        Self::MalformedVarint { offset }
    }

    /// Creates a new buffer underflow error
    pub fn buffer_underflow(offset: usize, needed: usize, remaining: usize) -> Self {
        Self::BufferUnderflow {
            offset,
            needed,
            remaining,
        }
    }

    /// Creates a new unsupported wire type error
    pub fn unsupported_wire_type(wire_type: u8, offset: usize) -> Self {
        Self::UnsupportedWireType { wire_type, offset }
    }

    /// Creates a new nested decode failure wrapping `cause`
    pub fn nested(type_name: impl Into<String>, cause: &Error) -> Self {
        Self::NestedDecodeFailure {
            type_name: type_name.into(),
            offset: cause.offset().unwrap_or_default(),
            cause: cause.to_string(),
        }
    }

    /// Returns the absolute byte offset carried by decode-side errors
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::MalformedVarint { offset }
            | Self::BufferUnderflow { offset, .. }
            | Self::UnsupportedWireType { offset, .. }
            | Self::InvalidFieldNumber { offset, .. }
            | Self::InvalidUtf8 { offset }
            | Self::NestedDecodeFailure { offset, .. }
            | Self::DepthLimitExceeded { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Returns true if this error came from the input normalization layer
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidHexCharacter { .. }
                | Self::OddHexLength { .. }
                | Self::InvalidBase64(_)
                | Self::InvalidDecimal { .. }
                | Self::EmptyInput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_offset() {
        let err = Error::malformed_varint(7);
        assert!(err.to_string().contains("offset 7"));

        let err = Error::buffer_underflow(3, 8, 2);
        assert!(err.to_string().contains("needed 8"));
        assert!(err.to_string().contains("2 remaining"));
    }

    #[test]
    fn test_nested_carries_inner_offset() {
        let inner = Error::unsupported_wire_type(7, 12);
        let err = Error::nested("Inner", &inner);
        assert_eq!(err.offset(), Some(12));
        assert!(err.to_string().contains("'Inner'"));
        assert!(err.to_string().contains("unsupported wire type 7"));
    }

    #[test]
    fn test_is_input_error() {
        assert!(Error::EmptyInput.is_input_error());
        assert!(!Error::NoMessagesFound.is_input_error());
    }
}
