//! Normalization of user-supplied payload text into bytes.
//!
//! Payloads usually arrive as text copied out of a log line, a debugger or
//! a network capture: a hex dump, a base64 string or a list of decimal
//! byte values. [`normalize`] turns any of these into the byte buffer the
//! decoder consumes.

use crate::error::{Error, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Encoding of a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputFormat {
    /// Detect the encoding from the input itself
    #[default]
    Auto,
    /// Hex digits, optionally separated and `0x`-prefixed
    Hex,
    /// Standard or URL-safe base64, padding optional
    Base64,
    /// Decimal byte values separated by whitespace or commas
    Decimal,
    /// The input bytes as they are
    Binary,
}

impl InputFormat {
    /// Returns the lowercase name of the format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Hex => "hex",
            Self::Base64 => "base64",
            Self::Decimal => "decimal",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hex" => Ok(Self::Hex),
            "base64" | "b64" => Ok(Self::Base64),
            "decimal" | "dec" => Ok(Self::Decimal),
            "binary" | "raw" => Ok(Self::Binary),
            other => Err(format!("unknown input format '{}'", other)),
        }
    }
}

/// Converts `input` into payload bytes according to `format`.
///
/// With [`InputFormat::Auto`], input that is not valid UTF-8 or holds
/// control characters other than whitespace is taken as binary. Text is
/// tried as a decimal byte list (several tokens, all 0..=255, not all two
/// digits wide), then as hex, then as unbroken base64. Anything else is
/// parsed as hex so the error names the offending character.
pub fn normalize(input: &[u8], format: InputFormat) -> Result<Bytes> {
    let bytes = match format {
        InputFormat::Binary => {
            if input.is_empty() {
                return Err(Error::EmptyInput);
            }
            input.to_vec()
        }
        InputFormat::Auto => return normalize_auto(input),
        InputFormat::Hex => parse_hex(&String::from_utf8_lossy(input))?,
        InputFormat::Base64 => parse_base64(&String::from_utf8_lossy(input))?,
        InputFormat::Decimal => parse_decimal(&String::from_utf8_lossy(input))?,
    };

    Ok(Bytes::from(bytes))
}

/// Converts payload text into bytes according to `format`
pub fn normalize_text(text: &str, format: InputFormat) -> Result<Bytes> {
    normalize(text.as_bytes(), format)
}

/// Guesses the encoding of `input`
pub fn detect(input: &[u8]) -> InputFormat {
    let Ok(text) = std::str::from_utf8(input) else {
        return InputFormat::Binary;
    };
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return InputFormat::Binary;
    }
    if looks_decimal(text) {
        return InputFormat::Decimal;
    }
    if text
        .chars()
        .all(|c| c.is_ascii_hexdigit() || is_hex_separator(c) || c == 'x' || c == 'X')
    {
        return InputFormat::Hex;
    }

    // Base64 may be wrapped across lines but is never split into tokens
    let spaced = text.trim().contains([' ', '\t', ',', ':']);
    if !spaced && parse_base64(text).is_ok() {
        return InputFormat::Base64;
    }
    InputFormat::Hex
}

fn normalize_auto(input: &[u8]) -> Result<Bytes> {
    let format = detect(input);
    debug!("detected input format: {}", format);
    normalize(input, format)
}

fn is_hex_separator(c: char) -> bool {
    c.is_whitespace() || c == ':' || c == ','
}

fn is_decimal_separator(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn looks_decimal(text: &str) -> bool {
    let tokens = decimal_tokens(text);
    tokens.len() > 1
        && tokens.iter().all(|t| t.parse::<u8>().is_ok())
        && tokens.iter().any(|t| t.len() != 2)
}

fn decimal_tokens(text: &str) -> Vec<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    text.split(is_decimal_separator)
        .filter(|token| !token.is_empty())
        .collect()
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let chars: Vec<char> = text.chars().collect();
    let mut digits = String::with_capacity(chars.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if is_hex_separator(c) {
            i += 1;
            continue;
        }

        let token_start = i == 0 || is_hex_separator(chars[i - 1]);
        if token_start && c == '0' && matches!(chars.get(i + 1), Some('x' | 'X')) {
            i += 2;
            continue;
        }

        if !c.is_ascii_hexdigit() {
            return Err(Error::InvalidHexCharacter {
                character: c,
                index: i,
            });
        }
        digits.push(c);
        i += 1;
    }

    if digits.is_empty() {
        return Err(Error::EmptyInput);
    }
    if digits.len() % 2 != 0 {
        return Err(Error::OddHexLength {
            length: digits.len(),
        });
    }

    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => Error::InvalidHexCharacter {
            character: c,
            index,
        },
        _ => Error::OddHexLength {
            length: digits.len(),
        },
    })
}

fn parse_decimal(text: &str) -> Result<Vec<u8>> {
    let tokens = decimal_tokens(text);
    if tokens.is_empty() {
        return Err(Error::EmptyInput);
    }

    tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            token.parse::<u8>().map_err(|_| Error::InvalidDecimal {
                token: token.to_string(),
                index,
            })
        })
        .collect()
}

fn parse_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut last_error = None;
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        match engine.decode(&compact) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_error = Some(e),
        }
    }

    Err(Error::InvalidBase64(
        last_error.map_or_else(String::new, |e| e.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto(text: &str) -> Result<Vec<u8>> {
        normalize_text(text, InputFormat::Auto).map(|b| b.to_vec())
    }

    #[test]
    fn test_hex_separators_and_prefixes() {
        let expected = vec![0x08, 0x96, 0x01];
        for text in ["089601", "08 96 01", "08:96:01", "0x08, 0x96, 0x01", "08\n96\t01", "0X089601"] {
            assert_eq!(normalize_text(text, InputFormat::Hex).unwrap().as_ref(), &expected[..]);
        }
    }

    #[test]
    fn test_hex_errors() {
        assert_eq!(
            normalize_text("08 ZZ", InputFormat::Hex),
            Err(Error::InvalidHexCharacter {
                character: 'Z',
                index: 3
            })
        );
        assert_eq!(
            normalize_text("089", InputFormat::Hex),
            Err(Error::OddHexLength { length: 3 })
        );
        assert_eq!(normalize_text("  ", InputFormat::Hex), Err(Error::EmptyInput));
    }

    #[test]
    fn test_decimal() {
        assert_eq!(
            normalize_text("8, 150, 1", InputFormat::Decimal).unwrap().as_ref(),
            &[8, 150, 1]
        );
        assert_eq!(
            normalize_text("[8,150,1]", InputFormat::Decimal).unwrap().as_ref(),
            &[8, 150, 1]
        );
        assert_eq!(
            normalize_text("8 256", InputFormat::Decimal),
            Err(Error::InvalidDecimal {
                token: "256".to_string(),
                index: 1
            })
        );
    }

    #[test]
    fn test_base64_variants() {
        for text in ["CJYB", "CAE=", "CAE", "-_8=", "-_8"] {
            assert!(normalize_text(text, InputFormat::Base64).is_ok(), "{}", text);
        }
        assert_eq!(
            normalize_text("CJ\nYB", InputFormat::Base64).unwrap().as_ref(),
            &[0x08, 0x96, 0x01]
        );
        assert!(matches!(
            normalize_text("C!YB", InputFormat::Base64),
            Err(Error::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_binary_is_passed_through() {
        let data = [0x08, 0x96, 0x01];
        assert_eq!(normalize(&data, InputFormat::Binary).unwrap().as_ref(), &data);
        assert_eq!(normalize(&[], InputFormat::Binary), Err(Error::EmptyInput));
    }

    #[test]
    fn test_auto_detection() {
        assert_eq!(auto("08 96 01").unwrap(), vec![0x08, 0x96, 0x01]);
        assert_eq!(auto("8 150 1").unwrap(), vec![8, 150, 1]);
        assert_eq!(auto("CJYB").unwrap(), vec![0x08, 0x96, 0x01]);
        assert_eq!(auto("CAE=").unwrap(), vec![0x08, 0x01]);

        assert_eq!(detect(&[0x08, 0x96, 0x01]), InputFormat::Binary);
        assert_eq!(detect(&[0x08, 0x01]), InputFormat::Binary);
        assert_eq!(auto("\u{8}\u{1}").unwrap(), vec![0x08, 0x01]);
    }

    #[test]
    fn test_auto_reports_hex_error() {
        assert_eq!(
            auto("08 ZZ"),
            Err(Error::InvalidHexCharacter {
                character: 'Z',
                index: 3
            })
        );
        assert_eq!(auto(""), Err(Error::EmptyInput));
        assert_eq!(auto("abc"), Err(Error::OddHexLength { length: 3 }));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("HEX".parse::<InputFormat>(), Ok(InputFormat::Hex));
        assert_eq!("raw".parse::<InputFormat>(), Ok(InputFormat::Binary));
        assert!("morse".parse::<InputFormat>().is_err());
        assert_eq!(InputFormat::Base64.to_string(), "base64");
    }
}
