//! # wirelens-core
//!
//! A library for decoding raw Protocol Buffer payloads, with or without a
//! `.proto` schema, into a byte-annotated field tree.
//!
//! This crate provides the core functionality for:
//! - Reading the protobuf wire format with exact byte offsets
//! - Parsing permissive, possibly incomplete `.proto` text
//! - Decoding payloads as far as possible, reporting where and why decoding stopped
//! - Projecting the field tree into JSON together with a path → byte-range index
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`wire`]: Wire types, varints and the bounds-checked [`ByteCursor`]
//! - [`schema`]: The normalized schema model and its text parser
//! - [`decode`]: The recursive decoder and the [`decode_protobuf`] entry point
//! - [`project`]: JSON projection and path index
//! - [`input`]: Hex / base64 / decimal payload text normalization
//! - [`worker`]: A dedicated decode thread with latest-request-wins semantics
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use wirelens_core::{decode_protobuf, normalize_text, project, DecoderConfig, InputFormat};
//!
//! let bytes = normalize_text("08 96 01", InputFormat::Hex)?;
//! let result = decode_protobuf(&bytes, "message Test { int32 id = 1; }", None, &DecoderConfig::new());
//!
//! assert_eq!(result.fields[0].field_name.as_deref(), Some("id"));
//!
//! let projection = project(&result.fields).expect("one field was decoded");
//! assert_eq!(projection.json["id"], 150);
//! # Ok::<(), wirelens_core::Error>(())
//! ```
//!
//! Decoding never fails outright. A [`DecodeResult`] always carries the
//! fields decoded before any failure, the failure text, its absolute byte
//! offset and the undecoded remainder.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod decode;
pub mod error;
pub mod input;
pub mod project;
pub mod schema;
pub mod wire;
pub mod worker;

// Re-export primary types for convenience
pub use decode::{
    decode, decode_protobuf, ByteRange, DecodeResult, DecodedField, Decoder, DecoderConfig,
    FieldContent, PackedScalar,
};
pub use error::{Error, Result};
pub use input::{normalize, normalize_text, InputFormat};
pub use project::{build_path_index, project, to_json, Projection};
pub use schema::{parse as parse_schema, EnumDef, FieldDef, MessageDef, ParsedSchema};
pub use wire::{ByteCursor, WireType};
pub use worker::{DecodeReply, DecodeRequest, DecodeWorker, RequestId};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
