//! Projection of a decoded field tree into JSON, plus a path index.
//!
//! The JSON value groups repeated occurrences of a field under one key and
//! narrows 64-bit integers so they survive a JSON consumer that stores
//! numbers as doubles: values within ±(2^53 - 1) are emitted as numbers,
//! anything wider as decimal strings.
//!
//! The path index maps `root.<key>` / `root.<key>[i]` paths to the byte
//! range of the field occurrence, so a consumer can highlight the bytes
//! behind any node of the JSON value.

use crate::decode::{ByteRange, DecodedField, FieldContent, PackedScalar, GUESSED_STRING};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Largest integer magnitude a double represents exactly
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Key holding the hex text in a hex-payload marker
pub const HEX_MARKER_KEY: &str = "__hex";

/// Key holding the payload offset in a hex-payload marker
pub const OFFSET_MARKER_KEY: &str = "__offset";

/// Root segment of every path in the index
pub const ROOT_PATH: &str = "root";

/// A projected decode: the JSON value and its path index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    /// Grouped JSON object
    pub json: Value,
    /// Byte range of every field occurrence, by path
    pub path_index: BTreeMap<String, ByteRange>,
}

/// Projects `fields`, or returns `None` when there is nothing to project
pub fn project(fields: &[DecodedField]) -> Option<Projection> {
    if fields.is_empty() {
        return None;
    }

    Some(Projection {
        json: to_json(fields),
        path_index: build_path_index(fields),
    })
}

/// Converts a list of sibling fields into a JSON object.
///
/// Fields are keyed by name, or `unknown_field_<n>` without one. The first
/// occurrence of a key is stored as-is; a second occurrence turns the entry
/// into an array and later ones are appended. Packed arrays stored under a
/// repeated key are flattened into that array.
pub fn to_json(fields: &[DecodedField]) -> Value {
    let mut object = Map::new();
    let mut promoted = HashSet::new();

    for field in fields {
        let key = field.key();
        let value = field_json(field);

        match object.get_mut(&key) {
            None => {
                object.insert(key, value);
            }
            Some(Value::Array(items)) if promoted.contains(&key) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
                promoted.insert(key);
            }
        }
    }

    for key in &promoted {
        if let Some(Value::Array(items)) = object.get_mut(key) {
            if items.iter().any(Value::is_array) {
                let flattened: Vec<Value> = items
                    .drain(..)
                    .flat_map(|item| match item {
                        Value::Array(inner) => inner,
                        other => vec![other],
                    })
                    .collect();
                *items = flattened;
            }
        }
    }

    Value::Object(object)
}

/// Builds the path → byte range index for `fields` and their descendants
pub fn build_path_index(fields: &[DecodedField]) -> BTreeMap<String, ByteRange> {
    let mut index = BTreeMap::new();
    index_fields(fields, ROOT_PATH, &mut index);
    index
}

fn index_fields(fields: &[DecodedField], prefix: &str, index: &mut BTreeMap<String, ByteRange>) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for field in fields {
        *counts.entry(field.key()).or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for field in fields {
        let key = field.key();
        let path = if counts[&key] > 1 {
            let occurrence = seen.entry(key.clone()).or_default();
            let path = format!("{}.{}[{}]", prefix, key, occurrence);
            *occurrence += 1;
            path
        } else {
            format!("{}.{}", prefix, key)
        };

        if let Some(children) = field.children() {
            index_fields(children, &path, index);
        }
        index.insert(path, field.byte_range);
    }
}

fn field_json(field: &DecodedField) -> Value {
    let type_name = field.type_name.as_str();

    match &field.content {
        FieldContent::Text(text) if type_name == "string" || type_name == GUESSED_STRING => {
            Value::String(text.clone())
        }
        FieldContent::Text(text) => {
            let mut marker = Map::new();
            marker.insert(HEX_MARKER_KEY.to_string(), Value::String(text.clone()));
            marker.insert(
                OFFSET_MARKER_KEY.to_string(),
                field.payload_start_offset.map_or(Value::Null, Value::from),
            );
            Value::Object(marker)
        }
        FieldContent::Message(children) => to_json(children),
        FieldContent::Packed(values) => Value::Array(values.iter().map(packed_json).collect()),
        FieldContent::Varint(value) => {
            if let Some(name) = &value.enum_name {
                return Value::String(name.clone());
            }
            match type_name {
                "int32" | "int64" => signed_json(value.twos_complement),
                "bool" => Value::Bool(value.unsigned != 0),
                t if t.starts_with("sint") => signed_json(value.signed),
                _ => unsigned_json(value.unsigned),
            }
        }
        FieldContent::Fixed32(value) => match type_name {
            "float" => f32_json(value.float),
            t if t.starts_with("sfixed") => signed_json(value.signed as i64),
            _ => unsigned_json(value.unsigned as u64),
        },
        FieldContent::Fixed64(value) => match type_name {
            "double" => f64_json(value.double),
            t if t.starts_with("sfixed") => signed_json(value.signed),
            _ => unsigned_json(value.unsigned),
        },
    }
}

fn packed_json(value: &PackedScalar) -> Value {
    match value {
        PackedScalar::Unsigned(v) => unsigned_json(*v),
        PackedScalar::Signed(v) => signed_json(*v),
        PackedScalar::Float(v) => f32_json(*v),
        PackedScalar::Double(v) => f64_json(*v),
        PackedScalar::Bool(v) => Value::Bool(*v),
        PackedScalar::Enum {
            name: Some(name), ..
        } => Value::String(name.clone()),
        PackedScalar::Enum { number, name: None } => signed_json(*number),
    }
}

/// Emits `value` as a number if it is a safe integer, else as decimal text
pub fn unsigned_json(value: u64) -> Value {
    if value <= MAX_SAFE_INTEGER {
        Value::from(value)
    } else {
        Value::String(value.to_string())
    }
}

/// Emits `value` as a number if it is a safe integer, else as decimal text
pub fn signed_json(value: i64) -> Value {
    if value.unsigned_abs() <= MAX_SAFE_INTEGER {
        Value::from(value)
    } else {
        Value::String(value.to_string())
    }
}

fn f32_json(value: f32) -> Value {
    // Go through the shortest decimal form so 0.1f32 stays 0.1
    match value.to_string().parse::<f64>() {
        Ok(widened) => f64_json(widened),
        Err(_) => f64_json(f64::from(value)),
    }
}

fn f64_json(value: f64) -> Value {
    match Number::from_f64(value) {
        Some(number) => Value::Number(number),
        None if value.is_nan() => Value::String("NaN".to_string()),
        None if value > 0.0 => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}
