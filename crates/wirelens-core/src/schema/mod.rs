//! Normalized `.proto` schema model.
//!
//! A [`ParsedSchema`] is built once per decode from raw schema text by
//! [`parse`] and is never mutated afterwards. Messages and enums are keyed
//! by their simple (unqualified) names; lookups accept qualified references
//! such as `.pkg.Outer.Inner` by falling back to the last dotted segment.

mod parser;

use serde::Serialize;
use std::collections::BTreeMap;

pub use parser::parse;

/// Scalar types that can appear in a packed repeated field
pub const PACKABLE_SCALARS: &[&str] = &[
    "int32", "int64", "uint32", "uint64", "sint32", "sint64", "bool", "enum", "fixed32",
    "fixed64", "sfixed32", "sfixed64", "float", "double",
];

/// A parsed, normalized schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSchema {
    /// Message definitions by simple name
    pub messages: BTreeMap<String, MessageDef>,
    /// Every enum found anywhere in the text, by simple name
    pub enums: BTreeMap<String, EnumDef>,
    /// The first message encountered in the text
    pub root_message: Option<String>,
}

/// A message definition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageDef {
    /// Simple name of the message
    pub name: String,
    /// Field definitions by field number
    pub fields: BTreeMap<u32, FieldDef>,
    /// Enums declared directly inside this message
    pub enums: BTreeMap<String, EnumDef>,
}

/// A field declaration inside a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    /// Declared field name
    pub name: String,
    /// Declared type, as written (`int32`, `Outer.Inner`, `map<string,int32>`)
    pub type_name: String,
    /// Declared field number
    pub field_number: u32,
    /// Declared `repeated`, or a map
    pub is_repeated: bool,
    /// Declared as `map<K,V>`
    pub is_map: bool,
}

/// An enum definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnumDef {
    /// Simple name of the enum
    pub name: String,
    /// Symbolic names by numeric value; the first name wins for aliases
    pub values: BTreeMap<i64, String>,
}

impl EnumDef {
    /// Returns the symbolic name for `value`, if declared
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values.get(&value).map(String::as_str)
    }
}

impl MessageDef {
    /// Returns the field declared with `number`
    pub fn field(&self, number: u64) -> Option<&FieldDef> {
        u32::try_from(number)
            .ok()
            .and_then(|number| self.fields.get(&number))
    }
}

impl FieldDef {
    /// Returns true if the declared type can be packed, given the schema's enums
    pub fn is_packable(&self, schema: &ParsedSchema, scope: Option<&MessageDef>) -> bool {
        self.is_repeated
            && !self.is_map
            && (PACKABLE_SCALARS.contains(&self.type_name.as_str())
                || schema.resolve_enum(scope, &self.type_name).is_some())
    }
}

impl ParsedSchema {
    /// Returns true if the schema holds no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Looks up a message by exact name, then by its last dotted segment
    pub fn message(&self, name: &str) -> Option<&MessageDef> {
        lookup(&self.messages, name)
    }

    /// Looks up an enum, checking `scope`'s nested enums before the global map
    pub fn resolve_enum<'s>(
        &'s self,
        scope: Option<&'s MessageDef>,
        name: &str,
    ) -> Option<&'s EnumDef> {
        scope
            .and_then(|message| lookup(&message.enums, name))
            .or_else(|| lookup(&self.enums, name))
    }
}

fn lookup<'a, T>(map: &'a BTreeMap<String, T>, name: &str) -> Option<&'a T> {
    map.get(name).or_else(|| {
        let simple = name.rsplit('.').next().unwrap_or(name);
        map.get(simple)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParsedSchema {
        parse(
            r#"
            enum Kind { KIND_UNKNOWN = 0; KIND_A = 1; }
            message Outer {
                enum Kind { LOCAL = 0; OTHER = 1; }
                repeated Kind kinds = 1;
                Inner inner = 2;
            }
            message Inner { .Kind kind = 1; }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_message_lookup_by_qualified_name() {
        let schema = sample();
        assert!(schema.message("Inner").is_some());
        assert!(schema.message(".pkg.Outer.Inner").is_some());
        assert!(schema.message("Missing").is_none());
    }

    #[test]
    fn test_enum_lookup_prefers_nested() {
        let schema = sample();
        let outer = schema.message("Outer");
        let nested = schema.resolve_enum(outer, "Kind").unwrap();
        assert_eq!(nested.name_of(0), Some("LOCAL"));

        let inner = schema.message("Inner");
        let global = schema.resolve_enum(inner, ".Kind").unwrap();
        assert_eq!(global.name_of(1), Some("KIND_A"));
    }

    #[test]
    fn test_resolved_enum_outlives_scope_binding() {
        let schema = sample();
        let resolved = {
            let scope = schema.message("Outer");
            schema.resolve_enum(scope, "Kind")
        };
        assert_eq!(resolved.and_then(|e| e.name_of(1)), Some("OTHER"));
        assert!(!schema.is_empty());
        assert!(ParsedSchema::default().is_empty());
    }

    #[test]
    fn test_is_packable() {
        let schema = sample();
        let outer = schema.message("Outer").unwrap();
        assert!(outer.field(1).unwrap().is_packable(&schema, Some(outer)));
        assert!(!outer.field(2).unwrap().is_packable(&schema, Some(outer)));
        assert!(outer.field(u64::MAX).is_none());
    }
}
