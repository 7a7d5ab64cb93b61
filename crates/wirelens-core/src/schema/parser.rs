//! Permissive `.proto` text parser.
//!
//! This is not a grammar. Block headers and field declarations are picked
//! out with regular expressions and block bodies are found by brace
//! matching, so truncated, comment-laden or otherwise informal snippets
//! still yield whatever messages and enums they contain. Anything the
//! patterns do not recognize (imports, options, services, extensions) is
//! skipped.

use super::{EnumDef, FieldDef, MessageDef, ParsedSchema};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, trace};

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("pattern is valid"))
        }
    };
}

regex!(oneof_header, r"\boneof\s+[A-Za-z_]\w*\s*\{");
regex!(block_header, r"\b(message|enum)\s+([A-Za-z_]\w*)\s*$");
regex!(
    enum_value,
    r"([A-Za-z_]\w*)\s*=\s*(-?(?:0[xX][0-9A-Fa-f]+|\d+))\s*(?:\[[^\]]*\])?\s*;"
);
regex!(
    field_decl,
    r"(?:\b(repeated|optional|required)\s+)?(map\s*<\s*[\w.]+\s*,\s*[\w.]+\s*>|\.?[A-Za-z_][\w.]*)\s+([A-Za-z_]\w*)\s*=\s*(\d+)\s*(?:\[[^\]]*\])?\s*;"
);

/// Parses `.proto` text into a [`ParsedSchema`].
///
/// The first message encountered becomes the root message. A message name
/// that appears more than once has its fields and nested enums merged into
/// the first definition.
///
/// Fails with [`Error::NoMessagesFound`] when the text yields no message
/// definitions.
pub fn parse(text: &str) -> Result<ParsedSchema> {
    let cleaned = flatten_oneofs(&strip_comments(text));

    let mut schema = ParsedSchema::default();
    let body = split_body(&cleaned);
    for block in &body.blocks {
        visit_block(&mut schema, None, block);
    }

    if schema.is_empty() {
        debug!("schema text produced no messages");
        return Err(Error::NoMessagesFound);
    }

    debug!(
        "parsed schema: {} messages, {} enums, root {:?}",
        schema.messages.len(),
        schema.enums.len(),
        schema.root_message
    );
    Ok(schema)
}

/// A `header { inner }` block found while scanning a body
#[derive(Debug)]
struct Block<'a> {
    header: String,
    inner: &'a str,
}

/// A body split into its own declarations and its nested blocks
#[derive(Debug)]
struct Body<'a> {
    direct: String,
    blocks: Vec<Block<'a>>,
}

/// Visits one block; `parent` is the enclosing message, if any
fn visit_block(schema: &mut ParsedSchema, parent: Option<&mut MessageDef>, block: &Block<'_>) {
    let Some(caps) = block_header().captures(&block.header) else {
        trace!("skipping block '{}'", block.header);
        return;
    };

    if &caps[1] == "enum" {
        let def = parse_enum(&caps[2], block.inner);
        trace!("enum {} with {} values", def.name, def.values.len());
        schema
            .enums
            .entry(def.name.clone())
            .or_insert_with(|| def.clone());
        if let Some(parent) = parent {
            parent.enums.entry(def.name.clone()).or_insert(def);
        }
    } else {
        let name = caps[2].to_string();
        if schema.root_message.is_none() {
            schema.root_message = Some(name.clone());
        }

        let body = split_body(block.inner);
        let mut message = MessageDef {
            name: name.clone(),
            fields: parse_fields(&body.direct),
            ..MessageDef::default()
        };
        for nested in &body.blocks {
            visit_block(schema, Some(&mut message), nested);
        }

        trace!("message {} with {} fields", name, message.fields.len());
        match schema.messages.get_mut(&name) {
            Some(existing) => merge(existing, message),
            None => {
                schema.messages.insert(name, message);
            }
        }
    }
}

fn merge(existing: &mut MessageDef, incoming: MessageDef) {
    for (number, field) in incoming.fields {
        existing.fields.entry(number).or_insert(field);
    }
    for (name, def) in incoming.enums {
        existing.enums.entry(name).or_insert(def);
    }
}

fn parse_enum(name: &str, inner: &str) -> EnumDef {
    let mut def = EnumDef {
        name: name.to_string(),
        ..EnumDef::default()
    };

    for caps in enum_value().captures_iter(&split_body(inner).direct) {
        if let Some(value) = parse_int(&caps[2]) {
            def.values
                .entry(value)
                .or_insert_with(|| caps[1].to_string());
        }
    }

    def
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };

    Some(if negative { -magnitude } else { magnitude })
}

fn parse_fields(direct: &str) -> BTreeMap<u32, FieldDef> {
    let mut fields = BTreeMap::new();

    for caps in field_decl().captures_iter(direct) {
        let Ok(field_number) = caps[4].parse::<u32>() else {
            continue;
        };

        let raw_type = &caps[2];
        let is_map = raw_type.starts_with("map");
        let type_name = if is_map {
            raw_type.split_whitespace().collect::<String>()
        } else {
            raw_type.to_string()
        };

        let label = caps.get(1).map(|m| m.as_str());
        fields.entry(field_number).or_insert(FieldDef {
            name: caps[3].to_string(),
            type_name,
            field_number,
            is_repeated: is_map || label == Some("repeated"),
            is_map,
        });
    }

    fields
}

/// Removes `//` line comments and `/* */` block comments, leaving string
/// literals intact. Newlines inside block comments are kept.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match (c, chars.peek().copied()) {
            ('"' | '\'', _) => {
                quote = Some(c);
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Splices the body of every `oneof name { ... }` into its enclosing body
fn flatten_oneofs(text: &str) -> String {
    let mut out = text.to_string();

    while let Some(found) = oneof_header().find(&out) {
        let open = found.end() - 1;
        let close = matching_brace(&out, open);
        let inner = out[open + 1..close.unwrap_or(out.len())].to_string();
        let end = close.map_or(out.len(), |close| close + 1);
        out.replace_range(found.start()..end, &inner);
    }

    out
}

/// Index of the `}` matching the `{` at `open`, or `None` if unbalanced
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits a body into the text at its own nesting level and its nested
/// blocks. Each nested block, header included, is replaced by `;` in the
/// direct text. An unterminated block runs to the end of the body.
///
/// A `message` or `enum` header is only the trailing `message Name` of the
/// text before the brace; anything ahead of it stays in the direct text,
/// terminated by the `;` that replaces the block. Other headers take the
/// whole segment since the last `;` or `}`.
fn split_body(text: &str) -> Body<'_> {
    let mut direct = String::with_capacity(text.len());
    let mut blocks = Vec::new();
    let mut segment_start = 0;
    let mut pos = 0;

    while pos < text.len() {
        let b = text.as_bytes()[pos];
        match b {
            b'{' => {
                let header_start = block_header()
                    .find(&direct[segment_start..])
                    .map_or(segment_start, |found| segment_start + found.start());
                let header = direct[header_start..].trim().to_string();
                direct.truncate(header_start);
                direct.push(';');

                let close = matching_brace(text, pos);
                let end = close.unwrap_or(text.len());
                blocks.push(Block {
                    header,
                    inner: &text[pos + 1..end],
                });

                segment_start = direct.len();
                pos = end + 1;
            }
            b';' | b'}' => {
                direct.push(b as char);
                segment_start = direct.len();
                pos += 1;
            }
            _ => {
                let ch_len = text[pos..].chars().next().map_or(1, char::len_utf8);
                direct.push_str(&text[pos..pos + ch_len]);
                pos += ch_len;
            }
        }
    }

    Body { direct, blocks }
}
