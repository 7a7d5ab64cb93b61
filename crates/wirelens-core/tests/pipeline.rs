//! Text payload → normalization → worker → projection.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pretty_assertions::assert_eq;
use prost::Message;
use serde_json::json;
use wirelens_core::{
    normalize_text, DecodeRequest, DecodeWorker, DecoderConfig, Error, InputFormat,
};

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(uint64, tag = "1")]
    timestamp: u64,
    #[prost(string, tag = "2")]
    source: String,
    #[prost(message, repeated, tag = "3")]
    tags: Vec<Tag>,
}

#[derive(Clone, PartialEq, Message)]
struct Tag {
    #[prost(string, tag = "1")]
    key: String,
    #[prost(string, tag = "2")]
    value: String,
}

const EVENT_SCHEMA: &str = r#"
message Event {
  uint64 timestamp = 1;
  string source = 2;
  repeated Tag tags = 3;
}
message Tag { string key = 1; string value = 2; }
"#;

fn sample_event() -> Event {
    Event {
        timestamp: 1_700_000_000_000,
        source: "sensor-7".to_string(),
        tags: vec![
            Tag {
                key: "zone".to_string(),
                value: "north".to_string(),
            },
            Tag {
                key: "unit".to_string(),
                value: "celsius".to_string(),
            },
        ],
    }
}

fn expected_json() -> serde_json::Value {
    json!({
        "timestamp": 1_700_000_000_000u64,
        "source": "sensor-7",
        "tags": [
            { "key": "zone", "value": "north" },
            { "key": "unit", "value": "celsius" },
        ],
    })
}

#[test]
fn test_every_text_encoding_yields_same_projection() {
    let encoded = sample_event().encode_to_vec();
    let decimal: Vec<String> = encoded.iter().map(u8::to_string).collect();
    let spaced_hex: Vec<String> = encoded.iter().map(|b| format!("{:02x}", b)).collect();

    let inputs = [
        hex::encode(&encoded),
        spaced_hex.join(" "),
        STANDARD.encode(&encoded),
        decimal.join(", "),
    ];

    let mut worker = DecodeWorker::spawn().unwrap();
    for text in inputs {
        let bytes = normalize_text(&text, InputFormat::Auto).unwrap();
        assert_eq!(bytes.as_ref(), &encoded[..], "input {}", text);

        let reply = worker
            .decode(DecodeRequest::new(bytes).schema(EVENT_SCHEMA))
            .unwrap();
        assert_eq!(reply.result.error, None);
        assert_eq!(reply.projection.unwrap().json, expected_json());
    }
}

#[test]
fn test_invalid_hex_never_reaches_decoder() {
    assert_eq!(
        normalize_text("08 ZZ", InputFormat::Hex),
        Err(Error::InvalidHexCharacter {
            character: 'Z',
            index: 3
        })
    );
}

#[test]
fn test_truncated_varint_through_worker() {
    let bytes = normalize_text("08", InputFormat::Hex).unwrap();
    let mut worker = DecodeWorker::spawn().unwrap();
    let reply = worker.decode(DecodeRequest::new(bytes)).unwrap();

    assert!(reply.result.fields.is_empty());
    assert_eq!(reply.result.error_byte_offset, Some(1));
    assert_eq!(reply.result.unparsed_hex.as_deref(), Some(""));
    assert!(reply.projection.is_none());
}

#[test]
fn test_message_selection_and_depth() {
    let encoded = sample_event().encode_to_vec();
    let mut worker = DecodeWorker::spawn().unwrap();

    let reply = worker
        .decode(
            DecodeRequest::new(encoded.clone())
                .schema(EVENT_SCHEMA)
                .message("Event"),
        )
        .unwrap();
    let index = reply.projection.unwrap().path_index;
    assert!(index.contains_key("root.tags[1].value"));

    // Past the depth limit the tag payloads stay opaque
    let reply = worker
        .decode(DecodeRequest::new(encoded).config(DecoderConfig::new().max_depth(0)))
        .unwrap();
    let json = reply.projection.unwrap().json;
    assert_eq!(json["unknown_field_2"], "sensor-7");
    assert!(json["unknown_field_3"][0].is_string());
}
