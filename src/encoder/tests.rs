//! Tests for the value encoder

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde_json::Value as JsonValue;

use super::*;
use crate::model::{ForeignValue, GraphDuration, Node};

fn limits() -> EncodingLimits {
    EncodingLimits::default()
}

fn encode_with(value: &GraphValue, limits: &EncodingLimits) -> (String, Vec<EncodingIssue>) {
    let mut buf = Vec::new();
    let mut encoder = ValueEncoder::new(limits);
    encoder.encode(&mut buf, value, SerializationDepth::zero());
    (String::from_utf8(buf).unwrap(), encoder.take_issues())
}

fn to_json(value: &GraphValue, limits: &EncodingLimits) -> JsonValue {
    let (text, _) = encode_with(value, limits);
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("invalid JSON {text:?}: {e}"))
}

#[derive(Debug)]
struct Opaque;

impl ForeignValue for Opaque {
    fn type_name(&self) -> &str {
        "Opaque"
    }

    fn origin(&self) -> &str {
        "test-driver"
    }
}

#[derive(Debug)]
struct Broken;

impl ForeignValue for Broken {
    fn type_name(&self) -> &str {
        "Broken"
    }

    fn origin(&self) -> &str {
        "test-driver"
    }

    fn to_graph_value(&self) -> Option<Result<GraphValue, String>> {
        Some(Err("checksum mismatch".to_string()))
    }
}

#[derive(Debug)]
struct Celsius(f64);

impl ForeignValue for Celsius {
    fn type_name(&self) -> &str {
        "Celsius"
    }

    fn origin(&self) -> &str {
        "units"
    }

    fn to_graph_value(&self) -> Option<Result<GraphValue, String>> {
        Some(Ok(GraphValue::map([("celsius", GraphValue::Float64(self.0))])))
    }
}

// ===== Scalars =====

#[test]
fn test_scalars() {
    let l = limits();
    assert_eq!(encode_with(&GraphValue::Null, &l).0, "null");
    assert_eq!(encode_with(&GraphValue::Bool(true), &l).0, "true");
    assert_eq!(encode_with(&GraphValue::Int8(-8), &l).0, "-8");
    assert_eq!(encode_with(&GraphValue::UInt64(u64::MAX), &l).0, u64::MAX.to_string());
    assert_eq!(encode_with(&GraphValue::Float64(1.5), &l).0, "1.5");
    assert_eq!(encode_with(&GraphValue::Float32(0.1), &l).0, "0.1");
    assert_eq!(encode_with(&GraphValue::from("a\"b"), &l).0, r#""a\"b""#);
}

#[test]
fn test_nan_and_infinity_are_strings() {
    let l = limits();
    assert_eq!(encode_with(&GraphValue::Float64(f64::NAN), &l).0, "\"NaN\"");
    assert_eq!(encode_with(&GraphValue::Float64(f64::INFINITY), &l).0, "\"Infinity\"");
    assert_eq!(encode_with(&GraphValue::Float32(f32::NEG_INFINITY), &l).0, "\"-Infinity\"");

    let props = GraphValue::map([("score", GraphValue::Float64(f64::NAN))]);
    assert_eq!(to_json(&props, &l)["score"], "NaN");
}

#[test]
fn test_temporal_and_spatial_values() {
    let l = limits();
    let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    assert_eq!(to_json(&GraphValue::Date(date), &l), "2024-02-29");

    let time = NaiveTime::from_hms_opt(13, 5, 9).unwrap();
    let offset = FixedOffset::east_opt(3600).unwrap();
    assert_eq!(to_json(&GraphValue::Time(time, offset), &l), "13:05:09+01:00");

    let dt = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(to_json(&GraphValue::DateTime(dt), &l), "2024-01-02T03:04:05+01:00");

    let dur = GraphDuration {
        months: 1,
        days: 2,
        seconds: 3,
        nanos: 0,
    };
    assert_eq!(to_json(&GraphValue::Duration(dur), &l), "P1M2DT3S");

    let point = GraphValue::Point(Point {
        srid: 4326,
        x: 12.5,
        y: -3.0,
        z: None,
    });
    let v = to_json(&point, &l);
    assert_eq!(v["type"], "Point");
    assert_eq!(v["srid"], 4326);
    assert_eq!(v["x"], 12.5);
    assert!(v.get("z").is_none());

    let point3d = GraphValue::Point(Point {
        srid: 9157,
        x: 1.0,
        y: 2.0,
        z: Some(3.0),
    });
    assert_eq!(to_json(&point3d, &l)["z"], 3.0);
}

#[test]
fn test_bytes_are_base64() {
    let v = to_json(&GraphValue::Bytes(vec![0x01, 0x02, 0x03, 0xff]), &limits());
    assert_eq!(v, "AQID/w==");
}

// ===== Limits =====

#[test]
fn test_depth_limit_on_very_deep_structure() {
    // Building and dropping 10,000 nested lists recurses in Drop; give it room
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(|| {
            let mut value = GraphValue::Int64(0);
            for _ in 0..10_000 {
                value = GraphValue::List(vec![value]);
            }
            let l = EncodingLimits {
                max_depth: 5,
                ..limits()
            };
            let (text, issues) = encode_with(&value, &l);
            (text, issues)
        })
        .unwrap();
    let (text, issues) = handle.join().unwrap();

    assert_eq!(text.matches("depth_limit_exceeded").count(), 1);
    assert_eq!(
        issues,
        vec![EncodingIssue::Truncated {
            reason: "depth_limit_exceeded",
            depth: 5
        }]
    );

    let mut v: JsonValue = serde_json::from_str(&text).unwrap();
    for _ in 0..4 {
        v = v[0].clone();
    }
    assert_eq!(v["_truncated"], "depth_limit_exceeded");
    assert_eq!(v["_depth"], 5);
    assert_eq!(v["_type"], "list");
}

#[test]
fn test_structure_within_depth_is_untouched() {
    let l = EncodingLimits {
        max_depth: 3,
        ..limits()
    };
    let value = GraphValue::List(vec![GraphValue::List(vec![GraphValue::Int64(1)])]);
    let (text, issues) = encode_with(&value, &l);
    assert_eq!(text, "[[1]]");
    assert!(issues.is_empty());
}

#[test]
fn test_long_string_sentinel() {
    let l = EncodingLimits {
        max_string_length: 100,
        ..limits()
    };
    let original: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let v = to_json(&GraphValue::String(original.clone()), &l);

    assert_eq!(v["_truncated"], "string_too_large");
    assert_eq!(v["_length"], 5000);
    let prefix = v["_prefix"].as_str().unwrap();
    assert_eq!(prefix.chars().count(), STRING_PREFIX_CHARS);
    assert!(original.starts_with(prefix));
    assert_eq!(v["_sha256"], sha256_hex(original.as_bytes()));
}

#[test]
fn test_string_prefix_shorter_than_cap() {
    let l = EncodingLimits {
        max_string_length: 10,
        ..limits()
    };
    let original = "é".repeat(150);
    let v = to_json(&GraphValue::String(original.clone()), &l);
    assert_eq!(v["_length"], 150);
    assert_eq!(v["_prefix"], original.as_str());
}

#[test]
fn test_string_limit_counts_characters() {
    let l = EncodingLimits {
        max_string_length: 4,
        ..limits()
    };
    // 4 characters, 8 bytes
    assert_eq!(to_json(&GraphValue::from("éééé"), &l), "éééé");
}

#[test]
fn test_binary_sentinel() {
    let l = EncodingLimits {
        max_binary_length: 8,
        ..limits()
    };
    let bytes: Vec<u8> = (0..=255).collect();
    let v = to_json(&GraphValue::Bytes(bytes.clone()), &l);
    assert_eq!(v["_truncated"], "binary_too_large");
    assert_eq!(v["_length"], 256);
    assert_eq!(v["_sha256"], sha256_hex(&bytes));
}

#[test]
fn test_list_truncation_preserves_order() {
    let l = EncodingLimits {
        max_collection_items: 10,
        ..limits()
    };
    let items: Vec<GraphValue> = (0..25).map(GraphValue::Int64).collect();
    let v = to_json(&GraphValue::List(items), &l);
    let arr = v.as_array().unwrap();
    assert_eq!(arr.len(), 11);
    for (i, item) in arr.iter().take(10).enumerate() {
        assert_eq!(item, &JsonValue::from(i as i64));
    }
    assert_eq!(arr[10]["_truncated"], "list_too_large");
    assert_eq!(arr[10]["_total_items"], 25);
    assert_eq!(arr[10]["_shown_items"], 10);
}

#[test]
fn test_map_truncation() {
    let l = EncodingLimits {
        max_collection_items: 2,
        ..limits()
    };
    let map = GraphValue::map((0..5).map(|i| (format!("k{i}"), GraphValue::Int64(i))));
    let v = to_json(&map, &l);
    let obj = v.as_object().unwrap();
    assert_eq!(obj.len(), 3);
    assert_eq!(obj["k0"], 0);
    assert_eq!(obj["k1"], 1);
    assert_eq!(obj["_truncated"]["_truncated"], "map_too_large");
    assert_eq!(obj["_truncated"]["_total_items"], 5);
}

#[test]
fn test_duplicate_and_coerced_keys_are_kept() {
    let map = GraphValue::Map(vec![
        (GraphValue::from("a"), GraphValue::Int64(1)),
        (GraphValue::from("a"), GraphValue::Int64(2)),
        (GraphValue::Int64(1), GraphValue::Int64(3)),
        (GraphValue::from("1"), GraphValue::Int64(4)),
        (GraphValue::Null, GraphValue::Int64(5)),
    ]);
    let v = to_json(&map, &limits());
    let obj = v.as_object().unwrap();
    assert_eq!(obj.len(), 5);
    assert_eq!(obj["a"], 1);
    assert_eq!(obj["a_1"], 2);
    assert_eq!(obj["1"], 3);
    assert_eq!(obj["1_1"], 4);
    assert_eq!(obj["null"], 5);
}

#[test]
fn test_keys_colliding_after_length_cap() {
    let l = EncodingLimits {
        max_key_length: 3,
        ..limits()
    };
    let map = GraphValue::map([("abcd", GraphValue::Int64(1)), ("abce", GraphValue::Int64(2))]);
    let v = to_json(&map, &l);
    assert_eq!(v["abc"], 1);
    assert_eq!(v["abc_1"], 2);
}

#[test]
fn test_nested_modes() {
    let inner = GraphValue::List(vec![GraphValue::Int64(1), GraphValue::Int64(2)]);
    let value = GraphValue::List(vec![GraphValue::Int64(0), inner]);

    let shallow = EncodingLimits {
        nested_shallow_depth: Some(0),
        ..limits()
    };
    let v = to_json(&value, &shallow);
    assert_eq!(v[0], 0);
    assert_eq!(v[1]["_nested"], "list");
    assert_eq!(v[1]["_size"], 2);

    let reference = EncodingLimits {
        nested_reference_depth: Some(0),
        ..limits()
    };
    let v = to_json(&value, &reference);
    assert_eq!(v["_nested"], "list");
    assert_eq!(v["_size"], 2);
}

// ===== Fallbacks =====

#[test]
fn test_entity_in_property_position_is_rejected_locally() {
    let value = GraphValue::List(vec![
        GraphValue::Int64(1),
        GraphValue::Node(Box::new(Node::default())),
        GraphValue::Int64(2),
    ]);
    let (text, issues) = encode_with(&value, &limits());
    let v: JsonValue = serde_json::from_str(&text).unwrap();
    assert_eq!(v[0], 1);
    assert!(
        v[1]["_serialization_error"]
            .as_str()
            .unwrap()
            .contains("node")
    );
    assert_eq!(v[1]["_at_depth"], 1);
    assert_eq!(v[2], 2);
    assert!(matches!(issues[0], EncodingIssue::Failed { depth: 1, .. }));
}

#[test]
fn test_unknown_foreign_value() {
    let v = to_json(&GraphValue::Foreign(Arc::new(Opaque)), &limits());
    assert_eq!(v["_type"], "Opaque");
    assert_eq!(v["_assembly"], "test-driver");
    assert_eq!(v["_note"], "unserializable_type");
}

#[test]
fn test_failing_foreign_conversion_keeps_siblings() {
    let map = GraphValue::map([
        ("before", GraphValue::Int64(1)),
        ("bad", GraphValue::Foreign(Arc::new(Broken))),
        ("after", GraphValue::Int64(2)),
    ]);
    let v = to_json(&map, &limits());
    assert_eq!(v["before"], 1);
    assert_eq!(v["after"], 2);
    assert!(
        v["bad"]["_serialization_error"]
            .as_str()
            .unwrap()
            .contains("checksum mismatch")
    );
}

#[test]
fn test_convertible_foreign_value() {
    let v = to_json(&GraphValue::Foreign(Arc::new(Celsius(21.5))), &limits());
    assert_eq!(v["celsius"], 21.5);
}

#[test]
fn test_free_function_matches_encoder() {
    let l = limits();
    let value = GraphValue::map([("x", GraphValue::List(vec![GraphValue::Bool(false)]))]);
    let mut buf = Vec::new();
    encode(&mut buf, &value, SerializationDepth::zero(), &l);
    assert_eq!(String::from_utf8(buf).unwrap(), r#"{"x":[false]}"#);
}
