//! Safety-bounded JSON encoding of graph values
//!
//! This module turns arbitrary, untrusted `GraphValue` trees into JSON
//! bytes without exhausting memory or the call stack:
//! - nesting is bounded by an explicit `SerializationDepth` checked before
//!   every descent
//! - oversized strings, binaries, lists and maps are replaced or cut off
//!   with truncation sentinels
//! - map keys are coerced to strings and deduplicated
//! - values without a JSON representation become diagnostic objects
//! - a failure while encoding one value rolls the buffer back and writes a
//!   `_serialization_error` object, so the enclosing JSON stays valid
//!
//! Encoding never fails from the caller's point of view. What was degraded
//! is reported as [`EncodingIssue`]s.

mod depth;
mod keys;
mod sentinel;

use std::fmt;
use std::io::Write;

use base64::Engine;
use serde::Serialize;

use crate::config::EncodingLimits;
use crate::model::{GraphValue, Point};

pub use depth::SerializationDepth;
pub use keys::{KeyDeduplicator, coerce_key, truncate_chars};
pub use sentinel::{
    BINARY_PREFIX_BYTES, NestedSummary, STRING_PREFIX_CHARS, SerializationFailure,
    TruncationSentinel, Unserializable, sha256_hex,
};

/// Something the encoder had to degrade while writing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingIssue {
    /// A limit was exceeded and a sentinel was written.
    Truncated { reason: &'static str, depth: usize },
    /// A value without JSON representation was replaced by a diagnostic object.
    Unserializable { type_name: String },
    /// Encoding a value failed and a `_serialization_error` object was written.
    Failed { message: String, depth: usize },
}

impl fmt::Display for EncodingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingIssue::Truncated { reason, depth } => {
                write!(f, "value truncated ({reason}) at depth {depth}")
            }
            EncodingIssue::Unserializable { type_name } => {
                write!(f, "unserializable value of type {type_name}")
            }
            EncodingIssue::Failed { message, depth } => {
                write!(f, "serialization failed at depth {depth}: {message}")
            }
        }
    }
}

/// Internal failure of one encoding branch.
#[derive(Debug)]
enum EncodeError {
    EntityInPropertyPosition(String),
    ForeignConversion { type_name: String, message: String },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::EntityInPropertyPosition(kind) => {
                write!(f, "{kind} values are not allowed inside properties")
            }
            EncodeError::ForeignConversion { type_name, message } => {
                write!(f, "converting {type_name} failed: {message}")
            }
            EncodeError::Io(e) => write!(f, "{e}"),
            EncodeError::Json(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(err: std::io::Error) -> Self {
        EncodeError::Io(err)
    }
}

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        EncodeError::Json(err)
    }
}

type EncodeResult = std::result::Result<(), EncodeError>;

/// How much of a nested collection is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestedMode {
    Deep,
    Shallow,
    Reference,
}

/// Encode `value` into `buf` at `depth`.
///
/// Never fails; degraded output is described by sentinels in the JSON.
pub fn encode(
    buf: &mut Vec<u8>,
    value: &GraphValue,
    depth: SerializationDepth,
    limits: &EncodingLimits,
) {
    ValueEncoder::new(limits).encode(buf, value, depth);
}

/// Stateful encoder collecting the issues it runs into.
pub struct ValueEncoder<'a> {
    limits: &'a EncodingLimits,
    issues: Vec<EncodingIssue>,
}

impl<'a> ValueEncoder<'a> {
    pub fn new(limits: &'a EncodingLimits) -> Self {
        Self {
            limits,
            issues: Vec::new(),
        }
    }

    pub fn limits(&self) -> &EncodingLimits {
        self.limits
    }

    /// Issues collected since the last call.
    pub fn take_issues(&mut self) -> Vec<EncodingIssue> {
        std::mem::take(&mut self.issues)
    }

    /// Encode one value; on failure the partial output is rolled back and
    /// replaced with a `_serialization_error` object.
    pub fn encode(&mut self, buf: &mut Vec<u8>, value: &GraphValue, depth: SerializationDepth) {
        let mark = buf.len();
        if let Err(e) = self.try_encode(buf, value, depth) {
            buf.truncate(mark);
            let message = e.to_string();
            self.write_failure(buf, &message, depth);
            self.issues.push(EncodingIssue::Failed {
                message,
                depth: depth.get(),
            });
        }
    }

    /// Write a JSON object key (string, already unique) followed by `:`.
    pub fn write_key(&self, buf: &mut Vec<u8>, key: &str) {
        write_json(buf, key);
        buf.push(b':');
    }

    /// Normalize an object key: coerce, cap length, make unique.
    pub fn object_key(&self, keys: &mut KeyDeduplicator, key: &GraphValue) -> String {
        match key {
            GraphValue::String(s) => self.property_key(keys, s),
            other => self.property_key(keys, &coerce_key(other)),
        }
    }

    /// Cap a string key to the key length limit and make it unique.
    pub fn property_key(&self, keys: &mut KeyDeduplicator, key: &str) -> String {
        keys.claim(truncate_chars(key, self.limits.max_key_length).to_string())
    }

    fn try_encode(
        &mut self,
        buf: &mut Vec<u8>,
        value: &GraphValue,
        depth: SerializationDepth,
    ) -> EncodeResult {
        match value {
            GraphValue::Null => buf.extend_from_slice(b"null"),
            GraphValue::Bool(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
            GraphValue::Int8(n) => write!(buf, "{n}")?,
            GraphValue::Int16(n) => write!(buf, "{n}")?,
            GraphValue::Int32(n) => write!(buf, "{n}")?,
            GraphValue::Int64(n) => write!(buf, "{n}")?,
            GraphValue::UInt8(n) => write!(buf, "{n}")?,
            GraphValue::UInt16(n) => write!(buf, "{n}")?,
            GraphValue::UInt32(n) => write!(buf, "{n}")?,
            GraphValue::UInt64(n) => write!(buf, "{n}")?,
            GraphValue::Float32(f) => {
                if f.is_finite() {
                    serde_json::to_writer(&mut *buf, f)?;
                } else {
                    serde_json::to_writer(&mut *buf, non_finite_name(f64::from(*f)))?;
                }
            }
            GraphValue::Float64(f) => write_f64(buf, *f)?,
            GraphValue::Bytes(bytes) => self.encode_bytes(buf, bytes, depth)?,
            GraphValue::String(s) => self.encode_string(buf, s, depth)?,
            GraphValue::Date(d) => serde_json::to_writer(&mut *buf, &d.format("%Y-%m-%d").to_string())?,
            GraphValue::LocalTime(t) => {
                serde_json::to_writer(&mut *buf, &t.format("%H:%M:%S%.f").to_string())?
            }
            GraphValue::Time(t, offset) => serde_json::to_writer(
                &mut *buf,
                &format!("{}{}", t.format("%H:%M:%S%.f"), offset),
            )?,
            GraphValue::LocalDateTime(dt) => {
                serde_json::to_writer(&mut *buf, &dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())?
            }
            GraphValue::DateTime(dt) => serde_json::to_writer(&mut *buf, &dt.to_rfc3339())?,
            GraphValue::Duration(d) => serde_json::to_writer(&mut *buf, &d.to_iso8601())?,
            GraphValue::Point(p) => write_point(buf, p)?,
            GraphValue::List(items) => self.encode_list(buf, items, depth)?,
            GraphValue::Map(entries) => self.encode_map(buf, entries, depth)?,
            GraphValue::Node(_) | GraphValue::Relationship(_) | GraphValue::Path(_) => {
                return Err(EncodeError::EntityInPropertyPosition(
                    value.type_name().to_string(),
                ));
            }
            GraphValue::Foreign(foreign) => match foreign.to_graph_value() {
                // A conversion yielding another foreign value is not followed
                Some(Ok(GraphValue::Foreign(inner))) => {
                    self.write_unserializable(buf, inner.type_name(), inner.origin())?
                }
                Some(Ok(converted)) => self.try_encode(buf, &converted, depth)?,
                Some(Err(message)) => {
                    return Err(EncodeError::ForeignConversion {
                        type_name: foreign.type_name().to_string(),
                        message,
                    });
                }
                None => self.write_unserializable(buf, foreign.type_name(), foreign.origin())?,
            },
        }
        Ok(())
    }

    fn encode_string(&mut self, buf: &mut Vec<u8>, s: &str, depth: SerializationDepth) -> EncodeResult {
        // Byte length bounds char count from above; only count chars when needed
        if s.len() > self.limits.max_string_length {
            let length = s.chars().count();
            if length > self.limits.max_string_length {
                return self.write_sentinel(buf, &TruncationSentinel::for_string(s, length), depth);
            }
        }
        serde_json::to_writer(&mut *buf, s)?;
        Ok(())
    }

    fn encode_bytes(&mut self, buf: &mut Vec<u8>, bytes: &[u8], depth: SerializationDepth) -> EncodeResult {
        if bytes.len() > self.limits.max_binary_length {
            return self.write_sentinel(buf, &TruncationSentinel::for_binary(bytes), depth);
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serde_json::to_writer(&mut *buf, &encoded)?;
        Ok(())
    }

    fn encode_list(
        &mut self,
        buf: &mut Vec<u8>,
        items: &[GraphValue],
        depth: SerializationDepth,
    ) -> EncodeResult {
        let inner = depth.increment();
        if inner.exceeds_limit(self.limits.max_depth) {
            return self.write_depth_sentinel(buf, inner, "list");
        }
        let mode = self.nested_mode(depth);
        if mode == NestedMode::Reference {
            return write_serialize(buf, &NestedSummary { kind: "list", size: items.len() });
        }

        let shown = items.len().min(self.limits.max_collection_items);
        buf.push(b'[');
        for (i, item) in items.iter().take(shown).enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            self.encode_nested(buf, item, inner, mode);
        }
        if items.len() > shown {
            if shown > 0 {
                buf.push(b',');
            }
            let sentinel = TruncationSentinel::ListTooLarge {
                total_items: items.len(),
                shown_items: shown,
            };
            self.write_sentinel(buf, &sentinel, inner)?;
        }
        buf.push(b']');
        Ok(())
    }

    fn encode_map(
        &mut self,
        buf: &mut Vec<u8>,
        entries: &[(GraphValue, GraphValue)],
        depth: SerializationDepth,
    ) -> EncodeResult {
        let inner = depth.increment();
        if inner.exceeds_limit(self.limits.max_depth) {
            return self.write_depth_sentinel(buf, inner, "map");
        }
        let mode = self.nested_mode(depth);
        if mode == NestedMode::Reference {
            return write_serialize(buf, &NestedSummary { kind: "map", size: entries.len() });
        }

        let shown = entries.len().min(self.limits.max_collection_items);
        let mut keys = KeyDeduplicator::new();
        buf.push(b'{');
        for (i, (key, value)) in entries.iter().take(shown).enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            let key = self.object_key(&mut keys, key);
            self.write_key(buf, &key);
            self.encode_nested(buf, value, inner, mode);
        }
        if entries.len() > shown {
            if shown > 0 {
                buf.push(b',');
            }
            let key = keys.claim("_truncated".to_string());
            self.write_key(buf, &key);
            let sentinel = TruncationSentinel::MapTooLarge {
                total_items: entries.len(),
                shown_items: shown,
            };
            self.write_sentinel(buf, &sentinel, inner)?;
        }
        buf.push(b'}');
        Ok(())
    }

    /// Encode a collection member, summarizing nested collections in shallow mode.
    fn encode_nested(
        &mut self,
        buf: &mut Vec<u8>,
        item: &GraphValue,
        depth: SerializationDepth,
        mode: NestedMode,
    ) {
        let summary = match (mode, item) {
            (NestedMode::Shallow, GraphValue::List(items)) => Some(("list", items.len())),
            (NestedMode::Shallow, GraphValue::Map(entries)) => Some(("map", entries.len())),
            _ => None,
        };
        match summary {
            Some((kind, size)) => {
                let mark = buf.len();
                if write_serialize(buf, &NestedSummary { kind, size }).is_err() {
                    buf.truncate(mark);
                    buf.extend_from_slice(b"null");
                }
            }
            None => self.encode(buf, item, depth),
        }
    }

    fn nested_mode(&self, depth: SerializationDepth) -> NestedMode {
        let at_or_beyond = |threshold: Option<usize>| threshold.is_some_and(|t| depth.exceeds_limit(t));
        if at_or_beyond(self.limits.nested_reference_depth) {
            NestedMode::Reference
        } else if at_or_beyond(self.limits.nested_shallow_depth) {
            NestedMode::Shallow
        } else {
            NestedMode::Deep
        }
    }

    fn write_depth_sentinel(
        &mut self,
        buf: &mut Vec<u8>,
        depth: SerializationDepth,
        type_name: &str,
    ) -> EncodeResult {
        let sentinel = TruncationSentinel::DepthLimitExceeded {
            depth: depth.get(),
            type_name,
        };
        self.write_sentinel(buf, &sentinel, depth)
    }

    fn write_sentinel(
        &mut self,
        buf: &mut Vec<u8>,
        sentinel: &TruncationSentinel<'_>,
        depth: SerializationDepth,
    ) -> EncodeResult {
        write_serialize(buf, sentinel)?;
        self.issues.push(EncodingIssue::Truncated {
            reason: sentinel.reason(),
            depth: depth.get(),
        });
        Ok(())
    }

    fn write_unserializable(&mut self, buf: &mut Vec<u8>, type_name: &str, origin: &str) -> EncodeResult {
        write_serialize(buf, &Unserializable::new(type_name, origin))?;
        self.issues.push(EncodingIssue::Unserializable {
            type_name: type_name.to_string(),
        });
        Ok(())
    }

    fn write_failure(&self, buf: &mut Vec<u8>, message: &str, depth: SerializationDepth) {
        let failure = SerializationFailure {
            message,
            depth: depth.get(),
        };
        if serde_json::to_writer(&mut *buf, &failure).is_err() {
            // Serializing two plain fields into memory does not fail; keep the
            // buffer valid JSON regardless
            buf.extend_from_slice(b"null");
        }
    }
}

/// JSON string for a non-finite float.
fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn write_f64(buf: &mut Vec<u8>, f: f64) -> EncodeResult {
    if f.is_finite() {
        serde_json::to_writer(&mut *buf, &f)?;
    } else {
        serde_json::to_writer(&mut *buf, non_finite_name(f))?;
    }
    Ok(())
}

fn write_point(buf: &mut Vec<u8>, p: &Point) -> EncodeResult {
    buf.extend_from_slice(b"{\"type\":\"Point\",\"srid\":");
    write!(buf, "{}", p.srid)?;
    buf.extend_from_slice(b",\"x\":");
    write_f64(buf, p.x)?;
    buf.extend_from_slice(b",\"y\":");
    write_f64(buf, p.y)?;
    if let Some(z) = p.z {
        buf.extend_from_slice(b",\"z\":");
        write_f64(buf, z)?;
    }
    buf.push(b'}');
    Ok(())
}

fn write_serialize<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> EncodeResult {
    serde_json::to_writer(&mut *buf, value)?;
    Ok(())
}

/// Write a JSON string literal. Writing a `&str` into memory cannot fail.
pub fn write_json(buf: &mut Vec<u8>, s: &str) {
    let mark = buf.len();
    if serde_json::to_writer(&mut *buf, s).is_err() {
        buf.truncate(mark);
        buf.extend_from_slice(b"\"\"");
    }
}

#[cfg(test)]
mod tests;
