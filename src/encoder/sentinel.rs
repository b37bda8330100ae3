//! Placeholder objects written instead of values that could not be
//! written in full.

use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Characters of an oversized string kept in its sentinel.
pub const STRING_PREFIX_CHARS: usize = 1000;

/// Bytes of an oversized binary kept (base64) in its sentinel.
pub const BINARY_PREFIX_BYTES: usize = 256;

/// Replacement for a value that exceeded an encoding limit.
#[derive(Debug, Serialize)]
#[serde(tag = "_truncated", rename_all = "snake_case")]
pub enum TruncationSentinel<'a> {
    DepthLimitExceeded {
        #[serde(rename = "_depth")]
        depth: usize,
        #[serde(rename = "_type")]
        type_name: &'a str,
    },
    StringTooLarge {
        #[serde(rename = "_length")]
        length: usize,
        #[serde(rename = "_sha256")]
        sha256: String,
        #[serde(rename = "_prefix")]
        prefix: String,
    },
    BinaryTooLarge {
        #[serde(rename = "_length")]
        length: usize,
        #[serde(rename = "_sha256")]
        sha256: String,
        /// Base64 of the leading bytes
        #[serde(rename = "_prefix")]
        prefix: String,
    },
    ListTooLarge {
        #[serde(rename = "_total_items")]
        total_items: usize,
        #[serde(rename = "_shown_items")]
        shown_items: usize,
    },
    MapTooLarge {
        #[serde(rename = "_total_items")]
        total_items: usize,
        #[serde(rename = "_shown_items")]
        shown_items: usize,
    },
}

impl<'a> TruncationSentinel<'a> {
    pub fn for_string(s: &str, length: usize) -> Self {
        TruncationSentinel::StringTooLarge {
            length,
            sha256: sha256_hex(s.as_bytes()),
            prefix: s.chars().take(STRING_PREFIX_CHARS).collect(),
        }
    }

    pub fn for_binary(bytes: &[u8]) -> Self {
        let shown = &bytes[..bytes.len().min(BINARY_PREFIX_BYTES)];
        TruncationSentinel::BinaryTooLarge {
            length: bytes.len(),
            sha256: sha256_hex(bytes),
            prefix: base64::engine::general_purpose::STANDARD.encode(shown),
        }
    }

    /// Reason tag written in `_truncated`.
    pub fn reason(&self) -> &'static str {
        match self {
            TruncationSentinel::DepthLimitExceeded { .. } => "depth_limit_exceeded",
            TruncationSentinel::StringTooLarge { .. } => "string_too_large",
            TruncationSentinel::BinaryTooLarge { .. } => "binary_too_large",
            TruncationSentinel::ListTooLarge { .. } => "list_too_large",
            TruncationSentinel::MapTooLarge { .. } => "map_too_large",
        }
    }
}

/// Diagnostic object for values the encoder has no representation for.
#[derive(Debug, Serialize)]
pub struct Unserializable<'a> {
    #[serde(rename = "_type")]
    pub type_name: &'a str,
    #[serde(rename = "_assembly")]
    pub origin: &'a str,
    #[serde(rename = "_note")]
    pub note: &'static str,
}

impl<'a> Unserializable<'a> {
    pub fn new(type_name: &'a str, origin: &'a str) -> Self {
        Self {
            type_name,
            origin,
            note: "unserializable_type",
        }
    }
}

/// Minimal object written when encoding a value failed part-way.
#[derive(Debug, Serialize)]
pub struct SerializationFailure<'a> {
    #[serde(rename = "_serialization_error")]
    pub message: &'a str,
    #[serde(rename = "_at_depth")]
    pub depth: usize,
}

/// Summary written in place of a collection in shallow/reference mode.
#[derive(Debug, Serialize)]
pub struct NestedSummary<'a> {
    #[serde(rename = "_nested")]
    pub kind: &'a str,
    #[serde(rename = "_size")]
    pub size: usize,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_depth_sentinel_shape() {
        let s = TruncationSentinel::DepthLimitExceeded {
            depth: 3,
            type_name: "list",
        };
        let v: Value = serde_json::to_value(&s).unwrap();
        assert_eq!(v["_truncated"], "depth_limit_exceeded");
        assert_eq!(v["_depth"], 3);
        assert_eq!(v["_type"], "list");
        assert_eq!(s.reason(), "depth_limit_exceeded");
    }

    #[test]
    fn test_binary_sentinel_prefix_is_bounded() {
        let bytes = vec![7u8; 4096];
        let v: Value = serde_json::to_value(TruncationSentinel::for_binary(&bytes)).unwrap();
        assert_eq!(v["_truncated"], "binary_too_large");
        assert_eq!(v["_length"], 4096);
        assert_eq!(v["_sha256"], sha256_hex(&bytes));
        let prefix = base64::engine::general_purpose::STANDARD
            .decode(v["_prefix"].as_str().unwrap())
            .unwrap();
        assert_eq!(prefix.len(), BINARY_PREFIX_BYTES);
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
