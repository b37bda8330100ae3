//! Object key normalization

use std::collections::HashSet;

use crate::model::GraphValue;

/// Hands out unique keys for one JSON object.
///
/// A key that was already used gets `_1`, `_2`, … appended until it is
/// unique, so no property is silently dropped by a consumer that keeps the
/// last duplicate.
#[derive(Debug, Default)]
pub struct KeyDeduplicator {
    used: HashSet<String>,
}

impl KeyDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `key` itself or the first free suffixed variant of it.
    pub fn claim(&mut self, key: String) -> String {
        if !self.used.contains(&key) {
            self.used.insert(key.clone());
            return key;
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{key}_{n}");
            if !self.used.contains(&candidate) {
                self.used.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }
}

/// Text form of a map key. Non-string keys are coerced.
pub fn coerce_key(key: &GraphValue) -> String {
    match key {
        GraphValue::String(s) => s.clone(),
        GraphValue::Null => "null".to_string(),
        GraphValue::Bool(b) => b.to_string(),
        GraphValue::Int8(n) => n.to_string(),
        GraphValue::Int16(n) => n.to_string(),
        GraphValue::Int32(n) => n.to_string(),
        GraphValue::Int64(n) => n.to_string(),
        GraphValue::UInt8(n) => n.to_string(),
        GraphValue::UInt16(n) => n.to_string(),
        GraphValue::UInt32(n) => n.to_string(),
        GraphValue::UInt64(n) => n.to_string(),
        GraphValue::Float32(f) => f.to_string(),
        GraphValue::Float64(f) => f.to_string(),
        GraphValue::Date(d) => d.to_string(),
        GraphValue::DateTime(dt) => dt.to_rfc3339(),
        other => other.type_name().to_string(),
    }
}

/// Cut `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_suffixes_duplicates() {
        let mut keys = KeyDeduplicator::new();
        assert_eq!(keys.claim("a".into()), "a");
        assert_eq!(keys.claim("a".into()), "a_1");
        assert_eq!(keys.claim("a".into()), "a_2");
        // A literal key colliding with a generated one is suffixed too
        assert_eq!(keys.claim("a_1".into()), "a_1_1");
    }

    #[test]
    fn test_coerce_key() {
        assert_eq!(coerce_key(&GraphValue::Null), "null");
        assert_eq!(coerce_key(&GraphValue::Int64(42)), "42");
        assert_eq!(coerce_key(&GraphValue::from("k")), "k");
        assert_eq!(coerce_key(&GraphValue::List(vec![])), "list");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
