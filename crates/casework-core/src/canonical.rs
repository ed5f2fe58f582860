//! Deterministic, key-sorted serialization used solely as hash input.
//!
//! `serde_json::Value::Object` is backed by a `BTreeMap` when the `preserve_order` feature is
//! not enabled, which already gives ascending key order; this module makes that guarantee
//! explicit and testable rather than incidental, and centralizes the single function that may
//! ever feed the hasher.

use crate::error::CoreError;
use serde::Serialize;
use serde_json::Value;

/// Canonicalize a serializable value into its deterministic JSON byte encoding.
///
/// Rules: object keys sorted ascending, strings JSON-escaped, arrays kept in order, numbers in
/// their shortest decimal form, `null` preserved, no insignificant whitespace.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let as_value = serde_json::to_value(value)?;
    let sorted = sort_keys(as_value);
    serde_json::to_vec(&sorted).map_err(CoreError::from)
}

/// Canonicalize into a `String`, useful for logging and test assertions.
pub fn canonical_string<T: Serialize>(value: &T) -> Result<String, CoreError> {
    canonical_bytes(value).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                let v = map.get(&key).cloned().unwrap_or(Value::Null);
                sorted.insert(key, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Content hash (blake3, hex) of a value's canonical encoding.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, CoreError> {
    let bytes = canonical_bytes(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_canonical_bytes() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let value = json!({
            "z": {"y": 1, "x": 2},
            "a": [ {"d": 1, "c": 2} ],
        });
        let bytes = canonical_bytes(&value).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("\"a\"").unwrap() < text.find("\"z\"").unwrap());
        assert!(text.find("\"c\"").unwrap() < text.find("\"d\"").unwrap());
        assert!(text.find("\"x\"").unwrap() < text.find("\"y\"").unwrap());
    }

    #[test]
    fn hash_is_stable_across_equivalent_orderings() {
        let a = json!({"tenantId": "t1", "eventType": "ROUTED", "ts": 5});
        let b = json!({"ts": 5, "eventType": "ROUTED", "tenantId": "t1"});
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn semantically_different_values_hash_differently() {
        let a = json!({"ts": 5});
        let b = json!({"ts": 6});
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }
}
