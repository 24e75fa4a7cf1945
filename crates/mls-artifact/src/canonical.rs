//! Canonical JSON bytes.
//!
//! Keys are sorted at every nesting level and the output carries no
//! insignificant whitespace. Strings are written as raw UTF-8.
//!
//! Sorting is done explicitly rather than relying on `serde_json::Map`
//! ordering, so the output is stable even if some dependency turns on
//! serde_json's `preserve_order` feature.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{HASH_FIELD, MANIFEST_FIELD};

/// Canonical bytes of a payload with `manifest.hash` omitted.
///
/// Pure: `payload` is only borrowed. Calling this on a payload with or
/// without an embedded hash yields identical bytes.
pub fn canonical_bytes(payload: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&canonical_value(payload))
}

/// Sorted copy of `payload` with `manifest.hash` left out.
pub fn canonical_value(payload: &Value) -> Value {
    match payload {
        Value::Object(root) => {
            let mut out = Map::new();
            for key in sorted_keys(root) {
                let value = match (key.as_str(), &root[key]) {
                    (MANIFEST_FIELD, Value::Object(manifest)) => {
                        Value::Object(sorted_map(manifest, Some(HASH_FIELD)))
                    }
                    (_, other) => sort_keys(other),
                };
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
        other => sort_keys(other),
    }
}

/// Canonical bytes of any serializable value (nothing omitted).
///
/// Used for the stored bundle form, so that the validator of a published
/// artifact does not depend on struct field order.
pub fn canonical_json_bytes<T: Serialize>(v: &T) -> Result<Vec<u8>, serde_json::Error> {
    let raw = serde_json::to_value(v)?;
    serde_json::to_vec(&sort_keys(&raw))
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(sorted_map(map, None)),
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn sorted_map(map: &Map<String, Value>, skip: Option<&str>) -> Map<String, Value> {
    let mut out = Map::new();
    for key in sorted_keys(map) {
        if Some(key.as_str()) == skip {
            continue;
        }
        out.insert(key.clone(), sort_keys(&map[key]));
    }
    out
}

fn sorted_keys(map: &Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let v = json!({"b": {"z": 1, "a": [{"y": 2, "x": 1}]}, "a": true});
        let out = String::from_utf8(canonical_bytes(&v).unwrap()).unwrap();
        assert_eq!(out, r#"{"a":true,"b":{"a":[{"x":1,"y":2}],"z":1}}"#);
    }

    #[test]
    fn manifest_hash_is_omitted_but_nested_hash_keys_are_kept() {
        let v = json!({
            "manifest": {"name": "s", "hash": "deadbeef"},
            "rules": [{"hash": "kept"}]
        });
        let out = String::from_utf8(canonical_bytes(&v).unwrap()).unwrap();
        assert_eq!(out, r#"{"manifest":{"name":"s"},"rules":[{"hash":"kept"}]}"#);
    }

    #[test]
    fn caller_value_is_not_mutated() {
        let v = json!({"manifest": {"name": "s", "hash": "abc"}});
        let before = v.clone();
        let _ = canonical_bytes(&v).unwrap();
        assert_eq!(v, before);
    }

    #[test]
    fn non_ascii_is_emitted_raw() {
        let v = json!({"manifest": {"name": "Стратегия"}});
        let out = String::from_utf8(canonical_bytes(&v).unwrap()).unwrap();
        assert_eq!(out, r#"{"manifest":{"name":"Стратегия"}}"#);
    }

    #[test]
    fn manifest_that_is_not_an_object_is_serialized_as_is() {
        let v = json!({"manifest": "oops"});
        let out = String::from_utf8(canonical_bytes(&v).unwrap()).unwrap();
        assert_eq!(out, r#"{"manifest":"oops"}"#);
    }
}
