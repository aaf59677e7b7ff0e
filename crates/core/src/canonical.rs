//! Canonical JSON rendering and content hashing.
//!
//! Object keys are emitted in sorted order at every depth; array elements
//! keep their position. Two values that differ only in key insertion order
//! therefore render to the same text and hash to the same digest.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render `value` as compact JSON with recursively sorted object keys.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort independently of serde_json's map implementation, which
            // may preserve insertion order when `preserve_order` is unified in.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the canonical JSON text of `value`.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(to_canonical_json(value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_keys_are_sorted() {
        let v = json!({"b": {"y": 1, "x": [ {"d": 1, "c": 2} ]}, "a": null});
        assert_eq!(
            to_canonical_json(&v),
            r#"{"a":null,"b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn arrays_keep_order() {
        let a = json!([3, 1, 2]);
        let b = json!([1, 2, 3]);
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"c":"x","d":[1,{"f":2,"e":3}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"d":[1,{"e":3,"f":2}],"c":"x"},"a":1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
        assert_eq!(hash_value(&a).len(), 64);
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"q\"k": "line\nbreak"});
        assert_eq!(to_canonical_json(&v), r#"{"q\"k":"line\nbreak"}"#);
    }
}
