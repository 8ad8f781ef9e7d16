//! Canonical JSON serialization with recursively sorted object keys.
//!
//! The canonical form is the deterministic byte input to HMAC signing.
//! Arrays keep their order; primitives use standard JSON encoding.

use serde_json::Value;
use std::fmt::Write;

/// Serializes a value with all object keys recursively sorted.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        // Null, Bool, Number, String: Display on Value is compact JSON,
        // and writing to a String cannot fail.
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn push_json_string(out: &mut String, s: &str) {
    let encoded = serde_json::to_string(s).expect("JSON string encoding is infallible");
    out.push_str(&encoded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "m": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":null,"z":true},"b":1}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let value = json!({"list": [3, 1, 2]});
        assert_eq!(canonical_json(&value), r#"{"list":[3,1,2]}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"k": "a\"b\nc"});
        assert_eq!(canonical_json(&value), r#"{"k":"a\"b\nc"}"#);
    }

    #[test]
    fn deterministic_across_insertion_orders() {
        let a = json!({"x": 1, "y": [{"b": 2, "a": 3}]});
        let mut b = serde_json::Map::new();
        b.insert("y".to_string(), json!([{"a": 3, "b": 2}]));
        b.insert("x".to_string(), json!(1));
        assert_eq!(canonical_json(&a), canonical_json(&Value::Object(b)));
    }

    #[test]
    fn numbers_use_standard_json_encoding() {
        let value = json!({"i": 42, "f": 1.5, "neg": -7});
        assert_eq!(canonical_json(&value), r#"{"f":1.5,"i":42,"neg":-7}"#);
    }
}
