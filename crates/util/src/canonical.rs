//! Canonical JSON rendering.
//!
//! Object keys are emitted in sorted order regardless of how the map was built, so two
//! structurally equal values always render to the same text. Used for auth-session option
//! keys, plan determinism fingerprints, and stable export ordering.

use serde_json::{Map as JsonMap, Value};

/// Returns a copy of `value` whose objects have their keys inserted in sorted order.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = JsonMap::new();
            for key in keys {
                if let Some(nested) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(nested));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact canonical rendering of `value`.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_ignores_insertion_order() {
        let mut first = JsonMap::new();
        first.insert("b".into(), json!(1));
        first.insert("a".into(), json!({"z": true, "y": [2, 1]}));
        let mut second = JsonMap::new();
        second.insert("a".into(), json!({"y": [2, 1], "z": true}));
        second.insert("b".into(), json!(1));

        let first = canonical_json(&Value::Object(first));
        assert_eq!(first, canonical_json(&Value::Object(second)));
        assert_eq!(first, r#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }
}
