//! Best-effort JSON-safe snapshots of arbitrary values.
//!
//! Used for the audit fields (`request_info`, `response_data`). Anything
//! that cannot be represented as JSON degrades to a string rendering —
//! a snapshot must never fail or abort an enqueue.

use serde::Serialize;
use serde_json::Value;

/// Containers deeper than this are collapsed to a string rendering.
pub const SNAPSHOT_MAX_DEPTH: usize = 8;

/// Snapshot any serializable value. Falls back to its `Debug` rendering
/// when JSON conversion fails (e.g. non-string map keys).
pub fn snapshot<T: Serialize + std::fmt::Debug>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => clamp(v, 0),
        Err(_) => Value::String(format!("{value:?}")),
    }
}

/// Clamp an existing JSON value to the snapshot depth limit.
pub fn json_safe(value: &Value) -> Value {
    clamp(value.clone(), 0)
}

fn clamp(value: Value, depth: usize) -> Value {
    if depth >= SNAPSHOT_MAX_DEPTH {
        return match value {
            v @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)) => v,
            other => Value::String(other.to_string()),
        };
    }
    match value {
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| clamp(v, depth + 1)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, clamp(v, depth + 1)))
                .collect(),
        ),
        scalar => scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_pass_through() {
        assert_eq!(snapshot(&42), json!(42));
        assert_eq!(snapshot(&"hello"), json!("hello"));
        assert_eq!(snapshot(&true), json!(true));
    }

    #[test]
    fn containers_are_preserved() {
        let v = json!({"zone": "example.org", "records": [1, 2, 3]});
        assert_eq!(json_safe(&v), v);
    }

    #[test]
    fn deep_nesting_is_collapsed_to_string() {
        let mut v = json!("leaf");
        for _ in 0..20 {
            v = json!({ "inner": v });
        }
        let snap = json_safe(&v);

        // Everything above the clamp boundary is still an object; the
        // node at the boundary is stringified.
        let mut cursor = &snap;
        for _ in 0..SNAPSHOT_MAX_DEPTH {
            cursor = cursor.get("inner").expect("object above the depth limit");
        }
        assert!(cursor.is_string(), "subtree at the limit is stringified");
    }

    #[test]
    fn non_string_map_keys_fall_back_to_debug() {
        use std::collections::BTreeMap;
        let mut map: BTreeMap<(u8, u8), &str> = BTreeMap::new();
        map.insert((1, 2), "pair-keyed");

        let snap = snapshot(&map);
        assert!(snap.is_string(), "unrepresentable value degrades to string");
    }

    #[test]
    fn non_finite_floats_become_null() {
        // serde_json renders non-finite floats as null; the snapshot keeps
        // that best-effort behavior rather than erroring.
        let snap = snapshot(&f64::NAN);
        assert!(snap.is_null());
    }
}
