// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Canonical serialisation of requests for cache keys.
//!
//! Two requests that mean the same thing must produce the same key, so the
//! canonical form drops unset (null) object members and relies on
//! `serde_json`'s sorted object keys. Nulls inside arrays are positional and
//! stay.

use serde_json::Value;

/// Renders `value` as compact JSON with null object members removed and keys
/// sorted.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    strip_nulls(value).unwrap_or(Value::Null).to_string()
}

fn strip_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(members) => Some(Value::Object(
            members
                .iter()
                .filter_map(|(key, member)| strip_nulls(member).map(|member| (key.clone(), member)))
                .collect(),
        )),
        Value::Array(elements) => Some(Value::Array(
            elements
                .iter()
                .map(|element| strip_nulls(element).unwrap_or(Value::Null))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_members_are_dropped() {
        let value = json!({"b": 1, "a": null, "nested": {"x": null, "y": 2}});
        assert_eq!(canonical_json(&value), r#"{"b":1,"nested":{"y":2}}"#);
    }

    #[test]
    fn test_keys_are_sorted() {
        let value = json!({"zeta": 1, "alpha": 2});
        assert_eq!(canonical_json(&value), r#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn test_array_nulls_are_positional_and_kept() {
        let value = json!({"items": [1, null, 3]});
        assert_eq!(canonical_json(&value), r#"{"items":[1,null,3]}"#);
    }

    #[test]
    fn test_equal_requests_share_a_key() {
        let a = json!({"prompt": "hi", "temperature": null, "max_tokens": 100});
        let b = json!({"max_tokens": 100, "prompt": "hi"});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
