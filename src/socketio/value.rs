//! A tagged value tree for Socket.IO packet data.
//!
//! `serde_json::Value` cannot hold a raw byte-sequence leaf, but Socket.IO
//! packet data is JSON that may contain byte sequences anywhere in the tree
//! `Value` is `serde_json::Value` plus a `Bytes` leaf;
//! encoding walks the tree depth-first, container-order, replacing every
//! `Bytes` leaf with a `{"_placeholder":true,"num":N}` object and collecting
//! the attachments in the same order, mirroring the protocol's placeholder
//! substitution.

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    /// Insertion-ordered so the placeholder walk is deterministic.
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn count_bytes_leaves(&self) -> usize {
        match self {
            Value::Bytes(_) => 1,
            Value::Array(items) => items.iter().map(Value::count_bytes_leaves).sum(),
            Value::Object(entries) => entries.iter().map(|(_, v)| v.count_bytes_leaves()).sum(),
            _ => 0,
        }
    }

    /// Walks the tree depth-first in container order, replacing every
    /// `Bytes` leaf with a placeholder object and pushing the bytes onto
    /// `attachments` in the order encountered.
    pub fn substitute_placeholders(&self, attachments: &mut Vec<Bytes>) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonValue::Number(n.clone()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => {
                let num = attachments.len();
                attachments.push(b.clone());
                let mut obj = Map::new();
                obj.insert("_placeholder".to_string(), JsonValue::Bool(true));
                obj.insert("num".to_string(), JsonValue::from(num));
                JsonValue::Object(obj)
            }
            Value::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| v.substitute_placeholders(attachments))
                    .collect(),
            ),
            Value::Object(entries) => {
                let mut obj = Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), v.substitute_placeholders(attachments));
                }
                JsonValue::Object(obj)
            }
        }
    }

    /// Converts a decoded JSON tree (with placeholder objects) back into a
    /// `Value` tree with `Bytes` leaves, consuming attachments from `pool`
    /// depth-first, container-order, as each placeholder is found.
    ///
    /// Returns `None` if a placeholder is encountered but `pool` is already
    /// exhausted (the caller turns this into a parser error).
    pub fn reconstruct(json: &JsonValue, pool: &mut std::collections::VecDeque<Bytes>) -> Option<Value> {
        Some(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.clone()),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::reconstruct(item, pool)?);
                }
                Value::Array(out)
            }
            JsonValue::Object(map) => {
                if is_placeholder(map) {
                    return pool.pop_front().map(Value::Bytes);
                }
                let mut out = Vec::with_capacity(map.len());
                for (k, v) in map {
                    out.push((k.clone(), Value::reconstruct(v, pool)?));
                }
                Value::Object(out)
            }
        })
    }

    /// Finds the first placeholder-shaped leaf in `json` (used to validate
    /// that an incoming byte attachment actually has somewhere to land).
    pub fn has_placeholder(json: &JsonValue) -> bool {
        match json {
            JsonValue::Array(items) => items.iter().any(Value::has_placeholder),
            JsonValue::Object(map) => is_placeholder(map) || map.values().any(Value::has_placeholder),
            _ => false,
        }
    }

    /// Converts this tree into plain JSON for delivery to public API
    /// callbacks, which only ever see `serde_json::Value`. A `Bytes` leaf
    /// (already reconstructed from its wire attachment, not a placeholder
    /// object) becomes a JSON array of byte values, since callbacks have no
    /// way to accept a raw buffer type directly.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonValue::Number(n.clone()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(entries) => {
                let mut obj = Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(obj)
            }
        }
    }

    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

fn is_placeholder(map: &Map<String, JsonValue>) -> bool {
    matches!(map.get("_placeholder"), Some(JsonValue::Bool(true))) && map.contains_key("num")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_single_nested_bytes_leaf() {
        let value = Value::Array(vec![
            Value::String("eventName".to_string()),
            Value::Bytes(Bytes::from_static(&[1, 2, 3])),
            Value::String("str".to_string()),
        ]);
        let mut attachments = Vec::new();
        let json = value.substitute_placeholders(&mut attachments);
        assert_eq!(attachments, vec![Bytes::from_static(&[1, 2, 3])]);
        assert_eq!(
            json,
            serde_json::json!(["eventName", {"_placeholder": true, "num": 0}, "str"])
        );
    }

    #[test]
    fn reconstructs_from_placeholders_in_order() {
        let json = serde_json::json!([
            {"_placeholder": true, "num": 0},
            {"_placeholder": true, "num": 1}
        ]);
        let mut pool: std::collections::VecDeque<Bytes> =
            vec![Bytes::from_static(&[1]), Bytes::from_static(&[2])].into();
        let value = Value::reconstruct(&json, &mut pool).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Bytes(Bytes::from_static(&[1])),
                Value::Bytes(Bytes::from_static(&[2])),
            ])
        );
    }

    #[test]
    fn to_json_renders_bytes_leaf_as_byte_array() {
        let value = Value::Array(vec![Value::String("a".into()), Value::Bytes(Bytes::from_static(&[9, 8]))]);
        assert_eq!(value.to_json(), serde_json::json!(["a", [9, 8]]));
    }

    #[test]
    fn reconstruct_fails_when_pool_exhausted() {
        let json = serde_json::json!({"_placeholder": true, "num": 0});
        let mut pool: std::collections::VecDeque<Bytes> = std::collections::VecDeque::new();
        assert!(Value::reconstruct(&json, &mut pool).is_none());
    }
}
