//! Stable hashing of JSON values.
//!
//! Batch dedup keys and cache keys must not depend on the order in which a
//! caller inserted object fields, so values are canonicalized (object keys
//! sorted, recursively) before hashing.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Returns `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Lower-case hex SHA-256 of the canonical JSON encoding of `value`.
pub fn stable_hash(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}
