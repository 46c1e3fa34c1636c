// Content addressing

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// sha256 of raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// sha256 of a structured value over its canonical JSON rendering.
///
/// Objects serialize with sorted keys and no redundant whitespace so the
/// hash is stable across insertion orders.
pub fn value_hash(value: &Value) -> String {
    content_hash(to_canonical_json(value).as_bytes())
}

fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = tree
                .into_iter()
                .map(|(k, v)| {
                    format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), v)
                })
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}
