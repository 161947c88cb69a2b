//! Content hashing for drift detection.
//!
//! A hash is the hex SHA-256 of a canonical encoding of a JSON value. The
//! encoding tags every node with its type and length-prefixes every string and
//! container, and object keys are visited in sorted order, so two values hash
//! equal exactly when they are structurally equal. Fields the control plane
//! assigns itself are dropped first, otherwise a freshly fetched remote object
//! would look different on every pass.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Top-level fields assigned by the control plane for every kind.
pub const SERVER_FIELDS: &[&str] = &["id", "_id", "created_at", "updated_at", "last_updated", "date_created"];

/// Which fields to leave out of a hash.
#[derive(Debug, Clone, Copy)]
pub struct HashRules {
    /// Top-level keys, on top of [`SERVER_FIELDS`].
    pub ignore_top_level: &'static [&'static str],
    /// Keys ignored at any depth.
    pub ignore_anywhere: &'static [&'static str],
}

impl HashRules {
    pub const DEFAULT: HashRules = HashRules {
        ignore_top_level: &[],
        ignore_anywhere: &[],
    };

    fn ignores(&self, key: &str, depth: usize) -> bool {
        (depth == 0 && (SERVER_FIELDS.contains(&key) || self.ignore_top_level.contains(&key)))
            || self.ignore_anywhere.contains(&key)
    }
}

impl Default for HashRules {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Hashes a JSON value.
pub fn hash_value(value: &Value, rules: &HashRules) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, value, rules, 0);
    hex::encode(hasher.finalize())
}

/// Serializes `value` and hashes the result.
pub fn hash<T: Serialize>(value: &T, rules: &HashRules) -> serde_json::Result<String> {
    Ok(hash_value(&serde_json::to_value(value)?, rules))
}

fn feed(hasher: &mut Sha256, value: &Value, rules: &HashRules, depth: usize) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Value::Number(n) => {
            hasher.update(b"d");
            feed_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            feed_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"a");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed(hasher, item, rules, depth + 1);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !rules.ignores(k, depth))
                .collect();
            keys.sort();

            hasher.update(b"o");
            hasher.update((keys.len() as u64).to_be_bytes());
            for key in keys {
                feed_str(hasher, key);
                feed(hasher, &map[key.as_str()], rules, depth + 1);
            }
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}
