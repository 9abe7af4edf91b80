//! Deterministic cache key derivation.
//!
//! A key is `"{prefix}:{hash}"` where `hash` is the first 128 bits of
//! SHA-256 over `path + "|" + canonical(params)`. Canonical JSON sorts
//! object keys at every depth, so the same logical request yields the same
//! key no matter how its parameters were assembled.
//!
//! Unlike the in-process `DefaultHasher`, SHA-256 is stable across
//! processes and builds, which a shared durable store requires.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Request parameters. Keys are unique; insertion order is irrelevant.
pub type Params = Map<String, Value>;

/// Bytes of the SHA-256 digest kept in the key (128 bits).
const KEY_HASH_BYTES: usize = 16;

/// Derive the store key for `(prefix, path, params)`.
pub fn derive_key(prefix: &str, path: &str, params: &Params) -> String {
    let mut material = String::with_capacity(path.len() + 64);
    material.push_str(path);
    material.push('|');
    write_canonical_object(params, &mut material);

    let digest = Sha256::digest(material.as_bytes());
    format!("{prefix}:{}", hex::encode(&digest[..KEY_HASH_BYTES]))
}

/// Namespace for the short-TTL copy of a provider's responses.
pub fn fresh_prefix(provider: &str) -> String {
    format!("{provider}:fresh")
}

/// Namespace for the long-TTL fallback copy of a provider's responses.
pub fn stale_prefix(provider: &str) -> String {
    format!("{provider}:stale")
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
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
        // Scalars serialize identically regardless of map ordering.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
    }
    out.push('}');
}
