// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical Serialization and Content Digest
//!
//! Every content address in timevault is derived here:
//! **canonical JSON → BLAKE3 → lowercase hex**
//!
//! # Canonical form
//! - Object keys sorted lexicographically, recursively
//! - No insignificant whitespace
//! - Numbers and strings as `serde_json` writes them
//!
//! # Guarantee
//! Same logical value → same bytes → same hash, regardless of the key order
//! the value was built or parsed with.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{KernelError, KernelResult};

/// Serialize `value` into its canonical JSON bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> KernelResult<Vec<u8>> {
    let value = canonical_value(value)?;
    serde_json::to_vec(&value).map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Convert `value` into a `serde_json::Value` whose objects are key-sorted.
///
/// The explicit sort keeps the form stable even if `serde_json` is built with
/// `preserve_order` somewhere in the dependency graph.
pub fn canonical_value<T: Serialize + ?Sized>(value: &T) -> KernelResult<Value> {
    let value = serde_json::to_value(value).map_err(|e| KernelError::Serialization(e.to_string()))?;
    Ok(sort_keys(value))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Content digest of canonical bytes: lowercase hex BLAKE3 (64 chars).
pub fn entropy_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// First `len` hex characters of the BLAKE3 digest of `input`, uppercased.
pub fn short_digest_upper(input: &[u8], len: usize) -> String {
    let hex = blake3::hash(input).to_hex();
    hex[..len.min(hex.len())].to_ascii_uppercase()
}
