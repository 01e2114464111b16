//! Hashing utilities for content-addressed resource identity.
//!
//! This module provides:
//! - `ResourceDigest`: a full 64-character hash identifying resource content
//! - `digest_value()`: canonical hashing of arbitrary JSON values
//! - `short_hash()`: a truncated hash for generated identifiers

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A content hash identifying a resource independent of its logical ID.
///
/// # Format
///
/// The hash is a lowercase hexadecimal SHA-256 string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceDigest(pub String);

impl std::fmt::Display for ResourceDigest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a JSON value in canonical form.
///
/// Object keys are emitted in sorted order regardless of how the value was
/// built, so `{"A":1,"B":2}` and `{"B":2,"A":1}` hash identically.
pub fn digest_value(value: &Value) -> ResourceDigest {
  let mut canonical = String::new();
  write_canonical(value, &mut canonical);
  ResourceDigest(hash_bytes(canonical.as_bytes()))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  format!("{:x}", hasher.finalize())
}

/// Hash a string and keep the first `len` hex characters, uppercased.
pub fn short_hash(input: &str, len: usize) -> String {
  let full = hash_bytes(input.as_bytes());
  full[..len.min(full.len())].to_uppercase()
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_canonical(&map[key], out);
      }
      out.push('}');
    }
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
    Value::String(s) => write_string(s, out),
    other => {
      let _ = write!(out, "{other}");
    }
  }
}

fn write_string(s: &str, out: &mut String) {
  // Value's Display escapes strings exactly like JSON serialization.
  let _ = write!(out, "{}", Value::String(s.to_string()));
}
