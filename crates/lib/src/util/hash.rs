//! Hashing utilities for content-addressed storage and verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `key_of()`: cache keys derived from the canonical JSON encoding of a value
//! - `Integrity`: the `sha256-<hex>` digest of a resolved file set

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::PackageFile;

pub type HashError = serde_json::Error;

/// A full 64-character SHA256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Serialize a value as canonical JSON: object keys sorted ascending, no insignificant whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
  let value = serde_json::to_value(value)?;
  serde_json::to_string(&sort_keys(value))
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
  use serde_json::Value;

  match value {
    Value::Object(map) => {
      let mut entries: Vec<(String, Value)> = map.into_iter().collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
    }
    Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
    other => other,
  }
}

/// Compute the cache key of a value: SHA-256 over its canonical JSON, lowercase hex.
pub fn key_of<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
  Ok(hash_bytes(canonical_json(value)?.as_bytes()).0)
}

/// Integrity digest of a resolved file set, `sha256-<hex>`.
///
/// Files are ordered by path; each file contributes its raw path bytes followed by its raw
/// content bytes to a single SHA-256, with no separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Integrity(String);

pub const INTEGRITY_PREFIX: &str = "sha256-";

impl Integrity {
  pub fn compute(files: &[PackageFile]) -> Self {
    let mut ordered: Vec<&PackageFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for file in ordered {
      hasher.update(file.path.as_bytes());
      hasher.update(&file.content);
    }

    Integrity(format!("{}{}", INTEGRITY_PREFIX, hex::encode(hasher.finalize())))
  }

  /// Wrap an integrity string read from a lockfile.
  pub fn from_string(value: impl Into<String>) -> Self {
    Integrity(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Integrity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
