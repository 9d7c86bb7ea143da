//! Core value types shared across components.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::fs::normalize_rel_path;

/// A single file of a package payload: a forward-slash relative path and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageFile {
  pub path: String,
  pub content: Vec<u8>,
}

impl PackageFile {
  /// Create a file, normalizing the path to forward slashes.
  pub fn new(path: impl AsRef<str>, content: impl Into<Vec<u8>>) -> Self {
    Self {
      path: normalize_rel_path(path.as_ref()),
      content: content.into(),
    }
  }
}

/// Identity of a manifest dependency: `registry/package`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
  pub registry: String,
  pub package: String,
}

/// Error parsing a `registry/package` reference.
#[derive(Debug, thiserror::Error)]
#[error("invalid package reference '{0}', expected 'registry/package'")]
pub struct PackageIdError(pub String);

impl PackageId {
  pub fn new(registry: impl Into<String>, package: impl Into<String>) -> Self {
    Self {
      registry: registry.into(),
      package: package.into(),
    }
  }

  /// Parse `registry/package`.
  pub fn parse(s: &str) -> Result<Self, PackageIdError> {
    match s.split_once('/') {
      Some((registry, package)) if !registry.is_empty() && !package.is_empty() => Ok(Self::new(registry, package)),
      _ => Err(PackageIdError(s.to_string())),
    }
  }

  /// Key used by lockfile and sink index entries: `registry/package@version`.
  pub fn versioned_key(&self, version: &str) -> String {
    format!("{}@{}", self, version)
  }
}

impl fmt::Display for PackageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.registry, self.package)
  }
}

/// Split a `registry/package@version` key into its parts.
pub fn split_versioned_key(key: &str) -> Option<(PackageId, &str)> {
  let (id, version) = key.rsplit_once('@')?;
  let id = PackageId::parse(id).ok()?;
  Some((id, version))
}
