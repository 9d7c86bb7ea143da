//! Package requests and their cache keys.

use serde::{Deserialize, Serialize};

use crate::util::hash::{HashError, key_of};

/// The version-independent part of a fetch: package name plus include/exclude patterns.
///
/// The package key is the hash of the normalized request; the version lives in the
/// directory name below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRequest {
  pub name: String,
  #[serde(default)]
  pub include: Vec<String>,
  #[serde(default)]
  pub exclude: Vec<String>,
}

impl PackageRequest {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      include: Vec::new(),
      exclude: Vec::new(),
    }
  }

  pub fn with_include(mut self, include: Vec<String>) -> Self {
    self.include = include;
    self
  }

  pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
    self.exclude = exclude;
    self
  }

  /// Request with both pattern lists normalized.
  pub fn normalized(&self) -> Self {
    Self {
      name: self.name.clone(),
      include: normalize_patterns(&self.include),
      exclude: normalize_patterns(&self.exclude),
    }
  }

  /// SHA-256 of the canonical JSON of the normalized request.
  pub fn key(&self) -> Result<String, HashError> {
    key_of(&self.normalized())
  }
}

/// Trim outer whitespace, fold backslashes to forward slashes, sort lexicographically.
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
  let mut out: Vec<String> = patterns.iter().map(|p| p.trim().replace('\\', "/")).collect();
  out.sort();
  out
}
