//! The lockfile (`arm-lock.json`) pins every installed package to an exact version and
//! integrity digest.
//!
//! ```json
//! {
//!   "version": 1,
//!   "dependencies": {
//!     "reg/clean-code@1.2.0": { "integrity": "sha256-9f86d08..." }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PackageId, split_versioned_key};
use crate::util::fs::write_json_atomic;
use crate::util::hash::Integrity;

/// Current lockfile format version.
pub const LOCKFILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
  pub version: u32,
  /// Keyed by `registry/package@version`.
  #[serde(default)]
  pub dependencies: BTreeMap<String, LockedDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
  pub integrity: Integrity,
}

#[derive(Debug, Error)]
pub enum LockfileError {
  #[error("failed to read lockfile {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lockfile {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse lockfile {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported lockfile version {0}, expected {LOCKFILE_VERSION}")]
  UnsupportedVersion(u32),

  #[error("invalid lockfile key '{0}', expected 'registry/package@version'")]
  InvalidKey(String),
}

impl Default for Lockfile {
  fn default() -> Self {
    Self::new()
  }
}

impl Lockfile {
  pub fn new() -> Self {
    Self {
      version: LOCKFILE_VERSION,
      dependencies: BTreeMap::new(),
    }
  }

  pub fn get(&self, id: &PackageId, version: &str) -> Option<&LockedDependency> {
    self.dependencies.get(&id.versioned_key(version))
  }

  pub fn insert(&mut self, id: &PackageId, version: &str, integrity: Integrity) {
    self
      .dependencies
      .insert(id.versioned_key(version), LockedDependency { integrity });
  }

  /// Locked versions of `id`, ascending by key.
  pub fn versions(&self, id: &PackageId) -> Vec<String> {
    self
      .dependencies
      .keys()
      .filter_map(|key| split_versioned_key(key))
      .filter(|(entry_id, _)| entry_id == id)
      .map(|(_, version)| version.to_string())
      .collect()
  }

  /// Remove every locked version of `id`. Returns how many entries were dropped.
  pub fn remove_package(&mut self, id: &PackageId) -> usize {
    let before = self.dependencies.len();
    self
      .dependencies
      .retain(|key, _| split_versioned_key(key).is_none_or(|(entry_id, _)| &entry_id != id));
    before - self.dependencies.len()
  }

  /// Keep only entries for which `keep(id, version)` holds. Returns the removed keys.
  pub fn retain(&mut self, mut keep: impl FnMut(&PackageId, &str) -> bool) -> Vec<String> {
    let mut removed = Vec::new();
    self.dependencies.retain(|key, _| {
      let kept = split_versioned_key(key).is_some_and(|(id, version)| keep(&id, version));
      if !kept {
        removed.push(key.clone());
      }
      kept
    });
    removed
  }

  fn validate(&self) -> Result<(), LockfileError> {
    if self.version != LOCKFILE_VERSION {
      return Err(LockfileError::UnsupportedVersion(self.version));
    }
    match self.dependencies.keys().find(|key| split_versioned_key(key).is_none()) {
      Some(key) => Err(LockfileError::InvalidKey(key.clone())),
      None => Ok(()),
    }
  }
}

/// Loads and persists the lockfile.
pub trait LockStore: Send + Sync {
  fn load(&self) -> Result<Lockfile, LockfileError>;
  fn save(&self, lockfile: &Lockfile) -> Result<(), LockfileError>;
}

#[derive(Debug, Clone)]
pub struct JsonLockStore {
  path: PathBuf,
}

impl JsonLockStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl LockStore for JsonLockStore {
  /// A missing lockfile loads as an empty one.
  fn load(&self) -> Result<Lockfile, LockfileError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Lockfile::new()),
      Err(source) => {
        return Err(LockfileError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };

    let lockfile: Lockfile = serde_json::from_str(&content).map_err(|source| LockfileError::Parse {
      path: self.path.clone(),
      source,
    })?;
    lockfile.validate()?;
    Ok(lockfile)
  }

  fn save(&self, lockfile: &Lockfile) -> Result<(), LockfileError> {
    write_json_atomic(&self.path, lockfile).map_err(|source| LockfileError::Write {
      path: self.path.clone(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn integrity(s: &str) -> Integrity {
    Integrity::from_string(format!("sha256-{s}"))
  }

  mod lockfile {
    use super::*;

    #[test]
    fn insert_and_get() {
      let mut lock = Lockfile::new();
      let id = PackageId::new("reg", "a");
      lock.insert(&id, "1.2.0", integrity("aa"));

      assert_eq!(lock.get(&id, "1.2.0").unwrap().integrity, integrity("aa"));
      assert!(lock.get(&id, "1.3.0").is_none());
      assert!(lock.dependencies.contains_key("reg/a@1.2.0"));
    }

    #[test]
    fn multiple_versions_coexist() {
      let mut lock = Lockfile::new();
      let id = PackageId::new("reg", "a");
      lock.insert(&id, "1.0.0", integrity("a"));
      lock.insert(&id, "2.0.0", integrity("b"));
      lock.insert(&PackageId::new("reg", "ab"), "1.0.0", integrity("c"));

      assert_eq!(lock.versions(&id), vec!["1.0.0", "2.0.0"]);
      assert_eq!(lock.remove_package(&id), 2);
      assert_eq!(lock.dependencies.len(), 1);
    }

    #[test]
    fn retain_reports_removed_keys() {
      let mut lock = Lockfile::new();
      lock.insert(&PackageId::new("reg", "a"), "1.0.0", integrity("a"));
      lock.insert(&PackageId::new("reg", "b"), "1.0.0", integrity("b"));

      let removed = lock.retain(|id, _| id.package == "a");
      assert_eq!(removed, vec!["reg/b@1.0.0"]);
    }
  }

  mod store {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
      let temp = TempDir::new().unwrap();
      let store = JsonLockStore::new(temp.path().join("arm-lock.json"));
      assert_eq!(store.load().unwrap(), Lockfile::new());
    }

    #[test]
    fn save_then_load() {
      let temp = TempDir::new().unwrap();
      let store = JsonLockStore::new(temp.path().join("arm-lock.json"));
      let mut lock = Lockfile::new();
      lock.insert(&PackageId::new("reg", "a"), "1.2.0", integrity("ff"));

      store.save(&lock).unwrap();
      let content = fs::read_to_string(store.path()).unwrap();
      assert!(content.contains("\"reg/a@1.2.0\""));
      assert!(content.contains("\"integrity\": \"sha256-ff\""));
      assert_eq!(store.load().unwrap(), lock);
    }

    #[test]
    fn rejects_unsupported_version() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("arm-lock.json");
      fs::write(&path, r#"{"version": 2, "dependencies": {}}"#).unwrap();
      assert!(matches!(
        JsonLockStore::new(&path).load(),
        Err(LockfileError::UnsupportedVersion(2))
      ));
    }

    #[test]
    fn rejects_malformed_keys() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("arm-lock.json");
      fs::write(&path, r#"{"version": 1, "dependencies": {"nope": {"integrity": "x"}}}"#).unwrap();
      assert!(matches!(JsonLockStore::new(&path).load(), Err(LockfileError::InvalidKey(_))));
    }
  }
}
