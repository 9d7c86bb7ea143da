use std::path::{Path, PathBuf};

use crate::platform::paths::storage_dir;
use crate::util::hash::hash_bytes;
use crate::version::Version;

/// On-disk layout of the shared cache.
///
/// ```text
/// storage/
///   registries/
///     {registryKey}/
///       metadata.json
///       repo/
///       packages/
///         {packageKey}/
///           metadata.json
///           v{M}.{m}.{p}/
///             metadata.json
///             files/**
/// ```
#[derive(Debug, Clone)]
pub struct StorePaths {
  root: PathBuf,
}

impl StorePaths {
  /// Layout rooted at the default storage directory (`$ARM_HOME/storage`).
  pub fn current() -> Self {
    Self::with_root(storage_dir())
  }

  pub fn with_root(root: PathBuf) -> Self {
    Self { root }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn registries_dir(&self) -> PathBuf {
    self.root.join("registries")
  }

  pub fn registry_dir(&self, registry_key: &str) -> PathBuf {
    self.registries_dir().join(registry_key)
  }
}

pub fn packages_dir(registry_dir: &Path) -> PathBuf {
  registry_dir.join("packages")
}

pub fn package_dir(registry_dir: &Path, package_key: &str) -> PathBuf {
  packages_dir(registry_dir).join(package_key)
}

/// Target of the lock serialising backend fetches for a package, beside the package directory.
pub fn fetch_lock_target(registry_dir: &Path, package_key: &str) -> PathBuf {
  packages_dir(registry_dir).join(format!("{package_key}.fetch"))
}

/// Directory name of a cached version.
///
/// Semantic versions use `v{canonical}`; opaque versions use `ref-{sanitised}-{hash8}` so that
/// branch names never collide with semantic directories or with each other.
pub fn version_dir_name(version: &Version) -> String {
  if version.is_semantic() {
    return format!("v{}", version.canonical());
  }

  let display = version.display();
  let sanitised: String = display
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
    .collect();
  let hash = hash_bytes(display.as_bytes());
  format!("ref-{}-{}", sanitised, &hash.0[..8])
}

pub fn version_dir(package_dir: &Path, version: &Version) -> PathBuf {
  package_dir.join(version_dir_name(version))
}
