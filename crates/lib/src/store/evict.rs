//! TTL and LRU eviction of cached versions.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::meta::VersionMeta;
use super::paths::packages_dir;
use super::{Store, StoreError, read_json};
use crate::consts::{METADATA_FILENAME, STAGING_PREFIX};
use crate::store_lock::LockError;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictStats {
  pub versions_scanned: usize,
  pub versions_removed: usize,
  pub staging_removed: usize,
  pub bytes_freed: u64,
  pub removed_paths: Vec<PathBuf>,
}

impl EvictStats {
  pub fn total_removed(&self) -> usize {
    self.versions_removed + self.staging_removed
  }
}

#[derive(Clone, Copy)]
enum Criterion {
  Age,
  Idle,
}

impl Criterion {
  fn timestamp(self, meta: &VersionMeta) -> DateTime<Utc> {
    match self {
      Criterion::Age => meta.updated_at,
      Criterion::Idle => meta.last_accessed_at,
    }
  }
}

impl Store {
  /// Remove versions whose `updatedAt` is older than `max_age`.
  pub fn evict_by_age(&self, cancel: &CancellationToken, max_age: Duration) -> Result<EvictStats, StoreError> {
    self.evict(cancel, max_age, Criterion::Age)
  }

  /// Remove versions whose `lastAccessedAt` is older than `max_idle`.
  pub fn evict_by_idle(&self, cancel: &CancellationToken, max_idle: Duration) -> Result<EvictStats, StoreError> {
    self.evict(cancel, max_idle, Criterion::Idle)
  }

  fn evict(
    &self,
    cancel: &CancellationToken,
    window: Duration,
    criterion: Criterion,
  ) -> Result<EvictStats, StoreError> {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now().checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut stats = EvictStats::default();

    let registries = self.paths().registries_dir();
    let Ok(entries) = fs::read_dir(&registries) else {
      return Ok(stats);
    };

    for registry in entries.flatten() {
      let pkgs = packages_dir(&registry.path());
      let Ok(packages) = fs::read_dir(&pkgs) else {
        continue;
      };
      for package in packages.flatten() {
        let path = package.path();
        if !path.is_dir() {
          continue;
        }
        if cancel.is_cancelled() {
          return Err(StoreError::Cancelled);
        }
        match self.lock(cancel, &path, "evict") {
          Ok(_lock) => sweep_package(&path, cutoff, criterion, &mut stats),
          Err(StoreError::Lock(LockError::Timeout { .. })) => {
            warn!(path = %path.display(), "package locked, skipping eviction");
          }
          Err(e) => return Err(e),
        }
      }
    }

    info!(
      removed = stats.versions_removed,
      staging = stats.staging_removed,
      bytes_freed = stats.bytes_freed,
      "cache eviction complete"
    );
    Ok(stats)
  }
}

fn sweep_package(pkg_dir: &Path, cutoff: DateTime<Utc>, criterion: Criterion, stats: &mut EvictStats) {
  let Ok(entries) = fs::read_dir(pkg_dir) else {
    return;
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if !path.is_dir() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().to_string();

    if name.starts_with(STAGING_PREFIX) {
      debug!(path = %path.display(), "removing orphaned staging directory");
      if remove(&path, stats) {
        stats.staging_removed += 1;
      }
      continue;
    }

    stats.versions_scanned += 1;
    let expired = match read_json::<VersionMeta>(&path.join(METADATA_FILENAME)) {
      Ok(Some(meta)) => criterion.timestamp(&meta) < cutoff,
      Ok(None) => true,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "unreadable version metadata");
        true
      }
    };
    if expired {
      debug!(path = %path.display(), "evicting cached version");
      if remove(&path, stats) {
        stats.versions_removed += 1;
      }
    }
  }
}

fn remove(path: &Path, stats: &mut EvictStats) -> bool {
  let size = dir_size(path);
  match fs::remove_dir_all(path) {
    Ok(()) => {
      stats.bytes_freed += size;
      stats.removed_paths.push(path.to_path_buf());
      true
    }
    Err(e) => {
      warn!(path = %path.display(), error = %e, "failed to delete cache directory");
      false
    }
  }
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  use crate::store::{PackageRequest, RegistryHandle, paths::package_dir};
  use crate::types::PackageFile;
  use crate::version::Version;

  fn populated() -> (TempDir, Store, RegistryHandle, PackageRequest) {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path().join("storage"));
    let cancel = CancellationToken::new();
    let registry = store.open_registry(&cancel, &serde_json::json!({"type": "git"})).unwrap();
    let request = PackageRequest::new("pkg");
    store
      .put_version(&cancel, &registry, &request, &Version::new(1, 0, 0), &[PackageFile::new("a.yml", "a")])
      .unwrap();
    (temp, store, registry, request)
  }

  #[test]
  fn idle_zero_removes_version_but_keeps_package_metadata() {
    let (_temp, store, registry, request) = populated();
    std::thread::sleep(Duration::from_millis(5));

    let stats = store.evict_by_idle(&CancellationToken::new(), Duration::ZERO).unwrap();

    assert_eq!(stats.versions_removed, 1);
    assert!(stats.bytes_freed > 0);
    let pkg_dir = package_dir(registry.dir(), &request.key().unwrap());
    assert!(pkg_dir.join(METADATA_FILENAME).exists());
    assert!(store.list_versions(&registry, &request).unwrap().is_empty());
  }

  #[test]
  fn fresh_versions_survive() {
    let (_temp, store, registry, request) = populated();
    let cancel = CancellationToken::new();

    let by_age = store.evict_by_age(&cancel, Duration::from_secs(3600)).unwrap();
    let by_idle = store.evict_by_idle(&cancel, Duration::from_secs(3600)).unwrap();

    assert_eq!(by_age.total_removed() + by_idle.total_removed(), 0);
    assert_eq!(by_age.versions_scanned, 1);
    assert_eq!(store.list_versions(&registry, &request).unwrap().len(), 1);
  }

  #[test]
  fn orphaned_staging_directories_are_removed() {
    let (_temp, store, registry, request) = populated();
    let pkg_dir = package_dir(registry.dir(), &request.key().unwrap());
    let orphan = pkg_dir.join(format!("{STAGING_PREFIX}crashed"));
    fs::create_dir_all(orphan.join("files")).unwrap();
    fs::write(orphan.join("files/partial.yml"), "x").unwrap();

    let stats = store.evict_by_age(&CancellationToken::new(), Duration::from_secs(3600)).unwrap();

    assert_eq!(stats.staging_removed, 1);
    assert_eq!(stats.versions_removed, 0);
    assert!(!orphan.exists());
  }

  #[test]
  fn empty_cache_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path().join("storage"));
    let stats = store.evict_by_age(&CancellationToken::new(), Duration::ZERO).unwrap();
    assert_eq!(stats.total_removed(), 0);
  }
}
