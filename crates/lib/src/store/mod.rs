//! Content-addressed cache of fetched package versions.
//!
//! Shared by every project on the machine. Each registry gets a directory keyed by the hash of
//! its configuration, each package request a directory keyed by the hash of its normalized
//! request, and each version a directory named after the version. All mutations of a package
//! directory happen under that directory's [`FileLock`]; version directories are written into a
//! scratch directory first and renamed into place, so readers never see partial contents.

pub mod evict;
pub mod key;
pub mod meta;
pub mod paths;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::{DEFAULT_LOCK_TIMEOUT_SECS, METADATA_FILENAME, STAGING_PREFIX};
use crate::store_lock::{FileLock, LockError};
use crate::types::PackageFile;
use crate::util::fs::{safe_join, write_json_atomic};
use crate::util::hash::key_of;
use crate::version::{Version, parse_version};

pub use evict::EvictStats;
pub use key::{PackageRequest, normalize_patterns};
pub use meta::{PackageMeta, RegistryMeta, VersionMeta};
pub use paths::StorePaths;

use meta::now_after;
use paths::{fetch_lock_target, package_dir, version_dir, version_dir_name};

const FILES_DIR: &str = "files";
const REPO_DIR: &str = "repo";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("version {version} of '{package}' is not cached")]
  NotFound { package: String, version: String },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to encode cache key: {0}")]
  Key(#[source] serde_json::Error),

  #[error("failed to parse {path}: {source}")]
  Metadata {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid file path '{0}' in package payload")]
  InvalidPath(String),

  #[error("store operation cancelled")]
  Cancelled,
}

impl StoreError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Directory of one registry inside the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHandle {
  key: String,
  dir: PathBuf,
}

impl RegistryHandle {
  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Scratch area owned by the registry backend (e.g. a bare git clone).
  pub fn repo_dir(&self) -> PathBuf {
    self.dir.join(REPO_DIR)
  }
}

#[derive(Debug, Clone)]
pub struct Store {
  paths: StorePaths,
  lock_timeout: Duration,
}

impl Store {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      paths: StorePaths::with_root(root.into()),
      lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
    }
  }

  /// Store rooted at `$ARM_HOME/storage`.
  pub fn open_default() -> Self {
    Self {
      paths: StorePaths::current(),
      lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
    }
  }

  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.lock_timeout = timeout;
    self
  }

  pub fn paths(&self) -> &StorePaths {
    &self.paths
  }

  pub fn root(&self) -> &Path {
    self.paths.root()
  }

  /// Open (creating if needed) the directory for a registry configuration.
  ///
  /// The directory name is the hash of the canonical configuration, so two projects with the
  /// same registry settings share one cache.
  pub fn open_registry<C: Serialize + ?Sized>(
    &self,
    cancel: &CancellationToken,
    config: &C,
  ) -> Result<RegistryHandle, StoreError> {
    let key = key_of(config).map_err(StoreError::Key)?;
    let dir = self.paths.registry_dir(&key);
    fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;

    let _lock = self.lock(cancel, &dir, "open registry")?;
    let meta_path = dir.join(METADATA_FILENAME);
    let now = Utc::now();
    let meta = match read_json::<RegistryMeta>(&meta_path)? {
      Some(mut meta) => {
        meta.last_accessed_on = now_after(meta.last_accessed_on);
        meta
      }
      None => {
        debug!(registry = %key, "creating registry cache directory");
        RegistryMeta {
          config: serde_json::to_value(config).map_err(StoreError::Key)?,
          created_on: now,
          last_updated_on: now,
          last_accessed_on: now,
        }
      }
    };
    write_json_atomic(&meta_path, &meta).map_err(StoreError::io(&meta_path))?;

    Ok(RegistryHandle { key, dir })
  }

  pub fn registry_meta(&self, registry: &RegistryHandle) -> Result<Option<RegistryMeta>, StoreError> {
    read_json(&registry.dir.join(METADATA_FILENAME))
  }

  /// Record a read of registry data.
  pub fn touch_access(&self, cancel: &CancellationToken, registry: &RegistryHandle) -> Result<(), StoreError> {
    self.touch_registry(cancel, registry, false)
  }

  /// Record a refresh of registry data from the remote.
  pub fn touch_update(&self, cancel: &CancellationToken, registry: &RegistryHandle) -> Result<(), StoreError> {
    self.touch_registry(cancel, registry, true)
  }

  fn touch_registry(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    updated: bool,
  ) -> Result<(), StoreError> {
    let _lock = self.lock(cancel, &registry.dir, "touch registry")?;
    let meta_path = registry.dir.join(METADATA_FILENAME);
    let Some(mut meta) = read_json::<RegistryMeta>(&meta_path)? else {
      return Ok(());
    };
    let now = now_after(meta.last_accessed_on);
    if updated {
      meta.last_updated_on = now;
    }
    meta.last_accessed_on = now;
    write_json_atomic(&meta_path, &meta).map_err(StoreError::io(&meta_path))
  }

  /// Write a version's files into the cache, replacing any previous copy.
  ///
  /// Files land in a `.staging-*` directory inside the package directory and are renamed into
  /// place under the package lock.
  pub fn put_version(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    request: &PackageRequest,
    version: &Version,
    files: &[PackageFile],
  ) -> Result<(), StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let pkg_dir = package_dir(&registry.dir, &package_key);
    fs::create_dir_all(&pkg_dir).map_err(StoreError::io(&pkg_dir))?;

    let _lock = self.lock(cancel, &pkg_dir, "put version")?;

    let staging = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .tempdir_in(&pkg_dir)
      .map_err(StoreError::io(&pkg_dir))?;
    let files_dir = staging.path().join(FILES_DIR);
    fs::create_dir_all(&files_dir).map_err(StoreError::io(&files_dir))?;

    for file in files {
      if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
      }
      let dest = safe_join(&files_dir, &file.path).ok_or_else(|| StoreError::InvalidPath(file.path.clone()))?;
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
      }
      fs::write(&dest, &file.content).map_err(StoreError::io(&dest))?;
    }

    let now = Utc::now();
    let version_meta = VersionMeta {
      version: version.display().to_string(),
      updated_at: now,
      last_accessed_at: now,
    };
    let staged_meta = staging.path().join(METADATA_FILENAME);
    write_json_atomic(&staged_meta, &version_meta).map_err(StoreError::io(&staged_meta))?;

    // The previous copy is moved aside rather than deleted in place, so the commit rename is the
    // only visible transition and a crash never leaves a half-deleted version directory.
    let final_dir = version_dir(&pkg_dir, version);
    let retired = if final_dir.exists() {
      let retired = pkg_dir.join(format!("{STAGING_PREFIX}retired-{}", version_dir_name(version)));
      remove_dir_if_exists(&retired)?;
      fs::rename(&final_dir, &retired).map_err(StoreError::io(&final_dir))?;
      Some(retired)
    } else {
      None
    };

    let staged = staging.keep();
    if let Err(source) = fs::rename(&staged, &final_dir) {
      let _ = fs::remove_dir_all(&staged);
      if let Some(retired) = &retired
        && let Err(e) = fs::rename(retired, &final_dir)
      {
        warn!(path = %retired.display(), error = %e, "failed to restore previous version");
      }
      return Err(StoreError::Io {
        path: final_dir,
        source,
      });
    }

    if let Some(retired) = retired
      && let Err(e) = fs::remove_dir_all(&retired)
    {
      warn!(path = %retired.display(), error = %e, "failed to remove replaced version");
    }

    let pkg_meta_path = pkg_dir.join(METADATA_FILENAME);
    let pkg_meta = PackageMeta {
      request: request.normalized(),
      updated_at: now,
    };
    write_json_atomic(&pkg_meta_path, &pkg_meta).map_err(StoreError::io(&pkg_meta_path))?;

    info!(
      package = %request.name,
      version = %version,
      files = files.len(),
      "cached package version"
    );
    Ok(())
  }

  /// Read a cached version's files, sorted by path.
  ///
  /// Bumps the version's `lastAccessedAt`; failing to persist the bump is logged and ignored.
  pub fn get_version(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Vec<PackageFile>, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let pkg_dir = package_dir(&registry.dir, &package_key);
    let not_found = || StoreError::NotFound {
      package: request.name.clone(),
      version: version.to_string(),
    };
    if !pkg_dir.is_dir() {
      return Err(not_found());
    }

    let _lock = self.lock(cancel, &pkg_dir, "get version")?;

    let dir = version_dir(&pkg_dir, version);
    let meta_path = dir.join(METADATA_FILENAME);
    let Some(mut meta) = read_json::<VersionMeta>(&meta_path)? else {
      return Err(not_found());
    };

    let files_dir = dir.join(FILES_DIR);
    let mut files = Vec::new();
    if files_dir.is_dir() {
      for entry in WalkDir::new(&files_dir).follow_links(false) {
        if cancel.is_cancelled() {
          return Err(StoreError::Cancelled);
        }
        let entry = entry.map_err(|e| StoreError::Io {
          path: files_dir.clone(),
          source: e.into(),
        })?;
        if !entry.file_type().is_file() {
          continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&files_dir) else {
          continue;
        };
        let content = fs::read(entry.path()).map_err(StoreError::io(entry.path()))?;
        // Cached paths are always `/`-separated, whatever the platform separator.
        let path = rel
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");
        files.push(PackageFile::new(path, content));
      }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    meta.last_accessed_at = now_after(meta.last_accessed_at);
    if let Err(e) = write_json_atomic(&meta_path, &meta) {
      warn!(path = %meta_path.display(), error = %e, "failed to record cache access");
    }

    debug!(package = %request.name, version = %version, files = files.len(), "cache hit");
    Ok(files)
  }

  /// Lock serialising backend fetches of one package request.
  ///
  /// Kept apart from the package lock, which [`get_version`](Self::get_version) and
  /// [`put_version`](Self::put_version) take, so it can be held across a fetch and the commit
  /// that follows it.
  pub fn lock_fetch(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    request: &PackageRequest,
  ) -> Result<FileLock, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    self.lock(cancel, &fetch_lock_target(&registry.dir, &package_key), "fetch package")
  }

  /// Semantic versions cached for a request, ascending.
  pub fn list_versions(&self, registry: &RegistryHandle, request: &PackageRequest) -> Result<Vec<Version>, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let pkg_dir = package_dir(&registry.dir, &package_key);
    let entries = match fs::read_dir(&pkg_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(StoreError::Io { path: pkg_dir, source }),
    };

    let mut versions = Vec::new();
    for entry in entries {
      let entry = entry.map_err(StoreError::io(&pkg_dir))?;
      let name = entry.file_name().to_string_lossy().to_string();
      if name.starts_with(STAGING_PREFIX) || !entry.path().is_dir() {
        continue;
      }
      if let Some(meta) = read_json::<VersionMeta>(&entry.path().join(METADATA_FILENAME))? {
        let version = parse_version(&meta.version);
        if version.is_semantic() {
          versions.push(version);
        }
      }
    }

    versions.sort_by(|a, b| {
      a.cmp_semantic(b)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.display().cmp(b.display()))
    });
    Ok(versions)
  }

  pub fn version_meta(
    &self,
    registry: &RegistryHandle,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Option<VersionMeta>, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let dir = version_dir(&package_dir(&registry.dir, &package_key), version);
    read_json(&dir.join(METADATA_FILENAME))
  }

  /// Remove one cached version. Returns whether anything was removed.
  pub fn remove_version(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<bool, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let pkg_dir = package_dir(&registry.dir, &package_key);
    if !pkg_dir.is_dir() {
      return Ok(false);
    }

    let _lock = self.lock(cancel, &pkg_dir, "remove version")?;
    let dir = version_dir(&pkg_dir, version);
    if !dir.exists() {
      return Ok(false);
    }
    fs::remove_dir_all(&dir).map_err(StoreError::io(&dir))?;
    debug!(package = %request.name, version = %version, "removed cached version");
    Ok(true)
  }

  /// Remove every cached version of a request.
  pub fn remove_package(
    &self,
    cancel: &CancellationToken,
    registry: &RegistryHandle,
    request: &PackageRequest,
  ) -> Result<bool, StoreError> {
    let package_key = request.key().map_err(StoreError::Key)?;
    let pkg_dir = package_dir(&registry.dir, &package_key);
    if !pkg_dir.is_dir() {
      return Ok(false);
    }

    let _lock = self.lock(cancel, &pkg_dir, "remove package")?;
    fs::remove_dir_all(&pkg_dir).map_err(StoreError::io(&pkg_dir))?;
    debug!(package = %request.name, "removed cached package");
    Ok(true)
  }

  /// Delete the whole cache.
  pub fn wipe(&self) -> Result<(), StoreError> {
    let root = self.paths.registries_dir();
    match fs::remove_dir_all(&root) {
      Ok(()) => {
        info!(path = %root.display(), "wiped package cache");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Io { path: root, source }),
    }
  }

  pub(crate) fn lock(&self, cancel: &CancellationToken, path: &Path, purpose: &str) -> Result<FileLock, StoreError> {
    FileLock::acquire(cancel, path, self.lock_timeout, purpose).map_err(|e| match e {
      LockError::Cancelled { .. } => StoreError::Cancelled,
      other => StoreError::Lock(other),
    })
  }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), StoreError> {
  match fs::remove_dir_all(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(StoreError::Io {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Read a JSON file, treating a missing file as `None`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(StoreError::Io {
        path: path.to_path_buf(),
        source,
      });
    }
  };
  serde_json::from_str(&content).map(Some).map_err(|source| StoreError::Metadata {
    path: path.to_path_buf(),
    source,
  })
}
