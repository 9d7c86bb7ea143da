//! Deployment of compiled files into project sink directories.
//!
//! A sink is a directory plus the tool it compiles for and a layout. Every deployment is
//! recorded in `arm/arm-index.json`; all mutations take the index's [`FileLock`] so concurrent
//! deployers against the same sink serialize.

pub mod index;
pub mod layout;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::compile::Tool;
use crate::consts::{DEFAULT_LOCK_TIMEOUT_SECS, STAGING_PREFIX};
use crate::resource::ResourceType;
use crate::store_lock::{FileLock, LockError};
use crate::types::{PackageFile, PackageId};
use crate::util::fs::{prune_empty_parents, safe_join};

pub use index::{INDEX_FILENAME, IndexEntry, SinkIndex, priority_index_name, render_priority_index};
pub use layout::{ARM_SUBDIR, Layout};

#[derive(Debug, Error)]
pub enum SinkError {
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse sink index {path}: {source}")]
  Index {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("invalid deployment path '{0}'")]
  InvalidPath(String),

  #[error("sink operation cancelled")]
  Cancelled,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
  move |source| SinkError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Sink settings as declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
  pub directory: String,
  #[serde(default)]
  pub layout: Layout,
  pub compile_target: Tool,
}

/// A resolved sink: name plus absolute directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
  pub name: String,
  pub directory: PathBuf,
  pub tool: Tool,
  pub layout: Layout,
}

impl Sink {
  /// Resolve a configured sink; relative directories are taken relative to `base`.
  pub fn from_config(name: &str, config: &SinkConfig, base: &Path) -> Self {
    let dir = Path::new(&config.directory);
    Self {
      name: name.to_string(),
      directory: if dir.is_absolute() { dir.to_path_buf() } else { base.join(dir) },
      tool: config.compile_target,
      layout: config.layout,
    }
  }
}

/// What one package deployment contributes to a sink.
#[derive(Debug, Clone)]
pub struct Deployment<'a> {
  pub id: &'a PackageId,
  /// Canonical version string used in paths and the index key.
  pub version: &'a str,
  pub resource_type: ResourceType,
  pub priority: Option<i64>,
  /// Compiled files, paths relative to the package root.
  pub files: &'a [PackageFile],
}

#[derive(Debug, Clone)]
pub struct SinkDeployer {
  sink: Sink,
  lock_timeout: Duration,
}

impl SinkDeployer {
  pub fn new(sink: Sink) -> Self {
    Self {
      sink,
      lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
    }
  }

  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.lock_timeout = timeout;
    self
  }

  pub fn sink(&self) -> &Sink {
    &self.sink
  }

  fn arm_dir(&self) -> PathBuf {
    self.sink.directory.join(ARM_SUBDIR)
  }

  pub fn index_path(&self) -> PathBuf {
    self.arm_dir().join(INDEX_FILENAME)
  }

  fn priority_index_path(&self) -> PathBuf {
    self.arm_dir().join(priority_index_name(self.sink.tool))
  }

  fn lock(&self, cancel: &CancellationToken, purpose: &str) -> Result<FileLock, SinkError> {
    FileLock::acquire(cancel, &self.index_path(), self.lock_timeout, purpose).map_err(|e| match e {
      LockError::Cancelled { .. } => SinkError::Cancelled,
      other => SinkError::Lock(other),
    })
  }

  pub fn index(&self) -> Result<SinkIndex, SinkError> {
    SinkIndex::load(&self.index_path())
  }

  /// Deploy a package version, replacing any version of the same package already present.
  ///
  /// Returns the sink-relative paths written.
  pub fn install(&self, cancel: &CancellationToken, deployment: &Deployment<'_>) -> Result<Vec<String>, SinkError> {
    let arm_dir = self.arm_dir();
    fs::create_dir_all(&arm_dir).map_err(io_err(&arm_dir))?;
    let _lock = self.lock(cancel, "deploy package")?;
    let mut index = self.index()?;

    let id = deployment.id;
    let staging = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .tempdir_in(&arm_dir)
      .map_err(io_err(&arm_dir))?;

    let mut deployed = Vec::with_capacity(deployment.files.len());
    for file in deployment.files {
      if cancel.is_cancelled() {
        return Err(SinkError::Cancelled);
      }
      let rel = self
        .sink
        .layout
        .deployed_path(&id.registry, &id.package, deployment.version, &file.path);
      let staged = safe_join(staging.path(), &rel).ok_or_else(|| SinkError::InvalidPath(rel.clone()))?;
      if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
      }
      fs::write(&staged, &file.content).map_err(io_err(&staged))?;
      deployed.push(rel);
    }
    deployed.sort();
    deployed.dedup();

    for key in index.keys_for(id) {
      if let Some(previous) = index.entries.remove(&key) {
        self.remove_files(&previous.files);
      }
    }

    for rel in &deployed {
      let staged = safe_join(staging.path(), rel).ok_or_else(|| SinkError::InvalidPath(rel.clone()))?;
      let target = safe_join(&self.sink.directory, rel).ok_or_else(|| SinkError::InvalidPath(rel.clone()))?;
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
      }
      fs::rename(&staged, &target).map_err(io_err(&target))?;
    }

    index.entries.insert(
      id.versioned_key(deployment.version),
      IndexEntry {
        resource_type: deployment.resource_type,
        priority: deployment.priority,
        files: deployed.clone(),
      },
    );
    self.write_priority_index(&index)?;
    index.save(&self.index_path())?;

    info!(
      sink = %self.sink.name,
      package = %id,
      version = deployment.version,
      files = deployed.len(),
      "deployed package"
    );
    Ok(deployed)
  }

  /// Remove every deployed file of `id` and drop its index entries. Returns whether anything was
  /// installed.
  pub fn uninstall(&self, cancel: &CancellationToken, id: &PackageId) -> Result<bool, SinkError> {
    if !self.index_path().exists() {
      return Ok(false);
    }
    let _lock = self.lock(cancel, "remove package")?;
    let mut index = self.index()?;

    let keys = index.keys_for(id);
    if keys.is_empty() {
      return Ok(false);
    }
    for key in keys {
      if let Some(entry) = index.entries.remove(&key) {
        self.remove_files(&entry.files);
      }
    }
    self.write_priority_index(&index)?;
    index.save(&self.index_path())?;

    info!(sink = %self.sink.name, package = %id, "removed package from sink");
    Ok(true)
  }

  /// Remove files under `arm/` (and flat-layout files) that the index does not reference.
  ///
  /// Returns the removed paths.
  pub fn clean(&self, cancel: &CancellationToken) -> Result<Vec<PathBuf>, SinkError> {
    let arm_dir = self.arm_dir();
    if !arm_dir.is_dir() {
      return Ok(Vec::new());
    }
    let _lock = self.lock(cancel, "clean sink")?;
    let index = self.index()?;

    let index_path = self.index_path();
    let lock_path = crate::store_lock::sentinel_path(&index_path);
    let priority_path = self.priority_index_path();
    let keep: BTreeSet<PathBuf> = [index_path, lock_path, priority_path].into_iter().collect();

    let mut candidates = Vec::new();
    for entry in WalkDir::new(&arm_dir).into_iter().filter_map(|e| e.ok()) {
      if entry.file_type().is_file() {
        candidates.push(entry.into_path());
      }
    }
    if let Ok(entries) = fs::read_dir(&self.sink.directory) {
      for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if layout::is_flat_artifact(&name) && entry.path().is_file() {
          candidates.push(entry.path());
        }
      }
    }

    let mut removed = Vec::new();
    for path in candidates {
      if cancel.is_cancelled() {
        return Err(SinkError::Cancelled);
      }
      if keep.contains(&path) {
        continue;
      }
      let Ok(rel) = path.strip_prefix(&self.sink.directory) else {
        continue;
      };
      let rel = rel.to_string_lossy().replace('\\', "/");
      if index.references(&rel) {
        continue;
      }
      match fs::remove_file(&path) {
        Ok(()) => {
          debug!(path = %path.display(), "removed unreferenced sink file");
          if let Some(parent) = path.parent() {
            prune_empty_parents(parent, &self.sink.directory);
          }
          removed.push(path);
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove sink file"),
      }
    }

    if !removed.is_empty() {
      info!(sink = %self.sink.name, removed = removed.len(), "cleaned sink");
    }
    Ok(removed)
  }

  fn remove_files(&self, files: &[String]) {
    for rel in files {
      let Some(path) = safe_join(&self.sink.directory, rel) else {
        continue;
      };
      match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
          warn!(path = %path.display(), error = %e, "failed to remove deployed file");
          continue;
        }
      }
      if let Some(parent) = path.parent() {
        prune_empty_parents(parent, &self.sink.directory);
      }
    }
  }

  fn write_priority_index(&self, index: &SinkIndex) -> Result<(), SinkError> {
    let path = self.priority_index_path();
    match render_priority_index(index) {
      Some(content) => {
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::write(&path, content).map_err(io_err(&path))
      }
      None => match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SinkError::Io { path, source }),
      },
    }
  }
}
