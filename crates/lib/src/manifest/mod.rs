//! The project manifest and its file-backed stores.

mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use types::*;

use crate::consts::LOCKFILE_FILENAME;
use crate::platform::paths::manifest_path;
use crate::sink::{Sink, SinkConfig};
use crate::util::fs::write_json_atomic;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write manifest {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid manifest: {0}")]
  Invalid(String),

  #[error("sink '{0}' is not declared in the manifest")]
  UnknownSink(String),
}

/// Loads and persists the manifest.
pub trait ManifestStore: Send + Sync {
  fn load(&self) -> Result<Manifest, ManifestError>;
  fn save(&self, manifest: &Manifest) -> Result<(), ManifestError>;
}

/// Resolves sink names to concrete sinks.
pub trait SinkConfigStore: Send + Sync {
  fn resolve(&self, name: &str) -> Result<Sink, ManifestError>;
}

/// `arm.json` on disk.
#[derive(Debug, Clone)]
pub struct JsonManifestStore {
  path: PathBuf,
}

impl JsonManifestStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Manifest at `$ARM_MANIFEST_PATH`, or `./arm.json`.
  pub fn from_env() -> Self {
    Self::new(manifest_path())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Directory containing the manifest; relative sink paths resolve against it.
  pub fn base_dir(&self) -> PathBuf {
    match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    }
  }

  /// The lockfile lives beside the manifest.
  pub fn lockfile_path(&self) -> PathBuf {
    self.base_dir().join(LOCKFILE_FILENAME)
  }
}

impl ManifestStore for JsonManifestStore {
  /// A missing manifest loads as an empty one.
  fn load(&self) -> Result<Manifest, ManifestError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "no manifest, starting empty");
        return Ok(Manifest::default());
      }
      Err(source) => {
        return Err(ManifestError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };

    let manifest: Manifest = serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
      path: self.path.clone(),
      source,
    })?;
    manifest.validate().map_err(ManifestError::Invalid)?;
    Ok(manifest)
  }

  fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
    write_json_atomic(&self.path, manifest).map_err(|source| ManifestError::Write {
      path: self.path.clone(),
      source,
    })
  }
}

/// Sinks declared in a manifest, with relative directories anchored at `base`.
#[derive(Debug, Clone)]
pub struct ManifestSinks {
  sinks: std::collections::BTreeMap<String, SinkConfig>,
  base: PathBuf,
}

impl ManifestSinks {
  pub fn new(manifest: &Manifest, base: impl Into<PathBuf>) -> Self {
    Self {
      sinks: manifest.sinks.clone(),
      base: base.into(),
    }
  }
}

impl SinkConfigStore for ManifestSinks {
  fn resolve(&self, name: &str) -> Result<Sink, ManifestError> {
    self
      .sinks
      .get(name)
      .map(|config| Sink::from_config(name, config, &self.base))
      .ok_or_else(|| ManifestError::UnknownSink(name.to_string()))
  }
}
