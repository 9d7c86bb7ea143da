//! Uniform front over registry backends, backed by the shared cache.
//!
//! The adapter is the only component that reads or writes package versions in the [`Store`].
//! A fetch first consults the cache; on a miss it asks the backend, filters the result through
//! the request's include/exclude patterns, and caches the filtered files. Misses are serialised
//! per package request by the store's fetch lock, so concurrent installers fetch a version once.

pub mod archive;
pub mod backend;
pub mod cloudsmith;
pub mod config;
pub mod credentials;
pub mod filter;
pub mod git;
pub mod gitlab;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use backend::{BackendError, BackendFactory, DefaultBackendFactory, RegistryBackend};
pub use config::{CloudsmithConfig, GitConfig, GitlabConfig, RegistryConfig};
pub use credentials::{ArmrcCredentials, CredentialSource, Credentials, StaticCredentials};
pub use filter::{FilterError, PathFilter};

use crate::store::{PackageRequest, RegistryHandle, Store, StoreError};
use crate::types::PackageFile;
use crate::util::hash::Integrity;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Backend(#[from] BackendError),

  #[error(transparent)]
  Filter(#[from] FilterError),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl RegistryError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, RegistryError::Backend(e) if e.is_retryable())
  }
}

/// An opened registry: its manifest name, cache directory and backend.
#[derive(Clone)]
pub struct Registry {
  name: String,
  config: RegistryConfig,
  handle: RegistryHandle,
  backend: Arc<dyn RegistryBackend>,
}

impl Registry {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &RegistryConfig {
    &self.config
  }

  pub fn handle(&self) -> &RegistryHandle {
    &self.handle
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("name", &self.name)
      .field("config", &self.config)
      .field("handle", &self.handle)
      .finish_non_exhaustive()
  }
}

/// A resolved package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
  pub registry: String,
  pub package: String,
  pub version: Version,
  pub files: Vec<PackageFile>,
  pub integrity: Integrity,
}

#[derive(Clone)]
pub struct RegistryAdapter {
  store: Store,
  factory: Arc<dyn BackendFactory>,
}

impl RegistryAdapter {
  pub fn new(store: Store, factory: Arc<dyn BackendFactory>) -> Self {
    Self { store, factory }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub async fn open_registry(
    &self,
    cancel: &CancellationToken,
    name: &str,
    config: &RegistryConfig,
  ) -> Result<Registry, RegistryError> {
    let store = self.store.clone();
    let cancel_task = cancel.clone();
    let cfg = config.clone();
    let handle = tokio::task::spawn_blocking(move || store.open_registry(&cancel_task, &cfg)).await??;

    let backend = self.factory.create(config, handle.repo_dir())?;
    debug!(registry = name, key = %handle.key(), kind = config.kind(), "opened registry");
    Ok(Registry {
      name: name.to_string(),
      config: config.clone(),
      handle,
      backend: Arc::from(backend),
    })
  }

  /// Versions the backend advertises for a request.
  pub async fn list_versions(
    &self,
    cancel: &CancellationToken,
    registry: &Registry,
    request: &PackageRequest,
  ) -> Result<Vec<Version>, RegistryError> {
    let versions = registry.backend.list_versions(cancel, request).await?;

    let store = self.store.clone();
    let cancel_task = cancel.clone();
    let handle = registry.handle.clone();
    tokio::task::spawn_blocking(move || store.touch_update(&cancel_task, &handle)).await??;

    debug!(registry = %registry.name, package = %request.name, count = versions.len(), "listed versions");
    Ok(versions)
  }

  /// Files of one version, from the cache when present, otherwise fetched, filtered and cached.
  pub async fn get_package(
    &self,
    cancel: &CancellationToken,
    registry: &Registry,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Package, RegistryError> {
    let request = request.normalized();

    let files = match self.cached_files(cancel, registry, &request, version).await? {
      Some(files) => {
        debug!(registry = %registry.name, package = %request.name, version = %version, "cache hit");
        files
      }
      None => {
        let _fetch_lock = {
          let store = self.store.clone();
          let cancel_task = cancel.clone();
          let handle = registry.handle.clone();
          let req = request.clone();
          tokio::task::spawn_blocking(move || store.lock_fetch(&cancel_task, &handle, &req)).await??
        };

        // A concurrent installer may have committed the version while we waited.
        match self.cached_files(cancel, registry, &request, version).await? {
          Some(files) => {
            debug!(
              registry = %registry.name,
              package = %request.name,
              version = %version,
              "cache filled by concurrent fetch"
            );
            files
          }
          None => self.fetch_and_cache(cancel, registry, &request, version).await?,
        }
      }
    };

    let integrity = Integrity::compute(&files);
    Ok(Package {
      registry: registry.name.clone(),
      package: request.name.clone(),
      version: version.clone(),
      files,
      integrity,
    })
  }

  /// Cached files of a version, `None` on a cache miss.
  async fn cached_files(
    &self,
    cancel: &CancellationToken,
    registry: &Registry,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Option<Vec<PackageFile>>, RegistryError> {
    let store = self.store.clone();
    let cancel_task = cancel.clone();
    let handle = registry.handle.clone();
    let req = request.clone();
    let ver = version.clone();
    match tokio::task::spawn_blocking(move || store.get_version(&cancel_task, &handle, &req, &ver)).await? {
      Ok(files) => Ok(Some(files)),
      Err(StoreError::NotFound { .. }) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  /// Fetch from the backend, filter, and commit to the cache. Callers hold the fetch lock.
  async fn fetch_and_cache(
    &self,
    cancel: &CancellationToken,
    registry: &Registry,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Vec<PackageFile>, RegistryError> {
    debug!(registry = %registry.name, package = %request.name, version = %version, "cache miss");
    let fetched = registry.backend.fetch(cancel, request, version).await?;
    let filter = PathFilter::new(&request.include, &request.exclude)?;
    let mut files = filter.apply(fetched);
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let store = self.store.clone();
    let cancel_task = cancel.clone();
    let handle = registry.handle.clone();
    let req = request.clone();
    let ver = version.clone();
    let to_store = files.clone();
    tokio::task::spawn_blocking(move || {
      store.put_version(&cancel_task, &handle, &req, &ver, &to_store)?;
      store.touch_update(&cancel_task, &handle)
    })
    .await??;

    info!(
      registry = %registry.name,
      package = %request.name,
      version = %version,
      files = files.len(),
      "fetched package"
    );
    Ok(files)
  }
}
