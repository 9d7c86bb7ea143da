//! The capability set every registry transport implements.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::cloudsmith::CloudsmithBackend;
use super::config::RegistryConfig;
use super::credentials::{CredentialSource, Credentials};
use super::git::GitBackend;
use super::gitlab::GitlabBackend;
use crate::store::PackageRequest;
use crate::store_lock::LockError;
use crate::types::PackageFile;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum BackendError {
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("unexpected response from {url}: {message}")]
  Response { url: String, message: String },

  #[error("git operation on {url} failed: {source}")]
  Git {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("version {version} of '{package}' not found in registry")]
  NotFound { package: String, version: String },

  #[error("failed to unpack {name}: {source}")]
  Archive {
    name: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("registry operation cancelled")]
  Cancelled,
}

impl BackendError {
  /// Transport faults worth retrying: connection errors, 5xx, 429 and git transport failures.
  pub fn is_retryable(&self) -> bool {
    match self {
      BackendError::Transport { .. } | BackendError::Git { .. } => true,
      BackendError::Status { status, .. } => *status >= 500 || *status == 429,
      _ => false,
    }
  }

  pub(crate) fn git(url: &str) -> impl FnOnce(Box<dyn std::error::Error + Send + Sync>) -> BackendError + '_ {
    move |source| BackendError::Git {
      url: url.to_string(),
      source,
    }
  }
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
  /// Every version the remote advertises for the request.
  async fn list_versions(
    &self,
    cancel: &CancellationToken,
    request: &PackageRequest,
  ) -> Result<Vec<Version>, BackendError>;

  /// The unfiltered files of one version.
  async fn fetch(
    &self,
    cancel: &CancellationToken,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Vec<PackageFile>, BackendError>;

  fn apply_credentials(&mut self, credentials: Credentials);
}

/// Builds a backend for a registry configuration.
pub trait BackendFactory: Send + Sync {
  /// `repo_dir` is a scratch directory owned by the registry's cache entry.
  fn create(&self, config: &RegistryConfig, repo_dir: PathBuf) -> Result<Box<dyn RegistryBackend>, BackendError>;
}

/// Selects the concrete transport by registry type and applies credentials from `source`.
pub struct DefaultBackendFactory {
  credentials: Arc<dyn CredentialSource>,
  client: reqwest::Client,
}

impl DefaultBackendFactory {
  pub fn new(credentials: Arc<dyn CredentialSource>) -> Self {
    Self {
      credentials,
      client: reqwest::Client::new(),
    }
  }
}

impl BackendFactory for DefaultBackendFactory {
  fn create(&self, config: &RegistryConfig, repo_dir: PathBuf) -> Result<Box<dyn RegistryBackend>, BackendError> {
    let mut backend: Box<dyn RegistryBackend> = match config {
      RegistryConfig::Git(cfg) => Box::new(GitBackend::new(cfg.clone(), repo_dir)),
      RegistryConfig::Gitlab(cfg) => Box::new(GitlabBackend::new(cfg.clone(), self.client.clone())),
      RegistryConfig::Cloudsmith(cfg) => Box::new(CloudsmithBackend::new(cfg.clone(), self.client.clone())),
    };
    if let Some(credentials) = self.credentials.credentials_for(config.url()) {
      backend.apply_credentials(credentials);
    }
    Ok(backend)
  }
}

/// Send an HTTP request, giving up early if `cancel` fires, and map non-2xx statuses to errors.
pub(crate) async fn send(
  cancel: &CancellationToken,
  request: reqwest::RequestBuilder,
  url: &str,
) -> Result<reqwest::Response, BackendError> {
  let response = tokio::select! {
    _ = cancel.cancelled() => return Err(BackendError::Cancelled),
    result = request.send() => result.map_err(|source| BackendError::Transport {
      url: url.to_string(),
      source,
    })?,
  };

  let status = response.status();
  if !status.is_success() {
    return Err(BackendError::Status {
      url: url.to_string(),
      status: status.as_u16(),
    });
  }
  Ok(response)
}

pub(crate) async fn read_bytes(
  cancel: &CancellationToken,
  response: reqwest::Response,
  url: &str,
) -> Result<Vec<u8>, BackendError> {
  tokio::select! {
    _ = cancel.cancelled() => Err(BackendError::Cancelled),
    result = response.bytes() => result.map(|b| b.to_vec()).map_err(|source| BackendError::Transport {
      url: url.to_string(),
      source,
    }),
  }
}

/// Whether a remote version string names `version`, in either its display or canonical spelling.
pub(crate) fn same_version(remote: &str, version: &Version) -> bool {
  remote == version.display() || crate::version::parse_version(remote).canonical() == version.canonical()
}
