//! Types for manifest reconciliation.
//!
//! This module defines the engine configuration, the error taxonomy surfaced to callers and
//! the reports returned by each engine operation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::compile::CompileError;
use crate::consts::DEFAULT_LOCK_TIMEOUT_SECS;
use crate::lockfile::LockfileError;
use crate::manifest::ManifestError;
use crate::registry::{BackendError, RegistryError};
use crate::resource::{ResourceError, ResourceType};
use crate::sink::SinkError;
use crate::store::StoreError;
use crate::store_lock::LockError;
use crate::types::PackageId;
use crate::util::hash::Integrity;
use crate::version::{ConstraintError, NoMatch, ParseMode, VersionKindError};

/// Bounded exponential backoff for transient registry failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff: Duration::from_millis(200),
      max_backoff: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }
}

/// Configuration for the install engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Maximum number of packages installed in parallel.
  pub parallelism: usize,

  /// Abort remaining packages after the first failure.
  pub fail_fast: bool,

  /// How long to wait for a sink lock.
  pub lock_timeout: Duration,

  pub retry: RetryPolicy,

  /// How manifest constraint strings are parsed.
  pub constraint_mode: ParseMode,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fail_fast: false,
      lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
      retry: RetryPolicy::default(),
      constraint_mode: ParseMode::Strict,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Coarse classification of an [`InstallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Parse,
  VersionKind,
  NoMatch,
  IntegrityMismatch,
  Backend,
  LockTimeout,
  Cancelled,
  NotFound,
  Fs,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorKind::Parse => "parse",
      ErrorKind::VersionKind => "version-kind",
      ErrorKind::NoMatch => "no-match",
      ErrorKind::IntegrityMismatch => "integrity-mismatch",
      ErrorKind::Backend => "backend",
      ErrorKind::LockTimeout => "lock-timeout",
      ErrorKind::Cancelled => "cancelled",
      ErrorKind::NotFound => "not-found",
      ErrorKind::Fs => "fs",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum InstallError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Lockfile(#[from] LockfileError),

  #[error("registry '{0}' is not declared in the manifest")]
  UnknownRegistry(String),

  #[error("package {0} is not in the manifest")]
  NotInstalled(PackageId),

  #[error("{package}: {source}")]
  Constraint {
    package: PackageId,
    #[source]
    source: ConstraintError,
  },

  #[error("{package}: {source}")]
  VersionKind {
    package: PackageId,
    #[source]
    source: VersionKindError,
  },

  #[error("{package}: {source}")]
  NoMatch {
    package: PackageId,
    #[source]
    source: NoMatch,
  },

  #[error("integrity mismatch for {package}@{version}: lockfile has {expected}, fetched {actual}")]
  IntegrityMismatch {
    package: PackageId,
    version: String,
    expected: Integrity,
    actual: Integrity,
  },

  #[error("{package}: {source}")]
  Registry {
    package: PackageId,
    #[source]
    source: RegistryError,
  },

  #[error("{package}: {source}")]
  Resource {
    package: PackageId,
    #[source]
    source: ResourceError,
  },

  #[error("{package}: {source}")]
  Compile {
    package: PackageId,
    #[source]
    source: CompileError,
  },

  #[error("sink '{sink}': {source}")]
  Sink {
    sink: String,
    #[source]
    source: SinkError,
  },

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("operation cancelled")]
  Cancelled,
}

impl InstallError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      InstallError::Manifest(e) => match e {
        ManifestError::Read { .. } | ManifestError::Write { .. } => ErrorKind::Fs,
        ManifestError::Parse { .. } | ManifestError::Invalid(_) | ManifestError::UnknownSink(_) => ErrorKind::Parse,
      },
      InstallError::Lockfile(e) => match e {
        LockfileError::Read { .. } | LockfileError::Write { .. } => ErrorKind::Fs,
        LockfileError::Parse { .. } | LockfileError::UnsupportedVersion(_) | LockfileError::InvalidKey(_) => {
          ErrorKind::Parse
        }
      },
      InstallError::UnknownRegistry(_) | InstallError::Constraint { .. } => ErrorKind::Parse,
      InstallError::Resource { .. } | InstallError::Compile { .. } => ErrorKind::Parse,
      InstallError::NotInstalled(_) => ErrorKind::NotFound,
      InstallError::VersionKind { .. } => ErrorKind::VersionKind,
      InstallError::NoMatch { .. } => ErrorKind::NoMatch,
      InstallError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
      InstallError::Registry { source, .. } => registry_kind(source),
      InstallError::Sink { source, .. } => match source {
        SinkError::Index { .. } => ErrorKind::Parse,
        SinkError::Lock(lock) => lock_kind(lock),
        SinkError::Cancelled => ErrorKind::Cancelled,
        SinkError::Io { .. } | SinkError::InvalidPath(_) => ErrorKind::Fs,
      },
      InstallError::Join(_) => ErrorKind::Fs,
      InstallError::Cancelled => ErrorKind::Cancelled,
    }
  }

  /// Process exit code: `2` for malformed input, `1` otherwise.
  pub fn exit_code(&self) -> i32 {
    match self.kind() {
      ErrorKind::Parse => 2,
      _ => 1,
    }
  }
}

fn lock_kind(error: &LockError) -> ErrorKind {
  match error {
    LockError::Timeout { .. } => ErrorKind::LockTimeout,
    LockError::Cancelled { .. } => ErrorKind::Cancelled,
    LockError::Io { .. } => ErrorKind::Fs,
  }
}

fn registry_kind(error: &RegistryError) -> ErrorKind {
  match error {
    RegistryError::Store(e) => match e {
      StoreError::NotFound { .. } => ErrorKind::NotFound,
      StoreError::Lock(lock) => lock_kind(lock),
      StoreError::Cancelled => ErrorKind::Cancelled,
      StoreError::Io { .. } | StoreError::Key(_) | StoreError::Metadata { .. } | StoreError::InvalidPath(_) => {
        ErrorKind::Fs
      }
    },
    RegistryError::Backend(e) => match e {
      BackendError::NotFound { .. } => ErrorKind::NotFound,
      BackendError::Lock(lock) => lock_kind(lock),
      BackendError::Cancelled => ErrorKind::Cancelled,
      _ => ErrorKind::Backend,
    },
    RegistryError::Filter(_) => ErrorKind::Parse,
    RegistryError::Join(_) => ErrorKind::Fs,
  }
}

/// A package that was resolved and deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
  pub id: PackageId,
  /// Canonical resolved version.
  pub version: String,
  pub integrity: Integrity,
  /// Whether the version came from an existing lockfile pin.
  pub pinned: bool,
  /// Sinks written, with the number of files deployed to each.
  pub sinks: Vec<(String, usize)>,
}

#[derive(Debug)]
pub struct PackageFailure {
  pub id: PackageId,
  pub error: InstallError,
}

/// Outcome of a reconciliation run.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub installed: Vec<InstalledPackage>,
  pub failed: Vec<PackageFailure>,
  /// Packages not attempted because a failure aborted the run.
  pub skipped: Vec<PackageId>,
  /// Lockfile keys dropped because they are no longer wanted.
  pub pruned: Vec<String>,
}

impl InstallReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  pub fn total(&self) -> usize {
    self.installed.len() + self.failed.len() + self.skipped.len()
  }

  /// Highest exit code among the failures, `0` when everything succeeded.
  pub fn exit_code(&self) -> i32 {
    let failed = self.failed.iter().map(|f| f.error.exit_code()).max().unwrap_or(0);
    if failed == 0 && !self.skipped.is_empty() { 1 } else { failed }
  }

  pub fn installed(&self, id: &PackageId) -> Option<&InstalledPackage> {
    self.installed.iter().find(|p| &p.id == id)
  }
}

/// A manifest entry with its locked state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPackage {
  pub id: PackageId,
  pub resource_type: ResourceType,
  pub constraint: String,
  pub version: Option<String>,
  pub integrity: Option<Integrity>,
  pub sinks: Vec<String>,
}

/// A package whose locked version is behind what its registry offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedPackage {
  pub id: PackageId,
  pub constraint: String,
  pub current: Option<String>,
  /// Best version admitted by the declared constraint.
  pub wanted: String,
  /// Best version overall.
  pub latest: String,
}

/// Files removed from one sink by a clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedSink {
  pub sink: String,
  pub removed: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
  use super::*;

  mod config {
    use super::*;

    #[test]
    fn engine_config_defaults() {
      let config = EngineConfig::default();
      assert!(config.parallelism >= 1);
      assert!(!config.fail_fast);
      assert_eq!(config.lock_timeout, Duration::from_secs(30));
      assert_eq!(config.retry.max_attempts, 3);
      assert_eq!(config.constraint_mode, ParseMode::Strict);
    }

    #[test]
    fn retry_none_is_single_attempt() {
      assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
  }

  mod errors {
    use super::*;

    fn id() -> PackageId {
      PackageId::new("reg", "a")
    }

    #[test]
    fn parse_errors_exit_with_two() {
      let err = InstallError::Constraint {
        package: id(),
        source: ConstraintError::Invalid("nope".into()),
      };
      assert_eq!(err.kind(), ErrorKind::Parse);
      assert_eq!(err.exit_code(), 2);

      let err = InstallError::Manifest(ManifestError::Invalid("bad".into()));
      assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn runtime_errors_exit_with_one() {
      let err = InstallError::IntegrityMismatch {
        package: id(),
        version: "1.0.0".into(),
        expected: Integrity::from_string("sha256-aa"),
        actual: Integrity::from_string("sha256-bb"),
      };
      assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
      assert_eq!(err.exit_code(), 1);

      let err = InstallError::NoMatch {
        package: id(),
        source: NoMatch {
          constraint: "^1.0.0".into(),
          candidates: 0,
        },
      };
      assert_eq!(err.kind(), ErrorKind::NoMatch);
      assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn registry_errors_are_classified() {
      let backend = |e| InstallError::Registry {
        package: id(),
        source: RegistryError::Backend(e),
      };
      assert_eq!(
        backend(BackendError::Status {
          url: "u".into(),
          status: 503
        })
        .kind(),
        ErrorKind::Backend
      );
      assert_eq!(backend(BackendError::Cancelled).kind(), ErrorKind::Cancelled);

      let store = InstallError::Registry {
        package: id(),
        source: RegistryError::Store(StoreError::Lock(LockError::Timeout {
          lock_path: PathBuf::from("x.lock"),
          waited: Duration::from_secs(1),
          holder: None,
        })),
      };
      assert_eq!(store.kind(), ErrorKind::LockTimeout);
    }

    #[test]
    fn error_kind_display() {
      assert_eq!(ErrorKind::IntegrityMismatch.to_string(), "integrity-mismatch");
      assert_eq!(ErrorKind::NoMatch.to_string(), "no-match");
    }
  }

  mod report {
    use super::*;

    #[test]
    fn empty_report_succeeds() {
      let report = InstallReport::default();
      assert!(report.is_success());
      assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn exit_code_is_worst_failure() {
      let report = InstallReport {
        failed: vec![
          PackageFailure {
            id: PackageId::new("reg", "a"),
            error: InstallError::Cancelled,
          },
          PackageFailure {
            id: PackageId::new("reg", "b"),
            error: InstallError::UnknownRegistry("x".into()),
          },
        ],
        ..Default::default()
      };
      assert!(!report.is_success());
      assert_eq!(report.exit_code(), 2);
      assert_eq!(report.total(), 2);
    }

    #[test]
    fn skipped_packages_fail_the_run() {
      let report = InstallReport {
        skipped: vec![PackageId::new("reg", "a")],
        ..Default::default()
      };
      assert_eq!(report.exit_code(), 1);
    }
  }
}
