//! Cross-process advisory locks on `{path}.lock` sentinel files.
//!
//! A lock is held by creating the sentinel exclusively and writing the holder's metadata
//! (PID, start time, purpose) into it. Dropping the guard removes the sentinel, so an
//! unlocked path never has a `.lock` sibling.
//!
//! Acquisition polls with exponential backoff (10 ms doubling up to 500 ms) until the
//! deadline, returning early on cancellation. A sentinel whose holder process is gone is
//! reclaimed once it is older than [`STALE_GRACE`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::platform::process_alive;

const LOCK_SUFFIX: &str = "lock";
const RECLAIM_SUFFIX: &str = "reclaim";
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Minimum age of a sentinel before a dead holder's lock may be reclaimed.
pub const STALE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub purpose: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("timed out after {waited:?} waiting for lock {lock_path}{}", holder_suffix(.holder))]
  Timeout {
    lock_path: PathBuf,
    waited: Duration,
    holder: Option<LockMetadata>,
  },

  #[error("cancelled while waiting for lock {lock_path}")]
  Cancelled { lock_path: PathBuf },

  #[error("failed to create lock {lock_path}: {source}")]
  Io {
    lock_path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn holder_suffix(holder: &Option<LockMetadata>) -> String {
  match holder {
    Some(meta) => format!(" (held by PID {} for '{}')", meta.pid, meta.purpose),
    None => String::new(),
  }
}

/// Sentinel path guarding `path`: a sibling named `{file_name}.lock`.
pub fn sentinel_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".");
  name.push(LOCK_SUFFIX);
  path.with_file_name(name)
}

/// A held lock. Released (and the sentinel removed) on drop.
#[derive(Debug)]
pub struct FileLock {
  lock_path: PathBuf,
  metadata: LockMetadata,
}

impl FileLock {
  /// Acquire an exclusive lock on `path`, waiting up to `timeout`.
  pub fn acquire(
    cancel: &CancellationToken,
    path: &Path,
    timeout: Duration,
    purpose: &str,
  ) -> Result<Self, LockError> {
    let lock_path = sentinel_path(path);
    let deadline = Instant::now() + timeout;
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;

    if let Some(parent) = lock_path.parent() {
      fs::create_dir_all(parent).map_err(|source| LockError::Io {
        lock_path: lock_path.clone(),
        source,
      })?;
    }

    loop {
      if cancel.is_cancelled() {
        return Err(LockError::Cancelled { lock_path });
      }

      match Self::try_create(&lock_path, purpose) {
        Ok(metadata) => {
          trace!(lock = %lock_path.display(), "acquired lock");
          return Ok(FileLock { lock_path, metadata });
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
          if Self::reclaim_if_stale(&lock_path) {
            continue;
          }
        }
        Err(source) => return Err(LockError::Io { lock_path, source }),
      }

      let now = Instant::now();
      if now >= deadline {
        return Err(LockError::Timeout {
          holder: read_metadata(&lock_path),
          lock_path,
          waited: started.elapsed(),
        });
      }

      let sleep = backoff.min(deadline - now);
      debug!(lock = %lock_path.display(), ?sleep, "lock busy, backing off");
      std::thread::sleep(sleep);
      backoff = (backoff * 2).min(MAX_BACKOFF);
    }
  }

  fn try_create(lock_path: &Path, purpose: &str) -> io::Result<LockMetadata> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(lock_path)?;

    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      purpose: purpose.to_string(),
    };

    let written = serde_json::to_vec(&metadata)
      .map_err(io::Error::other)
      .and_then(|bytes| file.write_all(&bytes))
      .and_then(|()| file.flush());
    if let Err(err) = written {
      let _ = fs::remove_file(lock_path);
      return Err(err);
    }

    Ok(metadata)
  }

  /// Remove the sentinel if its holder is dead and the grace period has passed.
  ///
  /// The check and the removal run under a `{sentinel}.reclaim` guard and the check is repeated
  /// once the guard is held. A waiter that judged the old sentinel stale therefore cannot delete
  /// the fresh sentinel another waiter created after reclaiming it.
  fn reclaim_if_stale(lock_path: &Path) -> bool {
    let Some(age) = Self::stale_age(lock_path) else {
      return false;
    };

    let Some(_guard) = ReclaimGuard::acquire(lock_path) else {
      return false;
    };
    if Self::stale_age(lock_path).is_none() {
      return false;
    }

    warn!(lock = %lock_path.display(), ?age, "reclaiming stale lock");
    match fs::remove_file(lock_path) {
      Ok(()) => true,
      Err(err) if err.kind() == io::ErrorKind::NotFound => true,
      Err(_) => false,
    }
  }

  /// Age of the sentinel if it is past the grace period and its holder is gone.
  fn stale_age(lock_path: &Path) -> Option<Duration> {
    let age = file_age(lock_path)?;
    if age < STALE_GRACE {
      return None;
    }

    // Unreadable metadata after the grace period means the holder died mid-write.
    let holder_alive = read_metadata(lock_path).is_some_and(|meta| process_alive(meta.pid));
    if holder_alive { None } else { Some(age) }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn metadata(&self) -> &LockMetadata {
    &self.metadata
  }
}

impl Drop for FileLock {
  fn drop(&mut self) {
    if let Err(err) = fs::remove_file(&self.lock_path)
      && err.kind() != io::ErrorKind::NotFound
    {
      warn!(lock = %self.lock_path.display(), error = %err, "failed to remove lock sentinel");
    }
  }
}

/// Exclusive right to reclaim one sentinel, held for the duration of the re-check and removal.
struct ReclaimGuard {
  path: PathBuf,
}

impl ReclaimGuard {
  fn acquire(lock_path: &Path) -> Option<Self> {
    let mut name = lock_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(RECLAIM_SUFFIX);
    let path = lock_path.with_file_name(name);

    match OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(_) => Some(ReclaimGuard { path }),
      Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
        // A guard is only held for a few syscalls; an old one belongs to a crashed reclaimer.
        if file_age(&path).is_some_and(|age| age >= STALE_GRACE) {
          debug!(guard = %path.display(), "removing abandoned reclaim guard");
          let _ = fs::remove_file(&path);
        }
        None
      }
      Err(_) => None,
    }
  }
}

impl Drop for ReclaimGuard {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.path);
  }
}

fn file_age(path: &Path) -> Option<Duration> {
  let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
  SystemTime::now().duration_since(modified).ok()
}

/// Read the holder metadata of a sentinel, if it exists and parses.
pub fn read_metadata(lock_path: &Path) -> Option<LockMetadata> {
  let mut contents = String::new();
  File::open(lock_path).ok()?.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}
