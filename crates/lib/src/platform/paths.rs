use std::path::PathBuf;

use crate::consts::{ARM_DIR_NAME, HOME_ENV, MANIFEST_FILENAME, MANIFEST_PATH_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  let userprofile = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
  PathBuf::from(userprofile)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
  PathBuf::from(home)
}

/// Returns the cache root, `$ARM_HOME` or `~/.arm`.
pub fn arm_dir() -> PathBuf {
  if let Ok(path) = std::env::var(HOME_ENV)
    && !path.is_empty()
  {
    return PathBuf::from(path);
  }

  home_dir().join(ARM_DIR_NAME)
}

/// Returns the shared storage directory (`<arm_dir>/storage`).
pub fn storage_dir() -> PathBuf {
  arm_dir().join("storage")
}

/// Returns the manifest path, honouring `ARM_MANIFEST_PATH`.
pub fn manifest_path() -> PathBuf {
  if let Ok(path) = std::env::var(MANIFEST_PATH_ENV)
    && !path.is_empty()
  {
    return PathBuf::from(path);
  }

  PathBuf::from(MANIFEST_FILENAME)
}
