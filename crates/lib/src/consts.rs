//! Constants shared across the crate.

/// Application name, used for directory naming.
pub const APP_NAME: &str = "arm";

/// Directory (under the user's home) holding the shared cache.
pub const ARM_DIR_NAME: &str = ".arm";

/// Default manifest file name.
pub const MANIFEST_FILENAME: &str = "arm.json";

/// Default lockfile file name, stored beside the manifest.
pub const LOCKFILE_FILENAME: &str = "arm-lock.json";

/// Credential file name, looked up in the project directory and the user's home.
pub const ARMRC_FILENAME: &str = ".armrc";

/// Environment variable overriding the manifest path.
pub const MANIFEST_PATH_ENV: &str = "ARM_MANIFEST_PATH";

/// Environment variable overriding the cache root (`$HOME/.arm`).
pub const HOME_ENV: &str = "ARM_HOME";

/// Name of the metadata file written into registry, package and version directories.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Prefix of scratch directories created next to their final destination.
pub const STAGING_PREFIX: &str = ".staging-";

/// Default timeout for acquiring a cross-process lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;
