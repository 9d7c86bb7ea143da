//! Where deployed files land inside a sink directory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::fs::normalize_rel_path;

/// Directory (relative to the sink) holding hierarchical deployments and the index.
pub const ARM_SUBDIR: &str = "arm";
const FLAT_PREFIX: &str = "arm_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
  /// `arm/{registry}/{package}/{version}/{relPath}`
  #[default]
  Hierarchical,
  /// `arm_{hash8}_{basename}` directly in the sink directory.
  Flat,
}

impl Layout {
  /// Sink-relative path (forward slashes) of a deployed file.
  pub fn deployed_path(self, registry: &str, package: &str, version: &str, rel_path: &str) -> String {
    let rel = normalize_rel_path(rel_path);
    match self {
      Layout::Hierarchical => format!("{ARM_SUBDIR}/{registry}/{package}/{version}/{rel}"),
      Layout::Flat => {
        let basename = rel.rsplit('/').next().unwrap_or(&rel);
        format!("{FLAT_PREFIX}{}_{basename}", flat_hash(registry, package, version, &rel))
      }
    }
  }
}

/// Low 32 bits (last four bytes) of SHA-256 over the NUL-separated inputs, as 8 hex digits.
pub fn flat_hash(registry: &str, package: &str, version: &str, rel_path: &str) -> String {
  let mut hasher = Sha256::new();
  for (i, part) in [registry, package, version, rel_path].iter().enumerate() {
    if i > 0 {
      hasher.update([0u8]);
    }
    hasher.update(part.as_bytes());
  }
  let digest = hasher.finalize();
  hex::encode(&digest[digest.len() - 4..])
}

/// Whether a top-level sink file name looks like a flat-layout deployment.
pub fn is_flat_artifact(name: &str) -> bool {
  let Some(rest) = name.strip_prefix(FLAT_PREFIX) else {
    return false;
  };
  let bytes = rest.as_bytes();
  bytes.len() > 9 && bytes[8] == b'_' && bytes[..8].iter().all(|b| b.is_ascii_hexdigit())
}
