//! Metadata files written at each level of the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::PackageRequest;

/// `registries/{key}/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMeta {
  pub config: serde_json::Value,
  pub created_on: DateTime<Utc>,
  pub last_updated_on: DateTime<Utc>,
  pub last_accessed_on: DateTime<Utc>,
}

/// `packages/{key}/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMeta {
  pub request: PackageRequest,
  pub updated_at: DateTime<Utc>,
}

/// `packages/{key}/v{M}.{m}.{p}/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMeta {
  /// Display string of the version as advertised by the backend.
  pub version: String,
  pub updated_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
}

/// Current time, strictly after `previous`.
///
/// Keeps access timestamps strictly increasing even when the clock has not advanced.
pub fn now_after(previous: DateTime<Utc>) -> DateTime<Utc> {
  let now = Utc::now();
  if now > previous {
    now
  } else {
    previous + chrono::Duration::nanoseconds(1)
  }
}
