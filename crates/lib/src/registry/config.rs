use serde::{Deserialize, Serialize};

/// Registry configuration as declared in the manifest.
///
/// The serialized form (canonicalized) is hashed into the registry's cache key, so field names
/// and defaults here are part of the on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
  Git(GitConfig),
  Gitlab(GitlabConfig),
  Cloudsmith(CloudsmithConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
  pub url: String,
  /// Branch names advertised as opaque versions alongside tags.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub branches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabConfig {
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudsmithConfig {
  pub url: String,
  pub owner: String,
  pub repository: String,
}

impl RegistryConfig {
  pub fn url(&self) -> &str {
    match self {
      RegistryConfig::Git(c) => &c.url,
      RegistryConfig::Gitlab(c) => &c.url,
      RegistryConfig::Cloudsmith(c) => &c.url,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      RegistryConfig::Git(_) => "git",
      RegistryConfig::Gitlab(_) => "gitlab",
      RegistryConfig::Cloudsmith(_) => "cloudsmith",
    }
  }
}
