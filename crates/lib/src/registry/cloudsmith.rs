//! Cloudsmith registry.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::archive::expand;
use super::backend::{BackendError, RegistryBackend, read_bytes, same_version, send};
use super::config::CloudsmithConfig;
use super::credentials::Credentials;
use crate::store::PackageRequest;
use crate::types::PackageFile;
use crate::version::{Version, parse_version};

const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct CloudsmithPackage {
  name: String,
  version: String,
  #[serde(default)]
  filename: String,
  #[serde(default)]
  cdn_url: Option<String>,
}

pub struct CloudsmithBackend {
  config: CloudsmithConfig,
  client: reqwest::Client,
  api_key: Option<String>,
}

impl CloudsmithBackend {
  pub fn new(config: CloudsmithConfig, client: reqwest::Client) -> Self {
    Self {
      config,
      client,
      api_key: None,
    }
  }

  fn get(&self, url: &str) -> reqwest::RequestBuilder {
    let request = self.client.get(url);
    match &self.api_key {
      Some(key) => request.header("X-Api-Key", key),
      None => request,
    }
  }

  async fn packages(&self, cancel: &CancellationToken, name: &str) -> Result<Vec<CloudsmithPackage>, BackendError> {
    let url = format!(
      "{}/v1/packages/{}/{}/",
      self.config.url.trim_end_matches('/'),
      self.config.owner,
      self.config.repository
    );
    let query = format!("name:{name}");
    let mut all = Vec::new();
    let mut page = 1u32;

    loop {
      let page_str = page.to_string();
      let request = self
        .get(&url)
        .query(&[("query", query.as_str()), ("page", page_str.as_str()), ("page_size", PAGE_SIZE)]);
      let response = send(cancel, request, &url).await?;
      let total_pages = response
        .headers()
        .get("x-pagination-pagetotal")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(1);
      let body = read_bytes(cancel, response, &url).await?;
      let batch: Vec<CloudsmithPackage> = serde_json::from_slice(&body).map_err(|e| BackendError::Response {
        url: url.clone(),
        message: e.to_string(),
      })?;
      // The query is a substring search; keep exact names only.
      all.extend(batch.into_iter().filter(|p| p.name == name));
      if page >= total_pages {
        break;
      }
      page += 1;
    }

    debug!(package = name, count = all.len(), "listed cloudsmith packages");
    Ok(all)
  }
}

#[async_trait]
impl RegistryBackend for CloudsmithBackend {
  async fn list_versions(
    &self,
    cancel: &CancellationToken,
    request: &PackageRequest,
  ) -> Result<Vec<Version>, BackendError> {
    let mut versions: Vec<Version> = self
      .packages(cancel, &request.name)
      .await?
      .iter()
      .map(|p| parse_version(&p.version))
      .collect();
    versions.sort_by(|a, b| a.display().cmp(b.display()));
    versions.dedup();
    Ok(versions)
  }

  async fn fetch(
    &self,
    cancel: &CancellationToken,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Vec<PackageFile>, BackendError> {
    let packages = self.packages(cancel, &request.name).await?;
    let matching: Vec<&CloudsmithPackage> = packages
      .iter()
      .filter(|p| same_version(&p.version, version) && p.cdn_url.is_some())
      .collect();
    if matching.is_empty() {
      return Err(BackendError::NotFound {
        package: request.name.clone(),
        version: version.to_string(),
      });
    }

    let mut files = Vec::new();
    for package in matching {
      let Some(url) = package.cdn_url.as_deref() else {
        continue;
      };
      let response = send(cancel, self.get(url), url).await?;
      let bytes = read_bytes(cancel, response, url).await?;
      let name = if package.filename.is_empty() {
        url.rsplit('/').next().unwrap_or(url)
      } else {
        package.filename.as_str()
      };
      files.extend(expand(name, bytes).map_err(|source| BackendError::Archive {
        name: name.to_string(),
        source,
      })?);
    }

    debug!(package = %request.name, version = %version, files = files.len(), "downloaded cloudsmith package");
    Ok(files)
  }

  fn apply_credentials(&mut self, credentials: Credentials) {
    self.api_key = credentials.token;
  }
}
