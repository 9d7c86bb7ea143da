//! GitLab generic-packages registry.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::archive::expand;
use super::backend::{BackendError, RegistryBackend, read_bytes, same_version, send};
use super::config::GitlabConfig;
use super::credentials::Credentials;
use crate::store::PackageRequest;
use crate::types::PackageFile;
use crate::version::{Version, parse_version};

const DEFAULT_API_VERSION: &str = "v4";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct GitlabPackage {
  id: u64,
  name: String,
  version: String,
  #[serde(default)]
  project_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GitlabPackageFile {
  file_name: String,
}

pub struct GitlabBackend {
  config: GitlabConfig,
  client: reqwest::Client,
  token: Option<String>,
}

impl GitlabBackend {
  pub fn new(config: GitlabConfig, client: reqwest::Client) -> Self {
    Self {
      config,
      client,
      token: None,
    }
  }

  fn api_base(&self) -> String {
    format!(
      "{}/api/{}",
      self.config.url.trim_end_matches('/'),
      self.config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
    )
  }

  fn scope(&self) -> Result<String, BackendError> {
    match (&self.config.project_id, &self.config.group_id) {
      (Some(project), _) => Ok(format!("projects/{project}")),
      (None, Some(group)) => Ok(format!("groups/{group}")),
      (None, None) => Err(BackendError::Response {
        url: self.config.url.clone(),
        message: "gitlab registry needs a projectId or groupId".to_string(),
      }),
    }
  }

  fn get(&self, url: &str) -> reqwest::RequestBuilder {
    let request = self.client.get(url);
    match &self.token {
      Some(token) => request.header("PRIVATE-TOKEN", token),
      None => request,
    }
  }

  async fn get_json<T: for<'de> Deserialize<'de>>(
    &self,
    cancel: &CancellationToken,
    request: reqwest::RequestBuilder,
    url: &str,
  ) -> Result<(T, Option<u32>), BackendError> {
    let response = send(cancel, request, url).await?;
    let next_page = response
      .headers()
      .get("x-next-page")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse::<u32>().ok());
    let body = read_bytes(cancel, response, url).await?;
    let parsed = serde_json::from_slice(&body).map_err(|e| BackendError::Response {
      url: url.to_string(),
      message: e.to_string(),
    })?;
    Ok((parsed, next_page))
  }

  /// All generic packages named exactly `name`, following pagination.
  async fn packages(&self, cancel: &CancellationToken, name: &str) -> Result<Vec<GitlabPackage>, BackendError> {
    let url = format!("{}/{}/packages", self.api_base(), self.scope()?);
    let mut all = Vec::new();
    let mut page = 1u32;

    loop {
      let page_str = page.to_string();
      let request = self.get(&url).query(&[
        ("package_name", name),
        ("package_type", "generic"),
        ("per_page", PER_PAGE),
        ("page", page_str.as_str()),
      ]);
      let (batch, next): (Vec<GitlabPackage>, _) = self.get_json(cancel, request, &url).await?;
      all.extend(batch.into_iter().filter(|p| p.name == name));
      match next {
        Some(next) if next > page => page = next,
        _ => break,
      }
    }

    debug!(package = name, count = all.len(), "listed gitlab packages");
    Ok(all)
  }
}

#[async_trait]
impl RegistryBackend for GitlabBackend {
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
    let not_found = || BackendError::NotFound {
      package: request.name.clone(),
      version: version.to_string(),
    };
    let packages = self.packages(cancel, &request.name).await?;
    let package = packages
      .iter()
      .find(|p| same_version(&p.version, version))
      .ok_or_else(not_found)?;
    let project = self
      .config
      .project_id
      .clone()
      .or_else(|| package.project_id.map(|id| id.to_string()))
      .ok_or_else(not_found)?;

    let base = self.api_base();
    let files_url = format!("{base}/projects/{project}/packages/{}/package_files", package.id);
    let request_files = self.get(&files_url).query(&[("per_page", PER_PAGE)]);
    let (listing, _): (Vec<GitlabPackageFile>, _) = self.get_json(cancel, request_files, &files_url).await?;

    // Re-uploads repeat a file name.
    let names: BTreeSet<String> = listing.into_iter().map(|f| f.file_name).collect();

    let mut files = Vec::new();
    for name in &names {
      let url = format!(
        "{base}/projects/{project}/packages/generic/{}/{}/{}",
        request.name, package.version, name
      );
      let response = send(cancel, self.get(&url), &url).await?;
      let bytes = read_bytes(cancel, response, &url).await?;
      files.extend(expand(name, bytes).map_err(|source| BackendError::Archive {
        name: name.clone(),
        source,
      })?);
    }

    debug!(package = %request.name, version = %version, files = files.len(), "downloaded gitlab package");
    Ok(files)
  }

  fn apply_credentials(&mut self, credentials: Credentials) {
    self.token = credentials.token;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  use crate::registry::archive::build_tar_gz;

  fn backend(url: &str) -> GitlabBackend {
    let mut backend = GitlabBackend::new(
      GitlabConfig {
        url: url.to_string(),
        project_id: Some("42".to_string()),
        group_id: None,
        api_version: None,
      },
      reqwest::Client::new(),
    );
    backend.apply_credentials(Credentials::token("secret"));
    backend
  }

  #[tokio::test]
  async fn lists_versions_across_pages() {
    let mut server = mockito::Server::new_async().await;
    let page1 = server
      .mock("GET", "/api/v4/projects/42/packages")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("package_name".into(), "rules".into()),
        Matcher::UrlEncoded("page".into(), "1".into()),
      ]))
      .match_header("PRIVATE-TOKEN", "secret")
      .with_header("x-next-page", "2")
      .with_body(r#"[{"id":1,"name":"rules","version":"1.0.0"},{"id":9,"name":"rules-extra","version":"9.0.0"}]"#)
      .create_async()
      .await;
    let page2 = server
      .mock("GET", "/api/v4/projects/42/packages")
      .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
      .with_header("x-next-page", "")
      .with_body(r#"[{"id":2,"name":"rules","version":"1.1.0"}]"#)
      .create_async()
      .await;

    let versions = backend(&server.url())
      .list_versions(&CancellationToken::new(), &PackageRequest::new("rules"))
      .await
      .unwrap();

    let displays: Vec<&str> = versions.iter().map(|v| v.display()).collect();
    assert_eq!(displays, vec!["1.0.0", "1.1.0"]);
    page1.assert_async().await;
    page2.assert_async().await;
  }

  #[tokio::test]
  async fn fetch_downloads_and_extracts_archives() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/v4/projects/42/packages")
      .match_query(Matcher::Any)
      .with_body(r#"[{"id":7,"name":"rules","version":"1.0.0"}]"#)
      .create_async()
      .await;
    server
      .mock("GET", "/api/v4/projects/42/packages/7/package_files")
      .match_query(Matcher::Any)
      .with_body(r#"[{"file_name":"bundle.tar.gz"},{"file_name":"extra.md"}]"#)
      .create_async()
      .await;
    server
      .mock("GET", "/api/v4/projects/42/packages/generic/rules/1.0.0/bundle.tar.gz")
      .with_body(build_tar_gz(&[("rules/a.yml", "a")]))
      .create_async()
      .await;
    server
      .mock("GET", "/api/v4/projects/42/packages/generic/rules/1.0.0/extra.md")
      .with_body("extra")
      .create_async()
      .await;

    let mut files = backend(&server.url())
      .fetch(&CancellationToken::new(), &PackageRequest::new("rules"), &parse_version("v1.0.0"))
      .await
      .unwrap();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    assert_eq!(
      files,
      vec![PackageFile::new("extra.md", "extra"), PackageFile::new("rules/a.yml", "a")]
    );
  }

  #[tokio::test]
  async fn missing_version_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/v4/projects/42/packages")
      .match_query(Matcher::Any)
      .with_body("[]")
      .create_async()
      .await;

    let err = backend(&server.url())
      .fetch(&CancellationToken::new(), &PackageRequest::new("rules"), &parse_version("1.0.0"))
      .await
      .unwrap_err();
    assert!(matches!(err, BackendError::NotFound { .. }));
  }

  #[tokio::test]
  async fn server_errors_are_retryable() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/v4/projects/42/packages")
      .match_query(Matcher::Any)
      .with_status(502)
      .create_async()
      .await;

    let err = backend(&server.url())
      .list_versions(&CancellationToken::new(), &PackageRequest::new("rules"))
      .await
      .unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 502, .. }));
    assert!(err.is_retryable());
  }

  #[test]
  fn scope_requires_an_id() {
    let backend = GitlabBackend::new(
      GitlabConfig {
        url: "https://gitlab.example.com".to_string(),
        project_id: None,
        group_id: None,
        api_version: None,
      },
      reqwest::Client::new(),
    );
    assert!(backend.scope().is_err());
  }
}
