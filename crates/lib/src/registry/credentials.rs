//! Registry credentials, read from `.armrc` files.
//!
//! ```text
//! [registry https://gitlab.example.com]
//! token = ${GITLAB_TOKEN}
//! username = ci
//! ```
//!
//! The project `.armrc` is consulted before `$HOME/.armrc`; for a URL present in both, the
//! project file wins. `${VAR}` references expand from the environment (unset variables expand to
//! the empty string).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::ARMRC_FILENAME;
use crate::platform::paths::home_dir;

const SECTION_PREFIX: &str = "registry ";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub token: Option<String>,
  pub username: Option<String>,
}

impl Credentials {
  pub fn token(token: impl Into<String>) -> Self {
    Self {
      token: Some(token.into()),
      username: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.token.is_none() && self.username.is_none()
  }
}

/// Supplies credentials for a registry URL.
pub trait CredentialSource: Send + Sync {
  fn credentials_for(&self, url: &str) -> Option<Credentials>;
}

#[derive(Debug, Error)]
#[error("failed to read {path}: {source}")]
pub struct CredentialError {
  pub path: PathBuf,
  #[source]
  pub source: io::Error,
}

/// Credentials parsed from `.armrc` files.
#[derive(Debug, Clone, Default)]
pub struct ArmrcCredentials {
  sections: BTreeMap<String, Credentials>,
}

impl ArmrcCredentials {
  /// Load `./.armrc` and `$HOME/.armrc`. Missing files are skipped.
  pub fn load(project_dir: &Path) -> Result<Self, CredentialError> {
    Self::from_files(&[project_dir.join(ARMRC_FILENAME), home_dir().join(ARMRC_FILENAME)])
  }

  /// Load from files in precedence order: earlier files win.
  pub fn from_files(paths: &[PathBuf]) -> Result<Self, CredentialError> {
    let mut merged = Self::default();
    for path in paths.iter().rev() {
      let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
        Err(source) => {
          return Err(CredentialError {
            path: path.clone(),
            source,
          });
        }
      };
      debug!(path = %path.display(), "loaded credentials file");
      merged.sections.extend(Self::parse(&content).sections);
    }
    Ok(merged)
  }

  pub fn parse(content: &str) -> Self {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Credentials)> = None;

    for line in content.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        continue;
      }

      if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
        if let Some((url, creds)) = current.take() {
          sections.insert(url, creds);
        }
        current = header
          .trim()
          .strip_prefix(SECTION_PREFIX)
          .map(|url| (normalize_url(url), Credentials::default()));
        continue;
      }

      if let Some((_, creds)) = current.as_mut()
        && let Some((key, value)) = line.split_once('=')
      {
        let value = expand_env(value.trim());
        match key.trim() {
          "token" | "authToken" => creds.token = Some(value),
          "username" => creds.username = Some(value),
          _ => {}
        }
      }
    }

    if let Some((url, creds)) = current {
      sections.insert(url, creds);
    }
    Self { sections }
  }
}

impl CredentialSource for ArmrcCredentials {
  fn credentials_for(&self, url: &str) -> Option<Credentials> {
    self.sections.get(&normalize_url(url)).cloned()
  }
}

/// Fixed credentials keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
  entries: BTreeMap<String, Credentials>,
}

impl StaticCredentials {
  pub fn with(mut self, url: &str, credentials: Credentials) -> Self {
    self.entries.insert(normalize_url(url), credentials);
    self
  }
}

impl CredentialSource for StaticCredentials {
  fn credentials_for(&self, url: &str) -> Option<Credentials> {
    self.entries.get(&normalize_url(url)).cloned()
  }
}

fn normalize_url(url: &str) -> String {
  url.trim().trim_end_matches('/').to_string()
}

/// Expand `${VAR}` references from the environment.
fn expand_env(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut rest = value;
  while let Some(start) = rest.find("${") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    match after.find('}') {
      Some(end) => {
        out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
        rest = &after[end + 1..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }
  out.push_str(rest);
  out
}
