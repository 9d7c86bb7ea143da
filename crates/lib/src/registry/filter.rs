//! Include/exclude glob filtering of package paths.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use thiserror::Error;

use crate::types::PackageFile;
use crate::util::fs::normalize_rel_path;

#[derive(Debug, Error)]
#[error("invalid glob pattern '{pattern}': {source}")]
pub struct FilterError {
  pub pattern: String,
  #[source]
  pub source: globset::Error,
}

/// Selects a path iff (`include` is empty or it matches an include glob) and it matches no
/// exclude glob. `*` stays within one path segment; `**` crosses segments.
#[derive(Debug, Clone)]
pub struct PathFilter {
  include: Option<GlobSet>,
  exclude: Option<GlobSet>,
}

impl PathFilter {
  pub fn new(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
    Ok(Self {
      include: build_set(include)?,
      exclude: build_set(exclude)?,
    })
  }

  /// A filter that selects everything.
  pub fn all() -> Self {
    Self {
      include: None,
      exclude: None,
    }
  }

  pub fn matches(&self, path: &str) -> bool {
    let path = normalize_rel_path(path);
    let included = self.include.as_ref().is_none_or(|set| set.is_match(&path));
    let excluded = self.exclude.as_ref().is_some_and(|set| set.is_match(&path));
    included && !excluded
  }

  pub fn apply(&self, files: Vec<PackageFile>) -> Vec<PackageFile> {
    files.into_iter().filter(|f| self.matches(&f.path)).collect()
  }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>, FilterError> {
  if patterns.is_empty() {
    return Ok(None);
  }
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let normalized = pattern.trim().replace('\\', "/");
    builder.add(compile(&normalized)?);
  }
  builder.build().map(Some).map_err(|source| FilterError {
    pattern: patterns.join(", "),
    source,
  })
}

fn compile(pattern: &str) -> Result<Glob, FilterError> {
  GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map_err(|source| FilterError {
      pattern: pattern.to_string(),
      source,
    })
}
