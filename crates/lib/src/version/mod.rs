//! Version parsing and ordering.
//!
//! A [`Version`] is either *semantic* (a full `major.minor.patch` triple with optional
//! prerelease and build metadata) or *opaque* (branch names, commit ids, abbreviated
//! versions such as `1.2`, or `latest`). Semantic-ness is fixed at parse time.
//!
//! Semantic versions are totally ordered by `(major, minor, patch)`; prerelease and build
//! metadata do not participate in ordering. Opaque versions have no order.
//!
//! # Modules
//!
//! - [`constraint`] - Constraint parsing, matching and best-match selection

pub mod constraint;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use constraint::{
  Constraint, ConstraintError, NoMatch, ParseMode, VersionKindError, admits, best_match, parse_constraint,
};

/// Parsed components of a semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
  pub prerelease: Option<String>,
  pub build: Option<String>,
}

impl SemanticVersion {
  pub fn triple(&self) -> (u64, u64, u64) {
    (self.major, self.minor, self.patch)
  }

  /// Canonical string without a `v` prefix, e.g. `1.2.3-beta.1+build.5`.
  pub fn canonical(&self) -> String {
    let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
    if let Some(pre) = &self.prerelease {
      out.push('-');
      out.push_str(pre);
    }
    if let Some(build) = &self.build {
      out.push('+');
      out.push_str(build);
    }
    out
  }
}

impl From<semver::Version> for SemanticVersion {
  fn from(v: semver::Version) -> Self {
    Self {
      major: v.major,
      minor: v.minor,
      patch: v.patch,
      prerelease: (!v.pre.is_empty()).then(|| v.pre.to_string()),
      build: (!v.build.is_empty()).then(|| v.build.to_string()),
    }
  }
}

/// A version as advertised by a registry, keeping its original display string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
  display: String,
  semantic: Option<SemanticVersion>,
}

/// Parse a version string. Never fails: non-semver input yields an opaque version.
///
/// An optional leading `v` is accepted and preserved in the display form.
pub fn parse_version(s: &str) -> Version {
  let display = s.trim().to_string();
  let body = display.strip_prefix('v').unwrap_or(&display);
  let semantic = semver::Version::parse(body).ok().map(SemanticVersion::from);
  Version { display, semantic }
}

impl Version {
  /// Construct a semantic version from its numeric components.
  pub fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self {
      display: format!("{}.{}.{}", major, minor, patch),
      semantic: Some(SemanticVersion {
        major,
        minor,
        patch,
        prerelease: None,
        build: None,
      }),
    }
  }

  pub fn is_semantic(&self) -> bool {
    self.semantic.is_some()
  }

  pub fn semantic(&self) -> Option<&SemanticVersion> {
    self.semantic.as_ref()
  }

  /// The original string this version was parsed from.
  pub fn display(&self) -> &str {
    &self.display
  }

  /// Canonical form: the semver string without `v` for semantic versions, the display otherwise.
  ///
  /// Used for lockfile keys, sink paths and cache directory names.
  pub fn canonical(&self) -> String {
    match &self.semantic {
      Some(sem) => sem.canonical(),
      None => self.display.clone(),
    }
  }

  /// Compare two versions under the semantic order. `None` if either side is opaque.
  pub fn cmp_semantic(&self, other: &Version) -> Option<Ordering> {
    match (&self.semantic, &other.semantic) {
      (Some(a), Some(b)) => Some(a.triple().cmp(&b.triple())),
      _ => None,
    }
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.display)
  }
}

impl Serialize for Version {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.display)
  }
}

impl<'de> Deserialize<'de> for Version {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(parse_version(&s))
  }
}
