//! Version constraints.
//!
//! | Kind | Source forms | Admits `v` iff |
//! |---|---|---|
//! | `Exact(V)` | `1.2.3`, `v1.2.3`, `=1.2.3` | `v` semantic and `v == V` |
//! | `Minor(V)` | `~1.2.3`, `~1.2`, `1.2` | `v` semantic, same major and minor, `v >= V` |
//! | `Major(V)` | `^1.2.3`, `^1`, `1`, bare `1.0.0` | `v` semantic, same major, `v >= V` |
//! | `Latest` | `latest` | always |
//!
//! A bare full triple is promoted by its components: non-zero patch is `Exact`, else
//! non-zero minor is `Minor`, else `Major`.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

use super::{Version, parse_version};

/// How strictly constraint strings are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
  /// Reject anything outside the constraint grammar.
  #[default]
  Strict,
  /// Accept unrecognised strings (branch names, commits) as `Latest` pinned to that string.
  Loose,
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
  Exact(Version),
  Minor(Version),
  Major(Version),
  /// `latest`; in loose mode may carry the opaque string it was parsed from.
  Latest(Option<String>),
}

/// Error parsing a constraint string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
  #[error("empty version constraint")]
  Empty,

  #[error("invalid version constraint '{0}'")]
  Invalid(String),
}

/// A semantic constraint was applied to an opaque version.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("constraint '{constraint}' requires a semantic version, got '{version}'")]
pub struct VersionKindError {
  pub constraint: String,
  pub version: String,
}

/// No candidate satisfied the constraint.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no version satisfies '{constraint}' (candidates: {candidates})")]
pub struct NoMatch {
  pub constraint: String,
  pub candidates: usize,
}

impl Constraint {
  /// The anchor version of a semantic constraint.
  pub fn anchor(&self) -> Option<&Version> {
    match self {
      Constraint::Exact(v) | Constraint::Minor(v) | Constraint::Major(v) => Some(v),
      Constraint::Latest(_) => None,
    }
  }
}

impl fmt::Display for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Constraint::Exact(v) => write!(f, "={}", v.canonical()),
      Constraint::Minor(v) => write!(f, "~{}", v.canonical()),
      Constraint::Major(v) => write!(f, "^{}", v.canonical()),
      Constraint::Latest(None) => f.write_str("latest"),
      Constraint::Latest(Some(pin)) => f.write_str(pin),
    }
  }
}

/// Numeric core of a constraint body: one to three components.
struct Core {
  parts: Vec<u64>,
  version: Version,
}

fn parse_core(body: &str) -> Option<Core> {
  let body = body.strip_prefix('v').unwrap_or(body);
  if body.is_empty() {
    return None;
  }

  let numeric_end = body.find(['-', '+']).unwrap_or(body.len());
  let (numeric, suffix) = body.split_at(numeric_end);

  let mut parts = Vec::with_capacity(3);
  for part in numeric.split('.') {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
      return None;
    }
    parts.push(part.parse::<u64>().ok()?);
  }

  match parts.len() {
    3 => {
      let version = parse_version(body);
      version.is_semantic().then_some(Core { parts, version })
    }
    1 | 2 if suffix.is_empty() => {
      let version = Version::new(parts[0], parts.get(1).copied().unwrap_or(0), 0);
      Some(Core { parts, version })
    }
    _ => None,
  }
}

/// Parse a constraint string.
pub fn parse_constraint(s: &str, mode: ParseMode) -> Result<Constraint, ConstraintError> {
  let input = s.trim();
  if input.is_empty() {
    return Err(ConstraintError::Empty);
  }
  if input == "latest" {
    return Ok(Constraint::Latest(None));
  }

  let parsed = if let Some(rest) = input.strip_prefix('^') {
    parse_core(rest).map(|core| Constraint::Major(core.version))
  } else if let Some(rest) = input.strip_prefix('~') {
    parse_core(rest).map(|core| Constraint::Minor(core.version))
  } else if let Some(rest) = input.strip_prefix('=') {
    parse_core(rest)
      .filter(|core| core.parts.len() == 3)
      .map(|core| Constraint::Exact(core.version))
  } else {
    parse_core(input).map(promote_bare)
  };

  match (parsed, mode) {
    (Some(constraint), _) => Ok(constraint),
    (None, ParseMode::Loose) => Ok(Constraint::Latest(Some(input.to_string()))),
    (None, ParseMode::Strict) => Err(ConstraintError::Invalid(input.to_string())),
  }
}

fn promote_bare(core: Core) -> Constraint {
  match core.parts.as_slice() {
    [_] => Constraint::Major(core.version),
    [_, _] => Constraint::Minor(core.version),
    [_, minor, patch] => {
      if *patch > 0 {
        Constraint::Exact(core.version)
      } else if *minor > 0 {
        Constraint::Minor(core.version)
      } else {
        Constraint::Major(core.version)
      }
    }
    _ => Constraint::Major(core.version),
  }
}

/// Whether `constraint` admits `version`.
///
/// Errors with [`VersionKindError`] when a semantic constraint meets an opaque version.
pub fn admits(constraint: &Constraint, version: &Version) -> Result<bool, VersionKindError> {
  let anchor = match constraint {
    Constraint::Latest(_) => return Ok(true),
    Constraint::Exact(v) | Constraint::Minor(v) | Constraint::Major(v) => v,
  };

  let kind_error = || VersionKindError {
    constraint: constraint.to_string(),
    version: version.display().to_string(),
  };
  let candidate = version.semantic().ok_or_else(kind_error)?.triple();
  let Some(anchor) = anchor.semantic().map(|s| s.triple()) else {
    return Err(kind_error());
  };

  Ok(match constraint {
    Constraint::Exact(_) => candidate == anchor,
    Constraint::Minor(_) => candidate.0 == anchor.0 && candidate.1 == anchor.1 && candidate >= anchor,
    Constraint::Major(_) => candidate.0 == anchor.0 && candidate >= anchor,
    Constraint::Latest(_) => true,
  })
}

/// Select the best version admitted by `constraint`.
///
/// Candidates are filtered by [`admits`] (opaque versions are silently skipped by semantic
/// constraints), then the maximum under the semantic order wins. Ties are broken by display
/// string ascending.
///
/// For `Latest`, a candidate whose display equals the pinned opaque string wins outright; when
/// no semantic candidates exist the first opaque one by display is returned.
pub fn best_match(versions: &[Version], constraint: &Constraint) -> Result<Version, NoMatch> {
  if let Constraint::Latest(Some(pin)) = constraint
    && let Some(exact) = versions.iter().find(|v| v.display() == pin)
  {
    return Ok(exact.clone());
  }

  let admitted: Vec<&Version> = versions
    .iter()
    .filter(|v| admits(constraint, v).unwrap_or(false))
    .collect();

  let best_semantic = admitted
    .iter()
    .filter(|v| v.is_semantic())
    .copied()
    .reduce(|best, candidate| match candidate.cmp_semantic(best) {
      Some(Ordering::Greater) => candidate,
      Some(Ordering::Equal) if candidate.display() < best.display() => candidate,
      _ => best,
    });

  let chosen = match best_semantic {
    Some(v) => Some(v),
    None => admitted.iter().copied().min_by(|a, b| a.display().cmp(b.display())),
  };

  chosen.cloned().ok_or_else(|| NoMatch {
    constraint: constraint.to_string(),
    candidates: versions.len(),
  })
}
