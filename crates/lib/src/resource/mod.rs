//! Authored resources: rulesets and promptsets.

pub mod parser;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use parser::{ResourceError, ResourceParser, YamlResourceParser, is_resource_file};

/// Declared type of a manifest package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
  Ruleset,
  Promptset,
}

impl ResourceType {
  /// The YAML `kind` for this type.
  pub fn kind(self) -> &'static str {
    match self {
      ResourceType::Ruleset => "Ruleset",
      ResourceType::Promptset => "Promptset",
    }
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResourceType::Ruleset => f.write_str("ruleset"),
      ResourceType::Promptset => f.write_str("promptset"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
  May,
  Should,
  Must,
}

impl Enforcement {
  pub fn as_upper(self) -> &'static str {
    match self {
      Enforcement::May => "MAY",
      Enforcement::Should => "SHOULD",
      Enforcement::Must => "MUST",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleScope {
  #[serde(default)]
  pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
  pub id: String,
  pub name: Option<String>,
  pub description: Option<String>,
  pub priority: Option<i64>,
  pub enforcement: Option<Enforcement>,
  pub scope: Vec<RuleScope>,
  pub body: String,
}

impl Rule {
  /// All file globs across the rule's scopes, in declaration order.
  pub fn scoped_files(&self) -> Vec<&str> {
    self
      .scope
      .iter()
      .flat_map(|s| s.files.iter().map(String::as_str))
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
  pub api_version: String,
  pub id: String,
  pub name: Option<String>,
  pub description: Option<String>,
  /// Keyed by rule id, so iteration is in ascending id order.
  pub rules: BTreeMap<String, Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
  pub id: String,
  pub name: Option<String>,
  pub description: Option<String>,
  pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promptset {
  pub api_version: String,
  pub id: String,
  pub name: Option<String>,
  pub description: Option<String>,
  pub prompts: BTreeMap<String, Prompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
  Ruleset(Ruleset),
  Promptset(Promptset),
}

impl Resource {
  pub fn resource_type(&self) -> ResourceType {
    match self {
      Resource::Ruleset(_) => ResourceType::Ruleset,
      Resource::Promptset(_) => ResourceType::Promptset,
    }
  }
}
