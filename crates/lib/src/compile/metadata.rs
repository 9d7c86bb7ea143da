//! The metadata block shared by every rule target.
//!
//! Two YAML frontmatter documents precede the rule body: a cursor-style header that tools read
//! to decide when a rule applies, then a descriptor identifying the rule inside its namespace
//! and ruleset.

use serde::Serialize;

use super::Tool;
use crate::resource::{Enforcement, Rule, Ruleset};

const FENCE: &str = "---";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Header<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  description: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  globs: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  apply_to: Option<String>,
  always_apply: bool,
}

impl<'a> Header<'a> {
  fn new(tool: Tool, rule: &'a Rule) -> Self {
    let files = rule.scoped_files();
    let globs = (!files.is_empty()).then(|| files.join(","));
    Self {
      description: rule.description.as_deref(),
      apply_to: globs.clone().filter(|_| tool == Tool::Copilot),
      globs,
      always_apply: rule.enforcement == Some(Enforcement::Must),
    }
  }
}

#[derive(Debug, Serialize)]
struct Descriptor<'a> {
  namespace: &'a str,
  ruleset: RulesetInfo<'a>,
  rule: RuleInfo<'a>,
}

#[derive(Debug, Serialize)]
struct RulesetInfo<'a> {
  id: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  name: Option<&'a str>,
  rules: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct RuleInfo<'a> {
  id: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  name: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  enforcement: Option<&'static str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  priority: Option<i64>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  scope: Vec<ScopeInfo<'a>>,
}

#[derive(Debug, Serialize)]
struct ScopeInfo<'a> {
  files: Vec<&'a str>,
}

impl<'a> Descriptor<'a> {
  fn new(namespace: &'a str, ruleset: &'a Ruleset, rule: &'a Rule) -> Self {
    let files = rule.scoped_files();
    Self {
      namespace,
      ruleset: RulesetInfo {
        id: &ruleset.id,
        name: ruleset.name.as_deref(),
        rules: ruleset.rules.keys().map(String::as_str).collect(),
      },
      rule: RuleInfo {
        id: &rule.id,
        name: rule.name.as_deref(),
        enforcement: rule.enforcement.map(Enforcement::as_upper),
        priority: rule.priority,
        scope: if files.is_empty() { Vec::new() } else { vec![ScopeInfo { files }] },
      },
    }
  }
}

fn document(value: &impl Serialize) -> Result<String, serde_yaml::Error> {
  Ok(format!("{FENCE}\n{}{FENCE}\n", serde_yaml::to_string(value)?))
}

/// Full metadata block for `rule`, followed by a blank line.
pub fn rule_metadata(tool: Tool, namespace: &str, ruleset: &Ruleset, rule: &Rule) -> Result<String, serde_yaml::Error> {
  Ok(format!(
    "{}{}\n",
    document(&Header::new(tool, rule))?,
    document(&Descriptor::new(namespace, ruleset, rule))?
  ))
}
