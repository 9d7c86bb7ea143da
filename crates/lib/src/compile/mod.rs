//! Compilation of rulesets and promptsets into tool-specific files.

pub mod metadata;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::{Promptset, Resource, Ruleset};
use crate::types::PackageFile;

pub use metadata::rule_metadata;

/// Target tools a sink can compile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
  Cursor,
  Amazonq,
  Copilot,
  Markdown,
}

impl Tool {
  pub const ALL: [Tool; 4] = [Tool::Cursor, Tool::Amazonq, Tool::Copilot, Tool::Markdown];

  pub fn as_str(self) -> &'static str {
    match self {
      Tool::Cursor => "cursor",
      Tool::Amazonq => "amazonq",
      Tool::Copilot => "copilot",
      Tool::Markdown => "markdown",
    }
  }

  /// Suffix of compiled rule files.
  pub fn rule_extension(self) -> &'static str {
    match self {
      Tool::Cursor => ".mdc",
      Tool::Amazonq | Tool::Markdown => ".md",
      Tool::Copilot => ".instructions.md",
    }
  }

  /// Suffix of compiled prompt files.
  pub fn prompt_extension(self) -> &'static str {
    match self {
      Tool::Cursor => ".md",
      other => other.rule_extension(),
    }
  }
}

impl fmt::Display for Tool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Tool {
  type Err = CompileError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Tool::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| CompileError::UnknownTool(s.to_string()))
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
  #[error("ruleset has an empty id")]
  EmptyRulesetId,

  #[error("rule in ruleset '{ruleset}' has an empty id")]
  EmptyRuleId { ruleset: String },

  #[error("promptset has an empty id")]
  EmptyPromptsetId,

  #[error("prompt in promptset '{promptset}' has an empty id")]
  EmptyPromptId { promptset: String },

  #[error("unknown compile target '{0}'")]
  UnknownTool(String),

  #[error("failed to serialise metadata for rule '{rule}': {message}")]
  Metadata { rule: String, message: String },
}

/// Compile every rule of `ruleset`, in ascending rule id order.
pub fn compile_ruleset(tool: Tool, namespace: &str, ruleset: &Ruleset) -> Result<Vec<PackageFile>, CompileError> {
  if ruleset.id.trim().is_empty() {
    return Err(CompileError::EmptyRulesetId);
  }

  ruleset
    .rules
    .values()
    .map(|rule| {
      if rule.id.trim().is_empty() {
        return Err(CompileError::EmptyRuleId {
          ruleset: ruleset.id.clone(),
        });
      }
      let name = format!("{}_{}{}", ruleset.id, rule.id, tool.rule_extension());
      let metadata = rule_metadata(tool, namespace, ruleset, rule).map_err(|e| CompileError::Metadata {
        rule: rule.id.clone(),
        message: e.to_string(),
      })?;
      let content = format!("{metadata}{}", rule.body);
      Ok(PackageFile::new(name, content))
    })
    .collect()
}

/// Compile every prompt of `promptset`, in ascending prompt id order. Prompts carry no metadata.
pub fn compile_promptset(
  tool: Tool,
  _namespace: &str,
  promptset: &Promptset,
) -> Result<Vec<PackageFile>, CompileError> {
  if promptset.id.trim().is_empty() {
    return Err(CompileError::EmptyPromptsetId);
  }

  promptset
    .prompts
    .values()
    .map(|prompt| {
      if prompt.id.trim().is_empty() {
        return Err(CompileError::EmptyPromptId {
          promptset: promptset.id.clone(),
        });
      }
      let name = format!("{}_{}{}", promptset.id, prompt.id, tool.prompt_extension());
      Ok(PackageFile::new(name, prompt.body.clone()))
    })
    .collect()
}

pub fn compile_resource(tool: Tool, namespace: &str, resource: &Resource) -> Result<Vec<PackageFile>, CompileError> {
  match resource {
    Resource::Ruleset(ruleset) => compile_ruleset(tool, namespace, ruleset),
    Resource::Promptset(promptset) => compile_promptset(tool, namespace, promptset),
  }
}
