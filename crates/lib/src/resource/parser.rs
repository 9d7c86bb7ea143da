use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use super::{Enforcement, Prompt, Promptset, Resource, ResourceType, Rule, RuleScope, Ruleset};

#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("failed to parse {path}: {source}")]
  Yaml {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("{path}: unknown resource kind '{kind}'")]
  UnknownKind { path: String, kind: String },

  #[error("{path}: kind '{kind}' does not match its spec content")]
  ContentMismatch { path: String, kind: String },

  #[error("{path}: expected a {expected} but found a {found}")]
  TypeMismatch {
    path: String,
    expected: ResourceType,
    found: ResourceType,
  },
}

/// Parses authored resource files.
pub trait ResourceParser: Send + Sync {
  /// Parse `content` and check that it is a resource of type `expected`.
  fn parse(&self, path: &str, content: &[u8], expected: ResourceType) -> Result<Resource, ResourceError>;
}

/// Whether a package file is an authored resource (YAML) rather than a verbatim asset.
pub fn is_resource_file(path: &str) -> bool {
  let lower = path.to_ascii_lowercase();
  lower.ends_with(".yml") || lower.ends_with(".yaml")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResource {
  #[serde(default)]
  api_version: String,
  kind: String,
  #[serde(default)]
  metadata: RawMetadata,
  #[serde(default)]
  spec: RawSpec,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
  #[serde(default)]
  id: String,
  name: Option<String>,
  description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSpec {
  rules: Option<BTreeMap<String, RawRule>>,
  prompts: Option<BTreeMap<String, RawPrompt>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
  name: Option<String>,
  description: Option<String>,
  priority: Option<i64>,
  enforcement: Option<Enforcement>,
  #[serde(default)]
  scope: Vec<RuleScope>,
  #[serde(default)]
  body: String,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
  name: Option<String>,
  description: Option<String>,
  #[serde(default)]
  body: String,
}

/// `serde_yaml` implementation of [`ResourceParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlResourceParser;

impl ResourceParser for YamlResourceParser {
  fn parse(&self, path: &str, content: &[u8], expected: ResourceType) -> Result<Resource, ResourceError> {
    let raw: RawResource = serde_yaml::from_slice(content).map_err(|source| ResourceError::Yaml {
      path: path.to_string(),
      source,
    })?;

    let RawResource {
      api_version,
      kind,
      metadata,
      spec,
    } = raw;
    let mismatch = || ResourceError::ContentMismatch {
      path: path.to_string(),
      kind: kind.clone(),
    };

    let resource = match kind.as_str() {
      "Ruleset" => {
        if spec.prompts.is_some() {
          return Err(mismatch());
        }
        let rules = spec.rules.ok_or_else(mismatch)?;
        Resource::Ruleset(Ruleset {
          api_version,
          id: metadata.id,
          name: metadata.name,
          description: metadata.description,
          rules: rules
            .into_iter()
            .map(|(id, r)| {
              let rule = Rule {
                id: id.clone(),
                name: r.name,
                description: r.description,
                priority: r.priority,
                enforcement: r.enforcement,
                scope: r.scope,
                body: r.body,
              };
              (id, rule)
            })
            .collect(),
        })
      }
      "Promptset" => {
        if spec.rules.is_some() {
          return Err(mismatch());
        }
        let prompts = spec.prompts.ok_or_else(mismatch)?;
        Resource::Promptset(Promptset {
          api_version,
          id: metadata.id,
          name: metadata.name,
          description: metadata.description,
          prompts: prompts
            .into_iter()
            .map(|(id, p)| {
              let prompt = Prompt {
                id: id.clone(),
                name: p.name,
                description: p.description,
                body: p.body,
              };
              (id, prompt)
            })
            .collect(),
        })
      }
      other => {
        return Err(ResourceError::UnknownKind {
          path: path.to_string(),
          kind: other.to_string(),
        });
      }
    };

    let found = resource.resource_type();
    if found != expected {
      return Err(ResourceError::TypeMismatch {
        path: path.to_string(),
        expected,
        found,
      });
    }
    Ok(resource)
  }
}
