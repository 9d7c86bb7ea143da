//! The per-sink record of deployed packages, `arm/arm-index.json`.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SinkError;
use crate::compile::Tool;
use crate::resource::ResourceType;
use crate::types::{PackageId, split_versioned_key};
use crate::util::fs::write_json_atomic;

pub const INDEX_FILENAME: &str = "arm-index.json";
pub const INDEX_VERSION: u32 = 1;
/// Stem of the generated priority index rule file (`arm/arm_index.<ext>`).
pub const PRIORITY_INDEX_STEM: &str = "arm_index";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
  #[serde(rename = "type")]
  pub resource_type: ResourceType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i64>,
  /// Sink-relative paths, forward slashes, sorted.
  pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkIndex {
  pub version: u32,
  /// Keyed by `registry/package@version`.
  #[serde(default)]
  pub entries: BTreeMap<String, IndexEntry>,
}

impl Default for SinkIndex {
  fn default() -> Self {
    Self {
      version: INDEX_VERSION,
      entries: BTreeMap::new(),
    }
  }
}

impl SinkIndex {
  pub fn load(path: &Path) -> Result<Self, SinkError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(source) => {
        return Err(SinkError::Io {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    serde_json::from_str(&content).map_err(|source| SinkError::Index {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn save(&self, path: &Path) -> Result<(), SinkError> {
    write_json_atomic(path, self).map_err(|source| SinkError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Keys of every entry (any version) belonging to `id`.
  pub fn keys_for(&self, id: &PackageId) -> Vec<String> {
    self
      .entries
      .keys()
      .filter(|key| split_versioned_key(key).is_some_and(|(entry_id, _)| &entry_id == id))
      .cloned()
      .collect()
  }

  /// Whether any entry lists `path`.
  pub fn references(&self, path: &str) -> bool {
    self.entries.values().any(|e| e.files.iter().any(|f| f == path))
  }

  /// Rulesets ordered by descending priority, then key.
  pub fn rulesets_by_priority(&self) -> Vec<(&String, &IndexEntry)> {
    let mut rulesets: Vec<_> = self
      .entries
      .iter()
      .filter(|(_, e)| e.resource_type == ResourceType::Ruleset)
      .collect();
    rulesets.sort_by(|(ka, a), (kb, b)| b.priority.unwrap_or(0).cmp(&a.priority.unwrap_or(0)).then(ka.cmp(kb)));
    rulesets
  }
}

pub fn priority_index_name(tool: Tool) -> String {
  format!("{PRIORITY_INDEX_STEM}{}", tool.rule_extension())
}

/// Render the priority index rule file, or `None` when no rulesets are installed.
pub fn render_priority_index(index: &SinkIndex) -> Option<String> {
  let rulesets = index.rulesets_by_priority();
  if rulesets.is_empty() {
    return None;
  }

  let mut out = String::new();
  let _ = writeln!(out, "---");
  let _ = writeln!(out, "description: \"Installed rulesets in priority order\"");
  let _ = writeln!(out, "alwaysApply: true");
  let _ = writeln!(out, "---");
  let _ = writeln!(out);
  let _ = writeln!(out, "# Installed rulesets");
  let _ = writeln!(out);
  let _ = writeln!(
    out,
    "When rules conflict, follow the ruleset listed first. Rulesets are ordered by descending priority."
  );
  let _ = writeln!(out);
  for (position, (key, entry)) in rulesets.iter().enumerate() {
    match entry.priority {
      Some(priority) => {
        let _ = writeln!(out, "{}. {key} (priority {priority})", position + 1);
      }
      None => {
        let _ = writeln!(out, "{}. {key}", position + 1);
      }
    }
    for file in &entry.files {
      let _ = writeln!(out, "   - {file}");
    }
  }
  Some(out)
}
