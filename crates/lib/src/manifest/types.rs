//! Manifest types.
//!
//! The manifest (`arm.json`) declares registries, sinks and the packages to install:
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "registries": { "reg": { "type": "git", "url": "https://github.com/org/rules" } },
//!   "sinks": { "cursor": { "directory": ".cursor/rules", "compileTarget": "cursor" } },
//!   "packages": {
//!     "reg": {
//!       "clean-code": { "resourceType": "ruleset", "version": "^1.0.0", "sinks": ["cursor"], "priority": 100 }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::RegistryConfig;
use crate::resource::ResourceType;
use crate::sink::SinkConfig;
use crate::store::PackageRequest;
use crate::types::PackageId;

pub const MANIFEST_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEntry {
  pub resource_type: ResourceType,
  /// Constraint string, e.g. `^1.0.0`, `~1.2`, `1.2.3`, `latest`.
  pub version: String,
  #[serde(default)]
  pub sinks: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub include: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub exclude: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i64>,
}

impl PackageEntry {
  pub fn new(resource_type: ResourceType, version: impl Into<String>, sinks: Vec<String>) -> Self {
    Self {
      resource_type,
      version: version.into(),
      sinks,
      include: Vec::new(),
      exclude: Vec::new(),
      priority: None,
    }
  }

  /// The cache request for this entry.
  pub fn request(&self, package: &str) -> PackageRequest {
    PackageRequest::new(package)
      .with_include(self.include.clone())
      .with_exclude(self.exclude.clone())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub version: String,
  #[serde(default)]
  pub registries: BTreeMap<String, RegistryConfig>,
  #[serde(default)]
  pub sinks: BTreeMap<String, SinkConfig>,
  /// Registry name, then package name.
  #[serde(default)]
  pub packages: BTreeMap<String, BTreeMap<String, PackageEntry>>,
}

impl Default for Manifest {
  fn default() -> Self {
    Self {
      version: MANIFEST_VERSION.to_string(),
      registries: BTreeMap::new(),
      sinks: BTreeMap::new(),
      packages: BTreeMap::new(),
    }
  }
}

impl Manifest {
  /// All package entries in registry, then package order.
  pub fn entries(&self) -> Vec<(PackageId, &PackageEntry)> {
    self
      .packages
      .iter()
      .flat_map(|(registry, packages)| {
        packages
          .iter()
          .map(move |(package, entry)| (PackageId::new(registry.clone(), package.clone()), entry))
      })
      .collect()
  }

  pub fn get(&self, id: &PackageId) -> Option<&PackageEntry> {
    self.packages.get(&id.registry)?.get(&id.package)
  }

  pub fn get_mut(&mut self, id: &PackageId) -> Option<&mut PackageEntry> {
    self.packages.get_mut(&id.registry)?.get_mut(&id.package)
  }

  pub fn insert(&mut self, id: &PackageId, entry: PackageEntry) -> Option<PackageEntry> {
    self
      .packages
      .entry(id.registry.clone())
      .or_default()
      .insert(id.package.clone(), entry)
  }

  /// Remove an entry, dropping the registry's package map once empty.
  pub fn remove(&mut self, id: &PackageId) -> Option<PackageEntry> {
    let packages = self.packages.get_mut(&id.registry)?;
    let removed = packages.remove(&id.package);
    if packages.is_empty() {
      self.packages.remove(&id.registry);
    }
    removed
  }

  /// Check cross references: registries and sinks named by entries must exist, and only
  /// rulesets may carry a priority.
  pub fn validate(&self) -> Result<(), String> {
    for (id, entry) in self.entries() {
      if !self.registries.contains_key(&id.registry) {
        return Err(format!("package {id} references unknown registry '{}'", id.registry));
      }
      if let Some(sink) = entry.sinks.iter().find(|s| !self.sinks.contains_key(*s)) {
        return Err(format!("package {id} references unknown sink '{sink}'"));
      }
      if entry.priority.is_some() && entry.resource_type == ResourceType::Promptset {
        return Err(format!("package {id} is a promptset and cannot declare a priority"));
      }
    }
    Ok(())
  }
}
