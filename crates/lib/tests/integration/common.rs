//! Shared helpers for engine integration tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arm_lib::compile::Tool;
use arm_lib::install::{EngineConfig, InstallEngine, RetryPolicy};
use arm_lib::lockfile::{JsonLockStore, LockStore, Lockfile};
use arm_lib::manifest::{JsonManifestStore, Manifest, ManifestStore, PackageEntry};
use arm_lib::registry::{
  BackendError, BackendFactory, Credentials, GitConfig, RegistryAdapter, RegistryBackend, RegistryConfig,
};
use arm_lib::resource::ResourceType;
use arm_lib::sink::{Layout, SinkConfig};
use arm_lib::store::{PackageRequest, Store};
use arm_lib::types::{PackageFile, PackageId};
use arm_lib::version::{Version, parse_version};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const REGISTRY: &str = "reg";
pub const REGISTRY_URL: &str = "https://example.com/rules.git";

/// In-memory registry shared by every backend the mock factory creates.
#[derive(Default)]
pub struct MockRegistry {
  packages: Mutex<BTreeMap<String, BTreeMap<String, Vec<PackageFile>>>>,
  fetches: AtomicUsize,
  fetch_delay: Mutex<Duration>,
}

impl MockRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Publish `files` for `package` under the tag `version`.
  pub fn publish(&self, package: &str, version: &str, files: Vec<PackageFile>) {
    self
      .packages
      .lock()
      .unwrap()
      .entry(package.to_string())
      .or_default()
      .insert(version.to_string(), files);
  }

  /// Make every fetch take at least `delay`, widening race windows between installers.
  pub fn set_fetch_delay(&self, delay: Duration) {
    *self.fetch_delay.lock().unwrap() = delay;
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

struct MockBackend {
  registry: Arc<MockRegistry>,
}

#[async_trait]
impl RegistryBackend for MockBackend {
  async fn list_versions(
    &self,
    _cancel: &CancellationToken,
    request: &PackageRequest,
  ) -> Result<Vec<Version>, BackendError> {
    let packages = self.registry.packages.lock().unwrap();
    Ok(
      packages
        .get(&request.name)
        .map(|versions| versions.keys().map(|v| parse_version(v)).collect())
        .unwrap_or_default(),
    )
  }

  async fn fetch(
    &self,
    _cancel: &CancellationToken,
    request: &PackageRequest,
    version: &Version,
  ) -> Result<Vec<PackageFile>, BackendError> {
    self.registry.fetches.fetch_add(1, Ordering::SeqCst);
    let delay = *self.registry.fetch_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    let packages = self.registry.packages.lock().unwrap();
    packages
      .get(&request.name)
      .and_then(|versions| {
        versions
          .iter()
          .find(|(tag, _)| parse_version(tag).canonical() == version.canonical())
          .map(|(_, files)| files.clone())
      })
      .ok_or_else(|| BackendError::NotFound {
        package: request.name.clone(),
        version: version.to_string(),
      })
  }

  fn apply_credentials(&mut self, _credentials: Credentials) {}
}

pub struct MockFactory(pub Arc<MockRegistry>);

impl BackendFactory for MockFactory {
  fn create(&self, _config: &RegistryConfig, _repo_dir: PathBuf) -> Result<Box<dyn RegistryBackend>, BackendError> {
    Ok(Box::new(MockBackend {
      registry: self.0.clone(),
    }))
  }
}

/// A ruleset with a single rule.
pub fn ruleset_yaml(id: &str, rule: &str) -> String {
  format!(
    r#"apiVersion: v1
kind: Ruleset
metadata:
  id: {id}
  name: {id}
spec:
  rules:
    {rule}:
      name: {rule}
      enforcement: must
      scope:
        - files: ["**/*.rs"]
      body: Follow {rule}.
"#
  )
}

pub fn promptset_yaml(id: &str, prompt: &str) -> String {
  format!(
    r#"apiVersion: v1
kind: Promptset
metadata:
  id: {id}
spec:
  prompts:
    {prompt}:
      body: Run {prompt}.
"#
  )
}

pub fn id(package: &str) -> PackageId {
  PackageId::new(REGISTRY, package)
}

/// An isolated project directory with its own manifest, lockfile and cache.
pub struct Project {
  pub temp: TempDir,
  pub cache: PathBuf,
  pub registry: Arc<MockRegistry>,
}

impl Project {
  pub fn new(registry: Arc<MockRegistry>) -> Self {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    Self { temp, cache, registry }
  }

  /// A project sharing `cache` with other projects.
  pub fn with_cache(registry: Arc<MockRegistry>, cache: &Path) -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      cache: cache.to_path_buf(),
      registry,
    }
  }

  pub fn dir(&self) -> &Path {
    self.temp.path()
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.dir().join("arm.json")
  }

  pub fn sink_dir(&self, name: &str) -> PathBuf {
    self.dir().join(name)
  }

  pub fn store(&self) -> Store {
    Store::new(&self.cache)
  }

  pub fn adapter(&self) -> RegistryAdapter {
    RegistryAdapter::new(self.store(), Arc::new(MockFactory(self.registry.clone())))
  }

  pub fn engine(&self) -> InstallEngine {
    self.engine_with(EngineConfig {
      retry: RetryPolicy::none(),
      ..EngineConfig::default()
    })
  }

  pub fn engine_with(&self, config: EngineConfig) -> InstallEngine {
    InstallEngine::for_manifest(config, self.adapter(), self.manifest_path())
  }

  pub fn write_manifest(&self, manifest: &Manifest) {
    JsonManifestStore::new(self.manifest_path()).save(manifest).unwrap();
  }

  pub fn manifest(&self) -> Manifest {
    JsonManifestStore::new(self.manifest_path()).load().unwrap()
  }

  pub fn lockfile(&self) -> Lockfile {
    JsonLockStore::new(self.dir().join("arm-lock.json")).load().unwrap()
  }

  pub fn save_lockfile(&self, lockfile: &Lockfile) {
    JsonLockStore::new(self.dir().join("arm-lock.json")).save(lockfile).unwrap();
  }
}

/// Manifest with the mock registry and one sink per `(name, tool, layout)`.
pub fn manifest_with_sinks(sinks: &[(&str, Tool, Layout)]) -> Manifest {
  let mut manifest = Manifest::default();
  manifest.registries.insert(
    REGISTRY.to_string(),
    RegistryConfig::Git(GitConfig {
      url: REGISTRY_URL.to_string(),
      branches: Vec::new(),
    }),
  );
  for (name, tool, layout) in sinks {
    manifest.sinks.insert(
      name.to_string(),
      SinkConfig {
        directory: name.to_string(),
        layout: *layout,
        compile_target: *tool,
      },
    );
  }
  manifest
}

pub fn ruleset_entry(version: &str, sinks: &[&str]) -> PackageEntry {
  PackageEntry::new(
    ResourceType::Ruleset,
    version,
    sinks.iter().map(|s| s.to_string()).collect(),
  )
}

/// The registry offered by the basic install scenarios: `reg/a` at v1.0.0, v1.2.0 and v2.0.0.
pub fn basic_registry() -> Arc<MockRegistry> {
  let registry = MockRegistry::new();
  for tag in ["v1.0.0", "v1.2.0", "v2.0.0"] {
    registry.publish(
      "a",
      tag,
      vec![PackageFile::new("rules/foo.yml", ruleset_yaml("a", "rule1"))],
    );
  }
  registry
}

/// `reg/a` at `^1.0.0` deployed to sink `s1` (cursor, hierarchical).
pub fn basic_manifest() -> Manifest {
  let mut manifest = manifest_with_sinks(&[("s1", Tool::Cursor, Layout::Hierarchical)]);
  manifest.insert(&id("a"), ruleset_entry("^1.0.0", &["s1"]));
  manifest
}
