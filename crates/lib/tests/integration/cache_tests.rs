use std::path::{Path, PathBuf};
use std::time::Duration;

use arm_lib::registry::{GitConfig, RegistryConfig};
use arm_lib::store::PackageRequest;
use arm_lib::types::PackageFile;
use arm_lib::version::parse_version;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::common::*;

fn dirs_named(root: &Path, name: &str) -> Vec<PathBuf> {
  WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_dir() && e.file_name() == name)
    .map(|e| e.into_path())
    .collect()
}

fn git_config() -> RegistryConfig {
  RegistryConfig::Git(GitConfig {
    url: REGISTRY_URL.to_string(),
    branches: Vec::new(),
  })
}

#[tokio::test]
async fn projects_share_cached_versions() {
  let registry = basic_registry();
  let cache = TempDir::new().unwrap();

  let first = Project::with_cache(registry.clone(), cache.path());
  first.write_manifest(&basic_manifest());
  first.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert_eq!(registry.fetch_count(), 1);

  let second = Project::with_cache(registry.clone(), cache.path());
  second.write_manifest(&basic_manifest());
  second.engine().install_all(&CancellationToken::new()).await.unwrap();

  assert_eq!(registry.fetch_count(), 1);
  assert_eq!(first.lockfile(), second.lockfile());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_fetch_once_and_leave_one_complete_version() {
  let registry = basic_registry();
  registry.set_fetch_delay(Duration::from_millis(300));
  let cache = TempDir::new().unwrap();
  let first = Project::with_cache(registry.clone(), cache.path());
  let second = Project::with_cache(registry.clone(), cache.path());
  first.write_manifest(&basic_manifest());
  second.write_manifest(&basic_manifest());

  let (engine_a, engine_b) = (first.engine(), second.engine());
  let cancel = CancellationToken::new();
  let (a, b) = tokio::join!(engine_a.install_all(&cancel), engine_b.install_all(&cancel));
  assert!(a.unwrap().is_success());
  assert!(b.unwrap().is_success());
  assert_eq!(registry.fetch_count(), 1, "the second installer should reuse the first fetch");

  let versions = dirs_named(cache.path(), "v1.2.0");
  assert_eq!(versions.len(), 1);
  let version_dir = &versions[0];
  assert!(version_dir.join("metadata.json").exists());
  assert!(version_dir.join("files/rules/foo.yml").exists());

  let staging = WalkDir::new(cache.path())
    .into_iter()
    .filter_map(Result::ok)
    .any(|e| e.file_name().to_string_lossy().starts_with(".staging-"));
  assert!(!staging);
  assert_eq!(first.lockfile(), second.lockfile());
}

#[tokio::test]
async fn idle_eviction_removes_version_and_keeps_package() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  project.engine().install_all(&CancellationToken::new()).await.unwrap();

  let version_dir = dirs_named(&project.cache, "v1.2.0").remove(0);
  let package_dir = version_dir.parent().unwrap().to_path_buf();
  tokio::time::sleep(Duration::from_millis(20)).await;

  let stats = project
    .store()
    .evict_by_idle(&CancellationToken::new(), Duration::ZERO)
    .unwrap();

  assert_eq!(stats.versions_removed, 1);
  assert!(!version_dir.exists());
  assert!(package_dir.join("metadata.json").exists());
}

#[tokio::test]
async fn include_patterns_filter_and_share_cache_key() {
  let registry = MockRegistry::new();
  registry.publish(
    "docs",
    "v1.0.0",
    vec![PackageFile::new("a.yml", "kind: x"), PackageFile::new("b.md", "# b")],
  );
  let project = Project::new(registry.clone());
  let adapter = project.adapter();
  let cancel = CancellationToken::new();
  let reg = adapter.open_registry(&cancel, REGISTRY, &git_config()).await.unwrap();
  let version = parse_version("v1.0.0");

  let request = PackageRequest::new("docs").with_include(vec!["**/*.yml".into(), "*.txt".into()]);
  let package = adapter.get_package(&cancel, &reg, &request, &version).await.unwrap();
  let paths: Vec<&str> = package.files.iter().map(|f| f.path.as_str()).collect();
  assert_eq!(paths, vec!["a.yml"]);
  assert_eq!(registry.fetch_count(), 1);

  let reordered = PackageRequest::new("docs").with_include(vec![" *.txt ".into(), "**\\*.yml".into()]);
  let again = adapter.get_package(&cancel, &reg, &reordered, &version).await.unwrap();
  assert_eq!(again.files, package.files);
  assert_eq!(again.integrity, package.integrity);
  assert_eq!(registry.fetch_count(), 1);
}
