use std::fs;

use arm_lib::compile::Tool;
use arm_lib::install::{ErrorKind, InstallError};
use arm_lib::sink::Layout;
use arm_lib::types::{PackageFile, PackageId};
use tokio_util::sync::CancellationToken;

use super::common::*;

#[tokio::test]
async fn install_adds_entry_to_manifest() {
  let project = Project::new(basic_registry());
  project.write_manifest(&manifest_with_sinks(&[("s1", Tool::Cursor, Layout::Hierarchical)]));

  let report = project
    .engine()
    .install(&CancellationToken::new(), &id("a"), ruleset_entry("^1.0.0", &["s1"]))
    .await
    .unwrap();
  assert!(report.is_success());

  assert_eq!(project.manifest().get(&id("a")).unwrap().version, "^1.0.0");
  assert!(project.lockfile().get(&id("a"), "1.2.0").is_some());
}

#[tokio::test]
async fn install_rejects_unknown_registry() {
  let project = Project::new(basic_registry());
  project.write_manifest(&manifest_with_sinks(&[("s1", Tool::Cursor, Layout::Hierarchical)]));

  let err = project
    .engine()
    .install(
      &CancellationToken::new(),
      &PackageId::new("elsewhere", "a"),
      ruleset_entry("^1.0.0", &["s1"]),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Parse);
  assert!(project.manifest().packages.is_empty());
}

#[tokio::test]
async fn failed_install_leaves_manifest_untouched() {
  let project = Project::new(basic_registry());
  project.write_manifest(&manifest_with_sinks(&[("s1", Tool::Cursor, Layout::Hierarchical)]));

  let report = project
    .engine()
    .install(&CancellationToken::new(), &id("a"), ruleset_entry("^7.0.0", &["s1"]))
    .await
    .unwrap();
  assert!(!report.is_success());
  assert!(project.manifest().get(&id("a")).is_none());
}

#[tokio::test]
async fn uninstall_removes_files_and_entries() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  let removed = engine.uninstall(&CancellationToken::new(), &id("a")).await.unwrap();
  assert_eq!(removed, vec!["s1".to_string()]);

  let sink = project.sink_dir("s1");
  assert!(!sink.join("arm/reg/a/1.2.0/rules/a_rule1.mdc").exists());
  assert!(!sink.join("arm/reg").exists());
  assert!(project.manifest().get(&id("a")).is_none());
  assert!(project.lockfile().dependencies.is_empty());
}

#[tokio::test]
async fn uninstall_unknown_package_fails() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());

  let err = project
    .engine()
    .uninstall(&CancellationToken::new(), &id("nope"))
    .await
    .unwrap_err();
  assert!(matches!(err, InstallError::NotInstalled(_)));
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn entries_removed_from_manifest_are_pruned_from_lockfile() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  project.write_manifest(&manifest_with_sinks(&[("s1", Tool::Cursor, Layout::Hierarchical)]));
  let report = engine.install_all(&CancellationToken::new()).await.unwrap();

  assert_eq!(report.pruned, vec!["reg/a@1.2.0".to_string()]);
  assert!(project.lockfile().dependencies.is_empty());
}

#[tokio::test]
async fn list_reports_locked_versions() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();

  let before = engine.list().unwrap();
  assert_eq!(before.len(), 1);
  assert!(before[0].version.is_none());

  engine.install_all(&CancellationToken::new()).await.unwrap();
  let after = engine.list().unwrap();
  assert_eq!(after[0].id, id("a"));
  assert_eq!(after[0].version.as_deref(), Some("1.2.0"));
  assert_eq!(after[0].constraint, "^1.0.0");
  assert!(after[0].integrity.is_some());
}

#[tokio::test]
async fn outdated_reports_wanted_and_latest() {
  let registry = basic_registry();
  let project = Project::new(registry.clone());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  registry.publish(
    "a",
    "v1.3.0",
    vec![PackageFile::new("rules/foo.yml", ruleset_yaml("a", "rule1"))],
  );
  let outdated = engine.outdated(&CancellationToken::new()).await.unwrap();

  assert_eq!(outdated.len(), 1);
  assert_eq!(outdated[0].current.as_deref(), Some("1.2.0"));
  assert_eq!(outdated[0].wanted, "1.3.0");
  assert_eq!(outdated[0].latest, "2.0.0");
}

#[tokio::test]
async fn clean_sinks_removes_unreferenced_files() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  let sink = project.sink_dir("s1");
  let stray = sink.join("arm/reg/old/0.1.0/stale.md");
  fs::create_dir_all(stray.parent().unwrap()).unwrap();
  fs::write(&stray, "stale").unwrap();

  let cleaned = engine.clean_sinks(&CancellationToken::new()).await.unwrap();
  assert_eq!(cleaned.len(), 1);
  assert_eq!(cleaned[0].sink, "s1");
  assert!(cleaned[0].removed.iter().any(|p| p.ends_with("stale.md")));

  assert!(!stray.exists());
  assert!(sink.join("arm/reg/a/1.2.0/rules/a_rule1.mdc").exists());
}
