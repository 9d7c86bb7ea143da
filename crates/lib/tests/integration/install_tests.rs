use std::fs;

use arm_lib::compile::Tool;
use arm_lib::install::{EngineConfig, ErrorKind, InstallError, RetryPolicy};
use arm_lib::resource::ResourceType;
use arm_lib::sink::Layout;
use arm_lib::types::PackageFile;
use arm_lib::util::hash::Integrity;
use arm_lib::manifest::PackageEntry;
use tokio_util::sync::CancellationToken;

use super::common::*;

#[tokio::test]
async fn install_all_resolves_best_match_and_deploys() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());

  let report = project.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert!(report.is_success(), "failures: {:?}", report.failed);

  let installed = report.installed(&id("a")).unwrap();
  assert_eq!(installed.version, "1.2.0");
  assert!(!installed.pinned);

  let deployed = project.sink_dir("s1").join("arm/reg/a/1.2.0/rules/a_rule1.mdc");
  let content = fs::read_to_string(&deployed).unwrap();
  assert!(content.contains("alwaysApply: true"));
  assert!(content.contains("Follow rule1."));
  assert!(project.sink_dir("s1").join("arm/arm-index.json").exists());

  let lockfile = project.lockfile();
  let keys: Vec<&String> = lockfile.dependencies.keys().collect();
  assert_eq!(keys, vec!["reg/a@1.2.0"]);
  assert!(lockfile.dependencies["reg/a@1.2.0"].integrity.as_str().starts_with("sha256-"));
}

#[tokio::test]
async fn second_install_keeps_locked_version() {
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
  let report = engine.install_all(&CancellationToken::new()).await.unwrap();

  let installed = report.installed(&id("a")).unwrap();
  assert_eq!(installed.version, "1.2.0");
  assert!(installed.pinned);
  assert!(project.lockfile().get(&id("a"), "1.2.0").is_some());
  assert!(project.lockfile().get(&id("a"), "1.3.0").is_none());
}

#[tokio::test]
async fn upgrade_moves_to_newest_admitted_version() {
  let registry = basic_registry();
  let project = Project::new(registry.clone());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();
  let before = project.lockfile().get(&id("a"), "1.2.0").unwrap().integrity.clone();

  registry.publish(
    "a",
    "v1.3.0",
    vec![
      PackageFile::new("rules/foo.yml", ruleset_yaml("a", "rule1")),
      PackageFile::new("rules/NOTES.md", "release notes"),
    ],
  );
  let report = engine.upgrade(&CancellationToken::new(), &[id("a")]).await.unwrap();
  assert!(report.is_success());
  assert_eq!(report.installed(&id("a")).unwrap().version, "1.3.0");

  let lockfile = project.lockfile();
  assert_eq!(lockfile.dependencies.len(), 1);
  let after = &lockfile.get(&id("a"), "1.3.0").unwrap().integrity;
  assert_ne!(&before, after);

  let sink = project.sink_dir("s1");
  assert!(sink.join("arm/reg/a/1.3.0/rules/a_rule1.mdc").exists());
  assert!(sink.join("arm/reg/a/1.3.0/rules/NOTES.md").exists());
  assert!(!sink.join("arm/reg/a/1.2.0").exists());

  assert_eq!(project.manifest().get(&id("a")).unwrap().version, "^1.3.0");
}

#[tokio::test]
async fn update_keeps_declared_constraint() {
  let registry = basic_registry();
  let project = Project::new(registry.clone());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  registry.publish(
    "a",
    "v1.4.0",
    vec![PackageFile::new("rules/foo.yml", ruleset_yaml("a", "rule1"))],
  );
  let report = engine.update(&CancellationToken::new(), &[]).await.unwrap();
  assert_eq!(report.installed(&id("a")).unwrap().version, "1.4.0");
  assert_eq!(project.manifest().get(&id("a")).unwrap().version, "^1.0.0");
}

#[tokio::test]
async fn tampered_lockfile_fails_integrity_check() {
  let project = Project::new(basic_registry());
  project.write_manifest(&basic_manifest());
  let engine = project.engine();
  engine.install_all(&CancellationToken::new()).await.unwrap();

  let mut lockfile = project.lockfile();
  lockfile.insert(&id("a"), "1.2.0", Integrity::from_string("sha256-deadbeef"));
  project.save_lockfile(&lockfile);

  let report = engine.install_all(&CancellationToken::new()).await.unwrap();
  assert_eq!(report.failed.len(), 1);
  let failure = &report.failed[0];
  assert!(matches!(failure.error, InstallError::IntegrityMismatch { .. }));
  assert_eq!(failure.error.kind(), ErrorKind::IntegrityMismatch);
  assert_eq!(report.exit_code(), 1);

  // The failed package keeps its previous lock entry.
  assert_eq!(
    project.lockfile().get(&id("a"), "1.2.0").unwrap().integrity.as_str(),
    "sha256-deadbeef"
  );
}

#[tokio::test]
async fn unsatisfiable_constraint_is_no_match() {
  let project = Project::new(basic_registry());
  let mut manifest = basic_manifest();
  manifest.insert(&id("a"), ruleset_entry("^3.0.0", &["s1"]));
  project.write_manifest(&manifest);

  let report = project.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].error.kind(), ErrorKind::NoMatch);
  assert!(project.lockfile().dependencies.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_stop_other_packages() {
  let project = Project::new(basic_registry());
  let mut manifest = basic_manifest();
  manifest.insert(&id("missing"), ruleset_entry("^1.0.0", &["s1"]));
  project.write_manifest(&manifest);

  let report = project.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert_eq!(report.installed.len(), 1);
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].id, id("missing"));

  let lockfile = project.lockfile();
  assert!(lockfile.get(&id("a"), "1.2.0").is_some());
  assert!(lockfile.versions(&id("missing")).is_empty());
}

#[tokio::test]
async fn fail_fast_stops_after_first_failure() {
  let project = Project::new(basic_registry());
  let mut manifest = basic_manifest();
  manifest.insert(&id("0-broken"), ruleset_entry("not a constraint", &["s1"]));
  project.write_manifest(&manifest);

  let engine = project.engine_with(EngineConfig {
    parallelism: 1,
    fail_fast: true,
    retry: RetryPolicy::none(),
    ..EngineConfig::default()
  });
  let report = engine.install_all(&CancellationToken::new()).await.unwrap();

  assert!(!report.is_success());
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].id, id("0-broken"));
  assert_eq!(report.failed[0].error.kind(), ErrorKind::Parse);
  assert_eq!(report.total(), 2);
  assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn each_sink_gets_its_own_tool_and_layout() {
  let project = Project::new(basic_registry());
  let mut manifest = manifest_with_sinks(&[
    ("cursor", Tool::Cursor, Layout::Hierarchical),
    ("copilot", Tool::Copilot, Layout::Hierarchical),
    ("flat", Tool::Markdown, Layout::Flat),
  ]);
  manifest.insert(&id("a"), ruleset_entry("^1.0.0", &["cursor", "copilot", "flat"]));
  project.write_manifest(&manifest);

  let report = project.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert!(report.is_success(), "failures: {:?}", report.failed);
  assert_eq!(report.installed(&id("a")).unwrap().sinks.len(), 3);

  assert!(
    project
      .sink_dir("cursor")
      .join("arm/reg/a/1.2.0/rules/a_rule1.mdc")
      .exists()
  );
  assert!(
    project
      .sink_dir("copilot")
      .join("arm/reg/a/1.2.0/rules/a_rule1.instructions.md")
      .exists()
  );

  let flat: Vec<String> = fs::read_dir(project.sink_dir("flat"))
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .filter(|name| name.starts_with("arm_") && name.ends_with("_a_rule1.md"))
    .collect();
  assert_eq!(flat.len(), 1, "flat sink contents: {flat:?}");
}

#[tokio::test]
async fn ruleset_priority_writes_priority_index() {
  let project = Project::new(basic_registry());
  let mut manifest = basic_manifest();
  let mut entry = ruleset_entry("^1.0.0", &["s1"]);
  entry.priority = Some(100);
  manifest.insert(&id("a"), entry);
  project.write_manifest(&manifest);

  project.engine().install_all(&CancellationToken::new()).await.unwrap();

  let index = fs::read_to_string(project.sink_dir("s1").join("arm/arm_index.mdc")).unwrap();
  assert!(index.contains("reg/a@1.2.0"));
}

#[tokio::test]
async fn promptsets_compile_without_metadata() {
  let registry = basic_registry();
  registry.publish(
    "p",
    "v1.0.0",
    vec![PackageFile::new("prompts/p.yml", promptset_yaml("p", "review"))],
  );
  let project = Project::new(registry);
  let mut manifest = basic_manifest();
  manifest.insert(
    &id("p"),
    PackageEntry::new(ResourceType::Promptset, "1.0.0", vec!["s1".to_string()]),
  );
  project.write_manifest(&manifest);

  let report = project.engine().install_all(&CancellationToken::new()).await.unwrap();
  assert!(report.is_success(), "failures: {:?}", report.failed);

  let prompt = fs::read_to_string(project.sink_dir("s1").join("arm/reg/p/1.0.0/prompts/p_review.md")).unwrap();
  assert_eq!(prompt.trim(), "Run review.");
}
