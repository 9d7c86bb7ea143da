//! CLI smoke tests for arm.
//!
//! These tests run the binary against throwaway manifests and caches and check exit codes
//! and output. None of them touch the network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// An `arm` command with its cache and home redirected into `temp`.
fn arm_cmd(temp: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("arm");
  cmd
    .env("ARM_HOME", temp.path().join("cache"))
    .env("HOME", temp.path())
    .env_remove("ARM_MANIFEST_PATH")
    .current_dir(temp.path());
  cmd
}

fn temp_manifest(content: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("arm.json"), content).unwrap();
  temp
}

const EMPTY_MANIFEST: &str = r#"{ "version": "1", "registries": {}, "sinks": {}, "packages": {} }"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let temp = TempDir::new().unwrap();
  arm_cmd(&temp)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let temp = TempDir::new().unwrap();
  arm_cmd(&temp)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("arm"));
}

#[test]
fn subcommand_help_works() {
  let temp = TempDir::new().unwrap();
  for sub in ["install", "update", "upgrade", "uninstall", "list", "outdated", "clean", "cache"] {
    arm_cmd(&temp).args([sub, "--help"]).assert().success();
  }
}

// =============================================================================
// Manifest commands
// =============================================================================

#[test]
#[serial]
fn list_empty_manifest() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("No packages"));
}

#[test]
#[serial]
fn list_json_is_an_array() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .args(["list", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[]"));
}

#[test]
#[serial]
fn list_with_explicit_manifest_path() {
  let temp = TempDir::new().unwrap();
  let path = temp.path().join("nested").join("custom.json");
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(&path, EMPTY_MANIFEST).unwrap();

  arm_cmd(&temp)
    .arg("--manifest")
    .arg(&path)
    .arg("list")
    .assert()
    .success();
}

#[test]
#[serial]
fn malformed_manifest_exits_with_2() {
  let temp = temp_manifest("{ not json");
  arm_cmd(&temp).arg("list").assert().code(2);
}

#[test]
#[serial]
fn install_empty_manifest_succeeds() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp).arg("install").assert().success();
}

#[test]
#[serial]
fn install_package_without_sink_fails() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .args(["install", "reg/pkg"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--sink"));
}

#[test]
#[serial]
fn install_from_undeclared_registry_exits_with_2() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .args(["install", "reg/pkg@^1.0.0", "--sink", "s1"])
    .assert()
    .code(2);
}

#[test]
#[serial]
fn uninstall_unknown_package_fails() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .args(["uninstall", "reg/missing"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("reg/missing"));
}

#[test]
#[serial]
fn invalid_package_id_fails() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp).args(["uninstall", "no-slash"]).assert().failure();
}

#[test]
#[serial]
fn outdated_empty_manifest() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp)
    .arg("outdated")
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));
}

#[test]
#[serial]
fn clean_without_sinks_succeeds() {
  let temp = temp_manifest(EMPTY_MANIFEST);
  arm_cmd(&temp).arg("clean").assert().success();
}

// =============================================================================
// Cache
// =============================================================================

#[test]
#[serial]
fn cache_clean_empty_cache() {
  let temp = TempDir::new().unwrap();
  arm_cmd(&temp)
    .args(["cache", "clean", "--max-age", "1d"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache cleaned"));
}

#[test]
#[serial]
fn cache_clean_rejects_bad_duration() {
  let temp = TempDir::new().unwrap();
  arm_cmd(&temp).args(["cache", "clean", "--max-idle", "soon"]).assert().failure();
}

#[test]
#[serial]
fn cache_nuke_removes_registries() {
  let temp = TempDir::new().unwrap();
  let registries = temp.path().join("cache").join("storage").join("registries").join("abc");
  std::fs::create_dir_all(&registries).unwrap();

  arm_cmd(&temp).args(["cache", "nuke"]).assert().success();

  assert!(!registries.exists());
}
