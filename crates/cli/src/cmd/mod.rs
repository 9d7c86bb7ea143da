mod cache;
mod clean;
mod install;
mod list;
mod uninstall;
mod update;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use arm_lib::install::{EngineConfig, InstallEngine, InstallReport};
use arm_lib::manifest::JsonManifestStore;
use arm_lib::registry::{ArmrcCredentials, DefaultBackendFactory, RegistryAdapter};
use arm_lib::resource::ResourceType;
use arm_lib::store::Store;
use arm_lib::types::PackageId;

use crate::output::{OutputFormat, print_error, print_json, print_package, print_success, print_warning, symbols};

pub use cache::{cmd_cache_clean, cmd_cache_nuke};
pub use clean::cmd_clean;
pub use install::cmd_install;
pub use list::{cmd_list, cmd_outdated};
pub use uninstall::cmd_uninstall;
pub use update::cmd_update;

/// Options shared by commands that reconcile packages.
#[derive(Args, Debug, Default)]
pub struct EngineArgs {
  /// Maximum number of packages installed in parallel
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Stop at the first failing package
  #[arg(long)]
  pub fail_fast: bool,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum TypeArg {
  #[default]
  Ruleset,
  Promptset,
}

impl From<TypeArg> for ResourceType {
  fn from(value: TypeArg) -> Self {
    match value {
      TypeArg::Ruleset => ResourceType::Ruleset,
      TypeArg::Promptset => ResourceType::Promptset,
    }
  }
}

/// Manifest entry fields for `install <package>`.
#[derive(Args, Debug, Default)]
pub struct EntryArgs {
  /// Resource type of the package
  #[arg(long = "type", value_enum, default_value_t)]
  pub resource_type: TypeArg,

  /// Sink to deploy into (repeatable)
  #[arg(long = "sink")]
  pub sinks: Vec<String>,

  /// Only take files matching this glob (repeatable)
  #[arg(long)]
  pub include: Vec<String>,

  /// Skip files matching this glob (repeatable)
  #[arg(long)]
  pub exclude: Vec<String>,

  /// Ordering weight in priority-indexed sinks
  #[arg(long)]
  pub priority: Option<i64>,
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// A token cancelled on Ctrl-C. Must be called from inside the runtime.
pub(crate) fn cancel_on_interrupt() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      token.cancel();
    }
  });
  cancel
}

/// Build an engine for the manifest at `manifest_path` backed by the shared cache.
pub(crate) fn engine(manifest_path: &Path, args: &EngineArgs) -> Result<InstallEngine> {
  let manifests = JsonManifestStore::new(manifest_path);
  let credentials = ArmrcCredentials::load(&manifests.base_dir()).context("Failed to read .armrc")?;
  let factory = DefaultBackendFactory::new(Arc::new(credentials));
  let adapter = RegistryAdapter::new(Store::open_default(), Arc::new(factory));

  let mut config = EngineConfig {
    fail_fast: args.fail_fast,
    ..EngineConfig::default()
  };
  if let Some(jobs) = args.jobs {
    config.parallelism = jobs.max(1);
  }

  Ok(InstallEngine::for_manifest(config, adapter, manifest_path))
}

pub(crate) fn parse_id(value: &str) -> Result<PackageId> {
  PackageId::parse(value).with_context(|| format!("Invalid package '{value}', expected registry/package"))
}

/// Print a reconciliation report and map it to the process exit code.
pub(crate) fn print_report(report: &InstallReport, output: OutputFormat) -> Result<ExitCode> {
  if output.is_json() {
    let installed: Vec<_> = report
      .installed
      .iter()
      .map(|p| {
        json!({
          "package": p.id.to_string(),
          "version": p.version,
          "integrity": p.integrity,
          "pinned": p.pinned,
          "sinks": p.sinks.iter().map(|(name, files)| json!({ "sink": name, "files": files })).collect::<Vec<_>>(),
        })
      })
      .collect();
    let failed: Vec<_> = report
      .failed
      .iter()
      .map(|f| {
        json!({
          "package": f.id.to_string(),
          "kind": f.error.kind().to_string(),
          "error": f.error.to_string(),
        })
      })
      .collect();
    let skipped: Vec<_> = report.skipped.iter().map(|id| id.to_string()).collect();

    print_json(&json!({
      "installed": installed,
      "failed": failed,
      "skipped": skipped,
      "pruned": report.pruned,
    }))?;
  } else {
    for p in &report.installed {
      let sinks: Vec<_> = p.sinks.iter().map(|(name, _)| name.as_str()).collect();
      let locked = if p.pinned { " (locked)" } else { "" };
      print_package(
        true,
        format!("{}@{}", p.id, p.version),
        &format!("{} {}{locked}", symbols::ARROW, sinks.join(", ")),
      );
    }
    for f in &report.failed {
      print_error(&format!("{} failed [{}]: {}", f.id, f.error.kind(), f.error));
    }
    for id in &report.skipped {
      print_warning(&format!("{id} skipped"));
    }
    for key in &report.pruned {
      println!("{} {key}", symbols::REMOVE);
    }

    if report.is_success() {
      println!();
      print_success(&format!("{} package(s) up to date", report.installed.len()));
    }
  }

  Ok(ExitCode::from(report.exit_code() as u8))
}
