use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use crate::cmd::{EngineArgs, cancel_on_interrupt, engine, runtime};
use crate::output::{OutputFormat, print_info, print_json, print_package, print_stat, short_integrity, symbols};

pub fn cmd_list(manifest: &Path, output: OutputFormat) -> Result<ExitCode> {
  let engine = engine(manifest, &EngineArgs::default())?;
  let packages = engine.list()?;

  if output.is_json() {
    let packages: Vec<_> = packages
      .iter()
      .map(|p| {
        json!({
          "package": p.id.to_string(),
          "type": p.resource_type,
          "constraint": p.constraint,
          "version": p.version,
          "integrity": p.integrity,
          "sinks": p.sinks,
        })
      })
      .collect();
    print_json(&packages)?;
    return Ok(ExitCode::SUCCESS);
  }

  if packages.is_empty() {
    print_info("No packages in manifest");
    return Ok(ExitCode::SUCCESS);
  }

  for p in &packages {
    let version = p.version.as_deref().unwrap_or("not installed");
    print_info(&format!("{} ({}) {} {}", p.id, p.resource_type, p.constraint, version));
    print_stat("sinks", &p.sinks.join(", "));
    if let Some(integrity) = &p.integrity {
      print_stat("integrity", &short_integrity(integrity.as_str()));
    }
  }

  Ok(ExitCode::SUCCESS)
}

pub fn cmd_outdated(manifest: &Path, output: OutputFormat) -> Result<ExitCode> {
  let engine = engine(manifest, &EngineArgs::default())?;

  let rt = runtime()?;
  let outdated = rt.block_on(async {
    let cancel = cancel_on_interrupt();
    engine.outdated(&cancel).await
  })?;

  if output.is_json() {
    let packages: Vec<_> = outdated
      .iter()
      .map(|p| {
        json!({
          "package": p.id.to_string(),
          "constraint": p.constraint,
          "current": p.current,
          "wanted": p.wanted,
          "latest": p.latest,
        })
      })
      .collect();
    print_json(&packages)?;
    return Ok(ExitCode::SUCCESS);
  }

  if outdated.is_empty() {
    print_info("All packages are up to date");
    return Ok(ExitCode::SUCCESS);
  }

  for p in &outdated {
    let current = p.current.as_deref().unwrap_or("-");
    print_package(false, &p.id, &format!("{current} {} {}", symbols::ARROW, p.wanted));
    if p.latest != p.wanted {
      print_stat("latest", &p.latest);
    }
  }

  Ok(ExitCode::SUCCESS)
}
