use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use crate::cmd::{EngineArgs, cancel_on_interrupt, engine, parse_id, runtime};
use crate::output::{OutputFormat, print_info, print_json, print_success};

pub fn cmd_uninstall(manifest: &Path, package: &str, output: OutputFormat) -> Result<ExitCode> {
  let engine = engine(manifest, &EngineArgs::default())?;
  let id = parse_id(package)?;

  let rt = runtime()?;
  let sinks = rt.block_on(async {
    let cancel = cancel_on_interrupt();
    engine.uninstall(&cancel, &id).await
  })?;

  if output.is_json() {
    print_json(&json!({
      "package": id.to_string(),
      "sinks": sinks,
    }))?;
  } else {
    if sinks.is_empty() {
      print_info("No deployed files found");
    }
    print_success(&format!("Uninstalled {id}"));
  }

  Ok(ExitCode::SUCCESS)
}
