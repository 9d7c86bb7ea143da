use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use crate::cmd::{EngineArgs, cancel_on_interrupt, engine, runtime};
use crate::output::{OutputFormat, print_json, print_stat, print_success, symbols};

pub fn cmd_clean(manifest: &Path, output: OutputFormat) -> Result<ExitCode> {
  let engine = engine(manifest, &EngineArgs::default())?;

  let rt = runtime()?;
  let cleaned = rt.block_on(async {
    let cancel = cancel_on_interrupt();
    engine.clean_sinks(&cancel).await
  })?;

  if output.is_json() {
    let sinks: Vec<_> = cleaned
      .iter()
      .map(|c| json!({ "sink": c.sink, "removed": c.removed }))
      .collect();
    print_json(&sinks)?;
    return Ok(ExitCode::SUCCESS);
  }

  let mut total = 0;
  for sink in &cleaned {
    for path in &sink.removed {
      println!("{} {}", symbols::REMOVE, path.display());
    }
    total += sink.removed.len();
  }

  println!();
  print_success("Sinks cleaned");
  print_stat("Files removed", &total.to_string());
  print_stat("Sinks", &cleaned.len().to_string());

  Ok(ExitCode::SUCCESS)
}
