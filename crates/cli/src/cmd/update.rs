use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use crate::cmd::{EngineArgs, cancel_on_interrupt, engine, parse_id, print_report, runtime};
use crate::output::OutputFormat;

/// Re-resolve packages; with `upgrade`, also raise their manifest constraints.
pub fn cmd_update(
  manifest: &Path,
  packages: &[String],
  args: &EngineArgs,
  upgrade: bool,
  output: OutputFormat,
) -> Result<ExitCode> {
  let engine = engine(manifest, args)?;
  let ids = packages.iter().map(|p| parse_id(p)).collect::<Result<Vec<_>>>()?;

  let rt = runtime()?;
  let report = rt.block_on(async {
    let cancel = cancel_on_interrupt();
    if upgrade {
      engine.upgrade(&cancel, &ids).await
    } else {
      engine.update(&cancel, &ids).await
    }
  })?;

  print_report(&report, output)
}
