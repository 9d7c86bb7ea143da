use std::path::Path;
use std::process::ExitCode;

use anyhow::{Result, bail};

use arm_lib::manifest::PackageEntry;

use crate::cmd::{EngineArgs, EntryArgs, cancel_on_interrupt, engine, parse_id, print_report, runtime};
use crate::output::OutputFormat;

const DEFAULT_CONSTRAINT: &str = "latest";

/// Split `registry/package[@constraint]`.
fn split_target(target: &str) -> (&str, &str) {
  match target.split_once('@') {
    Some((id, constraint)) if !constraint.is_empty() => (id, constraint),
    Some((id, _)) => (id, DEFAULT_CONSTRAINT),
    None => (target, DEFAULT_CONSTRAINT),
  }
}

pub fn cmd_install(
  manifest: &Path,
  package: Option<&str>,
  entry: &EntryArgs,
  args: &EngineArgs,
  output: OutputFormat,
) -> Result<ExitCode> {
  let engine = engine(manifest, args)?;

  let target = match package {
    Some(target) => {
      if entry.sinks.is_empty() {
        bail!("Installing a package requires at least one --sink");
      }
      let (id, constraint) = split_target(target);
      let id = parse_id(id)?;
      let mut new_entry = PackageEntry::new(entry.resource_type.into(), constraint, entry.sinks.clone());
      new_entry.include = entry.include.clone();
      new_entry.exclude = entry.exclude.clone();
      new_entry.priority = entry.priority;
      Some((id, new_entry))
    }
    None => None,
  };

  let rt = runtime()?;
  let report = rt.block_on(async {
    let cancel = cancel_on_interrupt();
    match target {
      Some((id, new_entry)) => engine.install(&cancel, &id, new_entry).await,
      None => engine.install_all(&cancel).await,
    }
  })?;

  print_report(&report, output)
}
