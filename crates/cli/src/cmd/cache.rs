use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use arm_lib::store::{EvictStats, Store};

use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success};

const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn merge(total: &mut EvictStats, stats: EvictStats) {
  total.versions_scanned = total.versions_scanned.max(stats.versions_scanned);
  total.versions_removed += stats.versions_removed;
  total.staging_removed += stats.staging_removed;
  total.bytes_freed += stats.bytes_freed;
  total.removed_paths.extend(stats.removed_paths);
}

/// Evict cached versions by age and/or idle time. With neither limit given, versions idle
/// for 30 days are removed.
pub fn cmd_cache_clean(
  max_age: Option<Duration>,
  max_idle: Option<Duration>,
  output: OutputFormat,
) -> Result<ExitCode> {
  let start = Instant::now();
  let store = Store::open_default();
  let cancel = CancellationToken::new();

  let max_idle = match (max_age, max_idle) {
    (None, None) => Some(DEFAULT_MAX_IDLE),
    (_, idle) => idle,
  };

  let mut stats = EvictStats::default();
  if let Some(age) = max_age {
    merge(&mut stats, store.evict_by_age(&cancel, age).context("Failed to evict cache")?);
  }
  if let Some(idle) = max_idle {
    merge(&mut stats, store.evict_by_idle(&cancel, idle).context("Failed to evict cache")?);
  }

  if output.is_json() {
    print_json(&stats)?;
  } else {
    println!();
    print_success("Cache cleaned");
    print_stat("Versions removed", &stats.versions_removed.to_string());
    print_stat("Staging dirs removed", &stats.staging_removed.to_string());
    print_stat("Space freed", &format_bytes(stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(ExitCode::SUCCESS)
}

pub fn cmd_cache_nuke(output: OutputFormat) -> Result<ExitCode> {
  let store = Store::open_default();
  store.wipe().context("Failed to remove cache")?;

  if output.is_json() {
    print_json(&json!({ "removed": store.root() }))?;
  } else {
    print_success(&format!("Removed {}", store.root().display()));
  }

  Ok(ExitCode::SUCCESS)
}
