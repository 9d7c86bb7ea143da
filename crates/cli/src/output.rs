//! Terminal and JSON output for the CLI.
//!
//! Status lines go to stdout, diagnostics to stderr. Colors are applied only when the target
//! stream supports them.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use arm_lib::util::hash::INTEGRITY_PREFIX;

/// Hex digits of an integrity digest shown in text output.
const SHORT_DIGEST_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const REMOVE: &str = "-";
}

#[derive(Clone, Copy)]
enum Tone {
  Good,
  Bad,
  Caution,
  Neutral,
}

impl Tone {
  fn symbol(self) -> &'static str {
    match self {
      Tone::Good => symbols::SUCCESS,
      Tone::Bad => symbols::ERROR,
      Tone::Caution => symbols::WARNING,
      Tone::Neutral => symbols::INFO,
    }
  }

  fn paint<T: Display + OwoColorize>(self, stream: Stream, value: T) -> String {
    match self {
      Tone::Good => value.if_supports_color(stream, |v| v.green()).to_string(),
      Tone::Bad => value.if_supports_color(stream, |v| v.red()).to_string(),
      Tone::Caution => value.if_supports_color(stream, |v| v.yellow()).to_string(),
      Tone::Neutral => value.if_supports_color(stream, |v| v.blue()).to_string(),
    }
  }
}

/// A symbol-prefixed line. Diagnostics (errors and warnings) are colored as a whole and go to
/// stderr; everything else colors only the symbol.
fn status_line(tone: Tone, message: &str) {
  match tone {
    Tone::Bad | Tone::Caution => {
      eprintln!("{} {}", tone.paint(Stream::Stderr, tone.symbol()), tone.paint(Stream::Stderr, message));
    }
    Tone::Good | Tone::Neutral => println!("{} {}", tone.paint(Stream::Stdout, tone.symbol()), message),
  }
}

pub fn print_success(message: &str) {
  status_line(Tone::Good, message);
}

pub fn print_error(message: &str) {
  status_line(Tone::Bad, message);
}

pub fn print_warning(message: &str) {
  status_line(Tone::Caution, message);
}

pub fn print_info(message: &str) {
  status_line(Tone::Neutral, message);
}

/// An indented `label: value` detail under a status line.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |l| l.dimmed()), value);
}

/// A package line: `<symbol> <package> <detail>`.
pub fn print_package(ok: bool, package: impl Display, detail: &str) {
  let tone = if ok { Tone::Good } else { Tone::Caution };
  println!("{} {} {}", tone.paint(Stream::Stdout, tone.symbol()), package, detail);
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

/// `sha256-<hex>` cut down to the algorithm and the leading digits.
pub fn short_integrity(integrity: &str) -> String {
  match integrity.strip_prefix(INTEGRITY_PREFIX) {
    Some(digest) => format!("{INTEGRITY_PREFIX}{}", &digest[..digest.len().min(SHORT_DIGEST_LEN)]),
    None => integrity.to_string(),
  }
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  let mut value = bytes as f64;
  let mut unit = None;
  for next in UNITS {
    if value < 1024.0 {
      break;
    }
    value /= 1024.0;
    unit = Some(next);
  }

  match unit {
    Some(unit) => format!("{value:.1} {unit}"),
    None => format!("{bytes} B"),
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    60.. => format!("{}m {}s", secs / 60, secs % 60),
    1.. => format!("{secs}.{:02}s", duration.subsec_millis() / 10),
    0 => format!("{}ms", duration.subsec_millis()),
  }
}
