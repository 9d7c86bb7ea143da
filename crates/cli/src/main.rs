mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arm_lib::install::InstallError;
use arm_lib::platform::paths::manifest_path;

use crate::cmd::{EngineArgs, EntryArgs};
use crate::output::{OutputFormat, print_error};

/// arm - package manager for AI coding-assistant rules and prompts
#[derive(Parser)]
#[command(name = "arm")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the manifest (default: $ARM_MANIFEST_PATH or ./arm.json)
  #[arg(long, global = true)]
  manifest: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install every manifest package, or add and install one package
  Install {
    /// Package to add, as registry/package or registry/package@constraint
    package: Option<String>,

    #[command(flatten)]
    entry: EntryArgs,

    #[command(flatten)]
    engine: EngineArgs,
  },

  /// Re-resolve packages within their declared constraints
  Update {
    /// Packages to update (default: all)
    packages: Vec<String>,

    #[command(flatten)]
    engine: EngineArgs,
  },

  /// Re-resolve packages and raise their constraints to the installed version
  Upgrade {
    /// Packages to upgrade (default: all)
    packages: Vec<String>,

    #[command(flatten)]
    engine: EngineArgs,
  },

  /// Remove a package from its sinks, the manifest and the lockfile
  Uninstall {
    /// Package to remove, as registry/package
    package: String,
  },

  /// List manifest packages and their locked versions
  List,

  /// Show packages with newer versions available
  Outdated,

  /// Remove files in sinks that no installed package owns
  Clean,

  /// Manage the package cache
  Cache {
    #[command(subcommand)]
    command: CacheCommands,
  },
}

#[derive(Subcommand)]
enum CacheCommands {
  /// Evict cached versions by age or idle time
  Clean(CacheCleanArgs),

  /// Delete the whole package cache
  Nuke,
}

#[derive(Args)]
struct CacheCleanArgs {
  /// Remove versions fetched longer ago than this (e.g. 30d)
  #[arg(long, value_parser = humantime::parse_duration)]
  max_age: Option<Duration>,

  /// Remove versions not used for this long (default: 30d)
  #[arg(long, value_parser = humantime::parse_duration)]
  max_idle: Option<Duration>,
}

fn init_logging(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("warn,arm=debug,arm_lib=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
  let manifest = cli.manifest.unwrap_or_else(manifest_path);
  let output = cli.output;

  match cli.command {
    Commands::Install { package, entry, engine } => {
      cmd::cmd_install(&manifest, package.as_deref(), &entry, &engine, output)
    }
    Commands::Update { packages, engine } => cmd::cmd_update(&manifest, &packages, &engine, false, output),
    Commands::Upgrade { packages, engine } => cmd::cmd_update(&manifest, &packages, &engine, true, output),
    Commands::Uninstall { package } => cmd::cmd_uninstall(&manifest, &package, output),
    Commands::List => cmd::cmd_list(&manifest, output),
    Commands::Outdated => cmd::cmd_outdated(&manifest, output),
    Commands::Clean => cmd::cmd_clean(&manifest, output),
    Commands::Cache { command } => match command {
      CacheCommands::Clean(args) => cmd::cmd_cache_clean(args.max_age, args.max_idle, output),
      CacheCommands::Nuke => cmd::cmd_cache_nuke(output),
    },
  }
}

/// Malformed input exits with 2; every other failure with 1.
fn exit_code_for(error: &anyhow::Error) -> u8 {
  match error.downcast_ref::<InstallError>() {
    Some(e) if e.exit_code() == 2 => 2,
    _ => 1,
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::from(exit_code_for(&e))
    }
  }
}
