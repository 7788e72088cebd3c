mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{ApplyArgs, cmd_apply, cmd_status};

/// stevedore - apply resolved package operations to a vendor directory
#[derive(Parser)]
#[command(name = "stv")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Apply an operation plan produced by the resolver
  Apply {
    /// Path to the plan file
    plan: PathBuf,

    /// Include dev requirements in this run
    #[arg(long)]
    dev: bool,

    /// Do not fire package lifecycle events
    #[arg(long)]
    no_scripts: bool,

    /// Only download artifacts, without installing anything
    #[arg(long)]
    download_only: bool,

    /// Maximum number of concurrent downloads
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,
  },

  /// List installed packages
  Status {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Apply {
      plan,
      dev,
      no_scripts,
      download_only,
      parallelism,
    } => cmd_apply(&ApplyArgs {
      plan,
      dev,
      run_scripts: !no_scripts,
      download_only,
      parallelism,
    }),
    Commands::Status { json } => cmd_status(cli.verbose, json),
  }
}
