//! Implementation of the `stv apply` command.
//!
//! Reads an operation plan, runs it through the engine against the vendor
//! directory configured by `STEVEDORE_*` variables, and reports the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stevedore_lib::config::EngineConfig;
use stevedore_lib::download::HttpDownloader;
use stevedore_lib::engine::{Engine, EngineError, ExecuteOptions};
use stevedore_lib::installer::{ActivePlugins, InstallerRegistry};
use stevedore_lib::operation::Operation;
use stevedore_lib::run_lock::{LockHolder, RunLock};
use stevedore_lib::signal::SignalListener;
use stevedore_lib::store::JsonStore;

use crate::output::{format_duration, print_error, print_info, print_stat, print_success};

pub struct ApplyArgs {
  pub plan: PathBuf,
  pub dev: bool,
  pub run_scripts: bool,
  pub download_only: bool,
  pub parallelism: Option<usize>,
}

/// The resolver's output: an ordered operation list.
#[derive(Debug, Deserialize)]
struct Plan {
  #[serde(default)]
  dev_mode: bool,
  operations: Vec<Operation>,
}

fn load_plan(path: &Path) -> Result<Plan> {
  let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read plan {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("Failed to parse plan {}", path.display()))
}

/// Execute the apply command.
///
/// Exits the process with `128 + signal` when interrupted by a signal.
pub fn cmd_apply(args: &ApplyArgs) -> Result<()> {
  let plan = load_plan(&args.plan)?;

  let mut config = EngineConfig::from_env();
  if let Some(parallelism) = args.parallelism {
    config.parallelism = parallelism.max(1);
  }

  let lock = RunLock::acquire(
    &config.state_dir(),
    LockHolder::Apply {
      plan: args.plan.clone(),
      operations: plan.operations.len(),
    },
  )?;
  let mut store = JsonStore::load(config.installed_path())?;

  let registry = InstallerRegistry::with_defaults(
    &config,
    Arc::new(HttpDownloader::default()),
    Arc::new(ActivePlugins::new()),
  );
  let mut engine = Engine::new(Arc::new(registry))
    .with_parallelism(config.parallelism)
    .with_notifications(config.notify);

  let options = ExecuteOptions {
    dev_mode: args.dev || plan.dev_mode,
    run_scripts: args.run_scripts,
    download_only: args.download_only,
  };

  info!(plan = %args.plan.display(), vendor = %config.vendor_dir.display(), "applying plan");
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let (result, signal) = rt.block_on(async {
    let cancel = CancellationToken::new();
    let signals = SignalListener::spawn(cancel.clone()).context("Failed to install signal handlers")?;
    let result = engine.execute(&mut store, &plan.operations, &options, &cancel).await;
    Ok::<_, anyhow::Error>((result, signals.received()))
  })?;

  match result {
    Ok(()) => {
      if plan.operations.is_empty() {
        print_info("Nothing to do.");
        return Ok(());
      }

      let verb = if options.download_only { "Downloaded" } else { "Applied" };
      print_success(&format!("{} {} operation(s)", verb, plan.operations.len()));
      print_stat("Vendor", &config.vendor_dir.display().to_string());
      print_stat("Duration", &format_duration(started.elapsed()));
      Ok(())
    }
    Err(EngineError::Interrupted) => {
      let code = signal.map_or(130, |s| s.exit_code());
      print_error(&format!(
        "Interrupted{}",
        signal.map(|s| format!(" by {}", s.name())).unwrap_or_default()
      ));
      drop(lock);
      std::process::exit(code);
    }
    Err(e) => Err(e).context("Apply failed"),
  }
}
