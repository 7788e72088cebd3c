//! Status command implementation.
//!
//! Lists the packages recorded in the installed store.

use anyhow::Result;

use stevedore_lib::config::EngineConfig;
use stevedore_lib::run_lock::{LockHolder, RunLock};
use stevedore_lib::store::{InstalledStore, JsonStore};

use crate::output::{print_info, print_json, print_package, print_stat};

pub fn cmd_status(verbose: bool, json: bool) -> Result<()> {
  let config = EngineConfig::from_env();
  let _lock = RunLock::acquire(&config.state_dir(), LockHolder::Status)?;
  let store = JsonStore::load(config.installed_path())?;
  let packages = store.packages();

  if json {
    print_json(&serde_json::json!({ "vendor_dir": config.vendor_dir, "packages": packages }))?;
    return Ok(());
  }

  if packages.is_empty() {
    print_info("No packages installed.");
    return Ok(());
  }

  print_stat("Vendor", &config.vendor_dir.display().to_string());
  print_stat("Installed", &packages.len().to_string());
  println!();
  for package in packages {
    print_package(package, verbose);
  }

  Ok(())
}
