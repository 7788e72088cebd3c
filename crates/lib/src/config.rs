//! Engine configuration.
//!
//! Defaults can be overridden through `STEVEDORE_*` environment variables.

use std::path::PathBuf;

use tracing::warn;

use crate::consts::{
  ENV_ALLOW_PLUGINS, ENV_BIN_DIR, ENV_NOTIFY, ENV_PARALLELISM, ENV_VENDOR_DIR, INSTALLED_FILENAME, STATE_DIR_NAME,
};
use crate::installer::PluginPolicy;

/// Downloads in flight at once unless configured otherwise.
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Root under which packages are installed.
  pub vendor_dir: PathBuf,

  /// Where package binaries are linked.
  pub bin_dir: PathBuf,

  /// Maximum number of downloads in flight at once.
  pub parallelism: usize,

  pub plugin_policy: PluginPolicy,

  /// Whether to report installs to the packages' notification endpoints.
  pub notify: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self::with_vendor_dir("vendor")
  }
}

impl EngineConfig {
  pub fn with_vendor_dir(vendor_dir: impl Into<PathBuf>) -> Self {
    let vendor_dir = vendor_dir.into();
    Self {
      bin_dir: vendor_dir.join("bin"),
      vendor_dir,
      parallelism: DEFAULT_PARALLELISM,
      plugin_policy: PluginPolicy::AllowAll,
      notify: true,
    }
  }

  /// Defaults overridden by whatever `STEVEDORE_*` variables are set.
  pub fn from_env() -> Self {
    let mut config = match std::env::var_os(ENV_VENDOR_DIR) {
      Some(dir) => Self::with_vendor_dir(dir),
      None => Self::default(),
    };

    if let Some(dir) = std::env::var_os(ENV_BIN_DIR) {
      config.bin_dir = PathBuf::from(dir);
    }

    if let Ok(value) = std::env::var(ENV_PARALLELISM) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(value = %value, "ignoring invalid {}", ENV_PARALLELISM),
      }
    }

    if let Ok(value) = std::env::var(ENV_ALLOW_PLUGINS) {
      config.plugin_policy = PluginPolicy::parse(&value);
    }

    if let Ok(value) = std::env::var(ENV_NOTIFY) {
      config.notify = !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
    }

    config
  }

  /// Path of the persisted installed store.
  pub fn installed_path(&self) -> PathBuf {
    self.vendor_dir.join(INSTALLED_FILENAME)
  }

  /// Directory downloads are staged in before being applied.
  pub fn staging_dir(&self) -> PathBuf {
    self.vendor_dir.join(STATE_DIR_NAME).join("staging")
  }

  /// Directory holding the exclusive run lock.
  pub fn state_dir(&self) -> PathBuf {
    self.vendor_dir.join(STATE_DIR_NAME)
  }
}
