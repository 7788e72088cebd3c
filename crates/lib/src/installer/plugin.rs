//! Backend for plugins and custom installers.
//!
//! A plugin is installed exactly like a library and then activated. A plugin
//! must never be left half-registered: when activation fails, the package that
//! was just put in place is uninstalled again before the error propagates.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::operation::OperationKind;
use crate::package::{Package, TYPE_INSTALLER, TYPE_PLUGIN};
use crate::store::InstalledStore;

use super::{InstallError, Installer, LibraryInstaller};

#[derive(Debug, Error)]
pub enum PluginError {
  #[error("{0} packages should declare a class in their extra metadata")]
  MissingClass(String),

  #[error("{0}")]
  Failed(String),
}

/// Activates and deactivates plugins once their payload is on disk.
///
/// Implementations may register new installer backends on activation.
pub trait PluginManager: Send + Sync {
  fn activate(&self, package: &Package) -> Result<(), PluginError>;

  fn deactivate(&self, package: &Package) -> Result<(), PluginError>;
}

/// Keeps track of which plugins are active.
///
/// Activation validates the `class` entry plugins must declare in their extra
/// metadata.
#[derive(Debug, Default)]
pub struct ActivePlugins {
  active: Mutex<BTreeSet<String>>,
}

impl ActivePlugins {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self, name: &str) -> bool {
    self.active.lock().unwrap_or_else(PoisonError::into_inner).contains(name)
  }

  pub fn names(&self) -> Vec<String> {
    self
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .cloned()
      .collect()
  }
}

impl PluginManager for ActivePlugins {
  fn activate(&self, package: &Package) -> Result<(), PluginError> {
    if package.package_type == TYPE_PLUGIN && !package.extra.contains_key("class") {
      return Err(PluginError::MissingClass(TYPE_PLUGIN.to_string()));
    }

    self
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(package.name.clone());
    Ok(())
  }

  fn deactivate(&self, package: &Package) -> Result<(), PluginError> {
    self
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&package.name);
    Ok(())
  }
}

/// Which plugins may be installed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PluginPolicy {
  #[default]
  AllowAll,
  DenyAll,
  /// Exact names, or prefixes ending in `*` such as `acme/*`.
  Allow(BTreeSet<String>),
}

impl PluginPolicy {
  /// Parse `*`, `none`, or a comma-separated list of names and patterns.
  pub fn parse(value: &str) -> Self {
    match value.trim() {
      "*" => PluginPolicy::AllowAll,
      "" | "none" => PluginPolicy::DenyAll,
      list => PluginPolicy::Allow(
        list
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(String::from)
          .collect(),
      ),
    }
  }

  pub fn allows(&self, name: &str) -> bool {
    match self {
      PluginPolicy::AllowAll => true,
      PluginPolicy::DenyAll => false,
      PluginPolicy::Allow(patterns) => patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
      }),
    }
  }
}

pub struct PluginInstaller {
  library: LibraryInstaller,
  plugins: Arc<dyn PluginManager>,
  policy: PluginPolicy,
}

impl PluginInstaller {
  pub fn new(library: LibraryInstaller, plugins: Arc<dyn PluginManager>, policy: PluginPolicy) -> Self {
    Self {
      library,
      plugins,
      policy,
    }
  }

  /// Activate `package`, uninstalling it again if activation fails.
  async fn activate_or_remove(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    let Err(source) = self.plugins.activate(package) else {
      info!(plugin = %package.name, "plugin activated");
      return Ok(());
    };

    warn!(plugin = %package.name, error = %source, "plugin activation failed, uninstalling");
    if let Err(e) = self.library.uninstall(store, package).await {
      error!(plugin = %package.name, error = %e, "failed to uninstall plugin after activation failure");
    }

    Err(InstallError::PluginActivation {
      package: package.to_string(),
      source,
    })
  }
}

#[async_trait]
impl Installer for PluginInstaller {
  fn name(&self) -> &'static str {
    "plugin"
  }

  fn supports(&self, package_type: &str) -> bool {
    package_type == TYPE_PLUGIN || package_type == TYPE_INSTALLER
  }

  async fn download(&self, package: &Package, previous: Option<&Package>) -> Result<(), InstallError> {
    self.library.download(package, previous).await
  }

  async fn prepare(
    &self,
    kind: OperationKind,
    package: &Package,
    previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    if matches!(kind, OperationKind::Install | OperationKind::Update) && !self.policy.allows(&package.name) {
      return Err(InstallError::Rejected {
        package: package.to_string(),
        reason: "plugin is not in the allowed plugins list".to_string(),
      });
    }

    self.library.prepare(kind, package, previous).await
  }

  async fn install(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    self.library.install(store, package).await?;
    self.activate_or_remove(store, package).await
  }

  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    if let Err(source) = self.plugins.deactivate(initial) {
      return Err(InstallError::PluginDeactivation {
        package: initial.to_string(),
        source,
      });
    }

    self.library.update(store, initial, target).await?;
    self.activate_or_remove(store, target).await
  }

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    if let Err(source) = self.plugins.deactivate(package) {
      return Err(InstallError::PluginDeactivation {
        package: package.to_string(),
        source,
      });
    }

    self.library.uninstall(store, package).await
  }

  async fn cleanup(
    &self,
    kind: OperationKind,
    package: &Package,
    previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    self.library.cleanup(kind, package, previous).await
  }

  fn install_path(&self, package: &Package) -> Option<PathBuf> {
    self.library.install_path(package)
  }
}
