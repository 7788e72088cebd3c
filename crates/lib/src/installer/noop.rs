//! Generic fallback backend for types with no specialized installer.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::operation::OperationKind;
use crate::package::Package;
use crate::store::InstalledStore;

use super::{InstallError, Installer};

/// Records changes in the installed store and does nothing on disk.
#[derive(Debug, Clone, Default)]
pub struct NoopInstaller {
  /// Supported types; `None` supports every type.
  types: Option<BTreeSet<String>>,
}

impl NoopInstaller {
  /// A noop installer that supports every package type.
  pub fn any() -> Self {
    Self { types: None }
  }

  pub fn for_types<I, S>(types: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      types: Some(types.into_iter().map(Into::into).collect()),
    }
  }
}

#[async_trait]
impl Installer for NoopInstaller {
  fn name(&self) -> &'static str {
    "noop"
  }

  fn supports(&self, package_type: &str) -> bool {
    self.types.as_ref().is_none_or(|types| types.contains(package_type))
  }

  async fn download(&self, _package: &Package, _previous: Option<&Package>) -> Result<(), InstallError> {
    Ok(())
  }

  async fn prepare(
    &self,
    _kind: OperationKind,
    _package: &Package,
    _previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    Ok(())
  }

  async fn install(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    debug!(package = %package.name, "noop install");
    store.add(package.clone());
    Ok(())
  }

  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    debug!(package = %target.name, "noop update");
    store.remove(&initial.name);
    store.add(target.clone());
    Ok(())
  }

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    debug!(package = %package.name, "noop uninstall");
    store.remove(&package.name);
    Ok(())
  }

  async fn cleanup(
    &self,
    _kind: OperationKind,
    _package: &Package,
    _previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    Ok(())
  }

  fn install_path(&self, _package: &Package) -> Option<PathBuf> {
    None
  }
}
