//! Backend for packages without an on-disk payload.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::operation::OperationKind;
use crate::package::{Package, TYPE_METAPACKAGE};
use crate::store::InstalledStore;

use super::{InstallError, Installer};

/// Only mutates the installed store; download, prepare and cleanup do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetapackageInstaller;

#[async_trait]
impl Installer for MetapackageInstaller {
  fn name(&self) -> &'static str {
    "metapackage"
  }

  fn supports(&self, package_type: &str) -> bool {
    package_type == TYPE_METAPACKAGE
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
    store.add(package.clone());
    info!(package = %package.name, version = %package.version, "installed metapackage");
    Ok(())
  }

  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    if store.remove(&initial.name).is_none() {
      return Err(InstallError::NotInstalled {
        package: initial.to_string(),
      });
    }
    store.add(target.clone());
    info!(package = %target.name, from = %initial.version, to = %target.version, "updated metapackage");
    Ok(())
  }

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    if store.remove(&package.name).is_none() {
      return Err(InstallError::NotInstalled {
        package: package.to_string(),
      });
    }
    info!(package = %package.name, "uninstalled metapackage");
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
