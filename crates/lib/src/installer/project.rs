//! Backend for the root package of a fresh project scaffold.
//!
//! The project's artifact is staged next to the target directory and moved
//! into it on install. The target must be missing or empty. Updates and
//! uninstalls are not supported, and the root package is not recorded in the
//! installed store: it is the project, not one of its dependencies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::download::Downloader;
use crate::operation::OperationKind;
use crate::package::Package;
use crate::store::InstalledStore;

use super::library::remove_dir_if_exists;
use super::{InstallError, Installer};

pub struct ProjectInstaller {
  target_dir: PathBuf,
  staging_dir: PathBuf,
  downloader: Arc<dyn Downloader>,
}

impl ProjectInstaller {
  pub fn new(target_dir: impl Into<PathBuf>, downloader: Arc<dyn Downloader>) -> Self {
    let target_dir = target_dir.into();
    let staging_dir = staging_dir_for(&target_dir);
    Self {
      target_dir,
      staging_dir,
      downloader,
    }
  }

  fn unsupported(&self, kind: OperationKind, package: &Package) -> InstallError {
    InstallError::UnsupportedOperation {
      installer: self.name(),
      kind,
      package: package.to_string(),
    }
  }

  async fn ensure_target_is_free(&self, package: &Package) -> Result<(), InstallError> {
    match fs::read_dir(&self.target_dir).await {
      Ok(mut entries) => {
        let has_entries = entries
          .next_entry()
          .await
          .map_err(InstallError::io(&self.target_dir))?
          .is_some();
        if has_entries {
          return Err(InstallError::Rejected {
            package: package.to_string(),
            reason: format!("project directory {} is not empty", self.target_dir.display()),
          });
        }
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(InstallError::Io {
        path: self.target_dir.clone(),
        source,
      }),
    }
  }
}

/// `/work/app` stages into `/work/.app.staging`.
fn staging_dir_for(target_dir: &Path) -> PathBuf {
  let name = target_dir
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "project".to_string());
  target_dir.with_file_name(format!(".{}.staging", name))
}

#[async_trait]
impl Installer for ProjectInstaller {
  fn name(&self) -> &'static str {
    "project"
  }

  /// Any type: the project installer is only ever registered for a scaffold run.
  fn supports(&self, _package_type: &str) -> bool {
    true
  }

  async fn download(&self, package: &Package, previous: Option<&Package>) -> Result<(), InstallError> {
    if previous.is_some() {
      return Err(self.unsupported(OperationKind::Update, package));
    }
    self.ensure_target_is_free(package).await?;

    remove_dir_if_exists(&self.staging_dir)
      .await
      .map_err(InstallError::io(&self.staging_dir))?;
    fs::create_dir_all(&self.staging_dir)
      .await
      .map_err(InstallError::io(&self.staging_dir))?;

    self.downloader.download(package, &self.staging_dir, previous).await?;
    Ok(())
  }

  async fn prepare(
    &self,
    kind: OperationKind,
    package: &Package,
    _previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    match kind {
      OperationKind::Install => Ok(()),
      other => Err(self.unsupported(other, package)),
    }
  }

  async fn install(&self, _store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    self.ensure_target_is_free(package).await?;

    if fs::metadata(&self.staging_dir).await.is_err() {
      return Err(InstallError::MissingArtifact {
        package: package.to_string(),
        path: self.staging_dir.clone(),
      });
    }

    remove_dir_if_exists(&self.target_dir)
      .await
      .map_err(InstallError::io(&self.target_dir))?;
    fs::rename(&self.staging_dir, &self.target_dir)
      .await
      .map_err(InstallError::io(&self.target_dir))?;

    info!(package = %package.name, path = %self.target_dir.display(), "created project");
    Ok(())
  }

  async fn update(
    &self,
    _store: &mut dyn InstalledStore,
    _initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    Err(self.unsupported(OperationKind::Update, target))
  }

  async fn uninstall(&self, _store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    Err(self.unsupported(OperationKind::Uninstall, package))
  }

  async fn cleanup(
    &self,
    _kind: OperationKind,
    _package: &Package,
    _previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    remove_dir_if_exists(&self.staging_dir)
      .await
      .map_err(InstallError::io(&self.staging_dir))
  }

  fn install_path(&self, _package: &Package) -> Option<PathBuf> {
    Some(self.target_dir.clone())
  }
}
