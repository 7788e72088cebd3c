//! Default backend for ordinary code packages.
//!
//! Artifacts are downloaded into a per-package staging directory, moved into
//! `<vendor>/<name>` when applied, and their binaries are linked into the bin
//! dir.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::download::Downloader;
use crate::operation::OperationKind;
use crate::package::{Package, TYPE_LIBRARY};
use crate::store::InstalledStore;

use super::{BinaryLinker, InstallError, Installer, contained_path};

pub struct LibraryInstaller {
  vendor_dir: PathBuf,
  staging_dir: PathBuf,
  downloader: Arc<dyn Downloader>,
  linker: Arc<dyn BinaryLinker>,
}

impl LibraryInstaller {
  pub fn new(
    vendor_dir: impl Into<PathBuf>,
    staging_dir: impl Into<PathBuf>,
    downloader: Arc<dyn Downloader>,
    linker: Arc<dyn BinaryLinker>,
  ) -> Self {
    Self {
      vendor_dir: vendor_dir.into(),
      staging_dir: staging_dir.into(),
      downloader,
      linker,
    }
  }

  /// Directory the artifact for `package` is downloaded into before being applied.
  pub fn staging_path(&self, package: &Package) -> PathBuf {
    self.staging_dir.join(staging_key(package))
  }

  /// `<vendor>/<name>`, refusing names that would escape the vendor dir.
  pub fn package_path(&self, package: &Package) -> Result<PathBuf, InstallError> {
    let name = contained_path(&package.name).ok_or_else(|| InstallError::Rejected {
      package: package.to_string(),
      reason: "package name is not a relative path inside the vendor directory".to_string(),
    })?;
    Ok(self.vendor_dir.join(name))
  }

  /// Refuse packages whose name or binaries point outside their directories.
  fn check_layout(&self, package: &Package) -> Result<(), InstallError> {
    self.package_path(package)?;
    if let Some(binary) = package.binaries.iter().find(|b| contained_path(b).is_none()) {
      return Err(InstallError::Rejected {
        package: package.to_string(),
        reason: format!("binary {binary:?} is not a relative path inside the package"),
      });
    }
    Ok(())
  }

  async fn staged_artifact(&self, package: &Package) -> Result<PathBuf, InstallError> {
    let staging = self.staging_path(package);
    if fs::metadata(&staging).await.is_err() {
      return Err(InstallError::MissingArtifact {
        package: package.to_string(),
        path: staging,
      });
    }
    Ok(staging)
  }

  /// Move the staged artifact of `package` into its install path and link its binaries.
  async fn put_in_place(&self, package: &Package) -> Result<PathBuf, InstallError> {
    let install_path = self.package_path(package)?;
    let staging = self.staged_artifact(package).await?;

    remove_dir_if_exists(&install_path)
      .await
      .map_err(InstallError::io(&install_path))?;
    if let Some(parent) = install_path.parent() {
      fs::create_dir_all(parent).await.map_err(InstallError::io(parent))?;
    }

    debug!(from = %staging.display(), to = %install_path.display(), "moving package into place");
    fs::rename(&staging, &install_path)
      .await
      .map_err(InstallError::io(&install_path))?;

    self
      .linker
      .link(package, &install_path)
      .map_err(InstallError::io(&install_path))?;

    Ok(install_path)
  }

  /// Unlink binaries and delete the install path of `package`.
  async fn take_out_of_place(&self, package: &Package) -> Result<(), InstallError> {
    let install_path = self.package_path(package)?;

    self.linker.unlink(package).map_err(InstallError::io(&install_path))?;
    remove_dir_if_exists(&install_path)
      .await
      .map_err(InstallError::io(&install_path))?;

    // drop the now-empty vendor namespace directory, e.g. `vendor/acme`
    if let Some(parent) = install_path.parent()
      && parent != self.vendor_dir
    {
      let _ = fs::remove_dir(parent).await;
    }

    Ok(())
  }

  /// Unlink `package` and move its payload to a backup dir. `None` when nothing was on disk.
  async fn set_aside(&self, package: &Package) -> Result<Option<PathBuf>, InstallError> {
    let install_path = self.package_path(package)?;
    let backup = self.staging_dir.join(format!("{}.previous", staging_key(package)));

    self.linker.unlink(package).map_err(InstallError::io(&install_path))?;
    remove_dir_if_exists(&backup).await.map_err(InstallError::io(&backup))?;
    fs::create_dir_all(&self.staging_dir)
      .await
      .map_err(InstallError::io(&self.staging_dir))?;

    match fs::rename(&install_path, &backup).await {
      Ok(()) => Ok(Some(backup)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(InstallError::Io {
        path: install_path,
        source: e,
      }),
    }
  }

  /// Put a payload moved away by `set_aside` back and relink its binaries.
  async fn restore(&self, package: &Package, backup: Option<PathBuf>, replacement: &Package) -> io::Result<()> {
    let Ok(install_path) = self.package_path(package) else {
      return Ok(());
    };
    if let Ok(replacement_path) = self.package_path(replacement) {
      self.linker.unlink(replacement)?;
      remove_dir_if_exists(&replacement_path).await?;
    }

    if let Some(backup) = backup {
      if let Some(parent) = install_path.parent() {
        fs::create_dir_all(parent).await?;
      }
      fs::rename(&backup, &install_path).await?;
      self.linker.link(package, &install_path)?;
    }
    Ok(())
  }
}

#[async_trait]
impl Installer for LibraryInstaller {
  fn name(&self) -> &'static str {
    "library"
  }

  fn supports(&self, package_type: &str) -> bool {
    package_type == TYPE_LIBRARY
  }

  async fn download(&self, package: &Package, previous: Option<&Package>) -> Result<(), InstallError> {
    self.check_layout(package)?;

    let staging = self.staging_path(package);
    remove_dir_if_exists(&staging).await.map_err(InstallError::io(&staging))?;
    fs::create_dir_all(&staging).await.map_err(InstallError::io(&staging))?;

    self.downloader.download(package, &staging, previous).await?;
    Ok(())
  }

  async fn prepare(
    &self,
    kind: OperationKind,
    package: &Package,
    previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    debug!(package = %package.name, kind = %kind, "preparing");
    self.check_layout(package)?;
    if let Some(previous) = previous {
      self.package_path(previous)?;
    }
    Ok(())
  }

  async fn install(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    let install_path = self.put_in_place(package).await?;
    store.add(package.clone());

    info!(package = %package.name, version = %package.version, path = %install_path.display(), "installed");
    Ok(())
  }

  /// Replace `initial` with `target`. On failure the initial payload is put back.
  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    if !store.contains(&initial.name) {
      return Err(InstallError::NotInstalled {
        package: initial.to_string(),
      });
    }
    self.check_layout(target)?;
    self.staged_artifact(target).await?;

    let backup = self.set_aside(initial).await?;
    if let Err(e) = self.put_in_place(target).await {
      if let Err(restore) = self.restore(initial, backup, target).await {
        warn!(package = %initial.name, error = %restore, "failed to restore previous payload");
      }
      return Err(e);
    }
    if let Some(backup) = backup {
      remove_dir_if_exists(&backup).await.map_err(InstallError::io(&backup))?;
    }

    store.remove(&initial.name);
    store.add(target.clone());

    info!(package = %target.name, from = %initial.version, to = %target.version, "updated");
    Ok(())
  }

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    if !store.contains(&package.name) {
      return Err(InstallError::NotInstalled {
        package: package.to_string(),
      });
    }

    self.take_out_of_place(package).await?;
    store.remove(&package.name);

    info!(package = %package.name, "uninstalled");
    Ok(())
  }

  async fn cleanup(
    &self,
    kind: OperationKind,
    package: &Package,
    _previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    if kind == OperationKind::Uninstall {
      return Ok(());
    }

    let staging = self.staging_path(package);
    remove_dir_if_exists(&staging).await.map_err(InstallError::io(&staging))
  }

  fn install_path(&self, package: &Package) -> Option<PathBuf> {
    self.package_path(package).ok()
  }
}

pub(crate) async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
  match fs::remove_dir_all(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Readable and collision-free: `acme/log` and `acme_log` sanitize alike, their digests differ.
fn staging_key(package: &Package) -> String {
  let mut hasher = Sha256::new();
  hasher.update(package.name.as_bytes());
  hasher.update([0]);
  hasher.update(package.version.as_bytes());
  let digest = hex::encode(hasher.finalize());

  format!(
    "{}-{}-{}",
    sanitize(&package.name),
    sanitize(&package.version),
    &digest[..12]
  )
}

fn sanitize(value: &str) -> String {
  value
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
    .collect()
}
