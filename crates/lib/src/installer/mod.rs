//! Installer backends and the registry that selects them by package type.
//!
//! Each backend knows how to download, prepare, apply and clean up one
//! package's change on disk. Backends are selected by [`Package::package_type`]
//! through an [`InstallerRegistry`]: the first registered backend that
//! supports a type wins, and no match is a typed error.

mod binaries;
mod library;
mod metapackage;
mod noop;
mod plugin;
mod project;

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::download::{DownloadError, Downloader};
use crate::operation::OperationKind;
use crate::package::Package;
use crate::store::InstalledStore;

pub use binaries::{BinDirLinker, BinaryLinker};
pub use library::LibraryInstaller;
pub use metapackage::MetapackageInstaller;
pub use noop::NoopInstaller;
pub use plugin::{ActivePlugins, PluginError, PluginInstaller, PluginManager, PluginPolicy};
pub use project::ProjectInstaller;

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("no installer supports package type \"{0}\"")]
  UnknownPackageType(String),

  #[error("the {installer} installer does not support {kind} of {package}")]
  UnsupportedOperation {
    installer: &'static str,
    kind: OperationKind,
    package: String,
  },

  #[error(transparent)]
  Download(#[from] DownloadError),

  #[error("{package} was rejected: {reason}")]
  Rejected { package: String, reason: String },

  #[error("failed to activate plugin {package}: {source}")]
  PluginActivation {
    package: String,
    #[source]
    source: PluginError,
  },

  #[error("failed to deactivate plugin {package}: {source}")]
  PluginDeactivation {
    package: String,
    #[source]
    source: PluginError,
  },

  #[error("{package} is not installed")]
  NotInstalled { package: String },

  #[error("artifact for {package} was never downloaded to {path}")]
  MissingArtifact { package: String, path: PathBuf },

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl InstallError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> InstallError {
    let path = path.into();
    move |source| InstallError::Io { path, source }
  }
}

/// `value` as a path that stays below whatever directory it is joined onto.
///
/// Absolute paths, drive prefixes, `.` and `..` are refused.
pub(crate) fn contained_path(value: &str) -> Option<&Path> {
  let path = Path::new(value);
  let mut components = path.components().peekable();
  components.peek()?;
  components
    .all(|component| matches!(component, Component::Normal(_)))
    .then_some(path)
}

/// One package-type-specific installation strategy.
///
/// `download` and `prepare` must not mutate the installed store. `cleanup`
/// releases temporary resources after success or failure and must be
/// idempotent.
#[async_trait]
pub trait Installer: Send + Sync {
  /// Short name used in logs and errors.
  fn name(&self) -> &'static str;

  fn supports(&self, package_type: &str) -> bool;

  fn is_installed(&self, store: &dyn InstalledStore, package: &Package) -> bool {
    store.has_package(package)
  }

  async fn download(&self, package: &Package, previous: Option<&Package>) -> Result<(), InstallError>;

  async fn prepare(&self, kind: OperationKind, package: &Package, previous: Option<&Package>)
  -> Result<(), InstallError>;

  async fn install(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError>;

  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError>;

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError>;

  async fn cleanup(&self, kind: OperationKind, package: &Package, previous: Option<&Package>)
  -> Result<(), InstallError>;

  /// Where the package lives on disk, if it has an on-disk payload at all.
  fn install_path(&self, package: &Package) -> Option<PathBuf>;
}

/// Ordered set of installer backends.
///
/// Shared behind an `Arc` so plugins can register new backends while a run is
/// in progress.
#[derive(Default)]
pub struct InstallerRegistry {
  installers: RwLock<Vec<Arc<dyn Installer>>>,
}

impl InstallerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The stock backends: plugins and installers, libraries, metapackages.
  pub fn with_defaults(
    config: &EngineConfig,
    downloader: Arc<dyn Downloader>,
    plugins: Arc<dyn PluginManager>,
  ) -> Self {
    let linker: Arc<dyn BinaryLinker> = Arc::new(BinDirLinker::new(&config.bin_dir));
    let library = || {
      LibraryInstaller::new(
        &config.vendor_dir,
        config.staging_dir(),
        downloader.clone(),
        linker.clone(),
      )
    };

    let registry = Self::new();
    registry.register(Arc::new(PluginInstaller::new(
      library(),
      plugins,
      config.plugin_policy.clone(),
    )));
    registry.register(Arc::new(library()));
    registry.register(Arc::new(MetapackageInstaller));
    registry
  }

  pub fn register(&self, installer: Arc<dyn Installer>) {
    debug!(installer = installer.name(), "registering installer");
    self
      .installers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(installer);
  }

  /// The first registered installer supporting `package_type`.
  pub fn get(&self, package_type: &str) -> Result<Arc<dyn Installer>, InstallError> {
    self
      .installers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .find(|installer| installer.supports(package_type))
      .cloned()
      .ok_or_else(|| InstallError::UnknownPackageType(package_type.to_string()))
  }

  pub fn installer_for(&self, package: &Package) -> Result<Arc<dyn Installer>, InstallError> {
    self.get(&package.package_type)
  }

  pub fn len(&self) -> usize {
    self.installers.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
