#![allow(dead_code)]

//! Shared fixtures: real backends wrapped in instrumentation, plus fakes for
//! the edges the engine talks to (downloads, plugins, store, listeners).

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use stevedore_lib::config::EngineConfig;
use stevedore_lib::download::{DownloadError, Downloader};
use stevedore_lib::engine::Engine;
use stevedore_lib::events::{EventDispatcher, EventError, PackageEvent, PackageEventKind};
use stevedore_lib::installer::{
  BinDirLinker, BinaryLinker, InstallError, Installer, InstallerRegistry, LibraryInstaller, MetapackageInstaller,
  PluginError, PluginInstaller, PluginManager, PluginPolicy,
};
use stevedore_lib::operation::{Operation, OperationKind};
use stevedore_lib::package::{
  EXTRA_PLUGIN_MODIFIES_DOWNLOADS, Package, TYPE_INSTALLER, TYPE_LIBRARY, TYPE_METAPACKAGE, TYPE_PLUGIN,
};
use stevedore_lib::store::{InstalledStore, MemoryStore, StoreError};

/// Ordered log of everything the fakes observed, e.g. `download-start:acme/a`.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn push(&self, entry: impl Into<String>) {
    self.0.lock().unwrap().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  /// Index of the first entry equal to `entry`; panics when absent.
  pub fn position(&self, entry: &str) -> usize {
    let entries = self.entries();
    entries
      .iter()
      .position(|e| e == entry)
      .unwrap_or_else(|| panic!("{entry:?} not in journal: {entries:#?}"))
  }

  /// Index of the last entry equal to `entry`; panics when absent.
  pub fn last_position(&self, entry: &str) -> usize {
    let entries = self.entries();
    entries
      .iter()
      .rposition(|e| e == entry)
      .unwrap_or_else(|| panic!("{entry:?} not in journal: {entries:#?}"))
  }

  pub fn contains(&self, entry: &str) -> bool {
    self.entries().iter().any(|e| e == entry)
  }

  pub fn count(&self, entry: &str) -> usize {
    self.entries().iter().filter(|e| *e == entry).count()
  }

  /// Entries starting with `prefix`, in order.
  pub fn matching(&self, prefix: &str) -> Vec<String> {
    self.entries().into_iter().filter(|e| e.starts_with(prefix)).collect()
  }
}

/// Writes a small artifact file, optionally slowly, and tracks concurrency.
#[derive(Default)]
pub struct FakeDownloader {
  journal: Journal,
  delays: Mutex<BTreeMap<String, Duration>>,
  hollow: Mutex<BTreeSet<String>>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl FakeDownloader {
  pub fn set_delay(&self, name: &str, delay: Duration) {
    self.delays.lock().unwrap().insert(name.to_string(), delay);
  }

  /// Report success for `name@version` without leaving anything staged.
  pub fn leave_nothing(&self, versioned: &str) {
    self.hollow.lock().unwrap().insert(versioned.to_string());
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Downloader for FakeDownloader {
  async fn download(
    &self,
    package: &Package,
    dest: &Path,
    _previous: Option<&Package>,
  ) -> Result<PathBuf, DownloadError> {
    self.journal.push(format!("download-start:{}", package.name));
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let delay = self.delays.lock().unwrap().get(&package.name).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let path = dest.join("artifact.txt");
    let result = tokio::fs::write(&path, format!("{}@{}", package.name, package.version))
      .await
      .map_err(|source| DownloadError::Io {
        path: path.clone(),
        source,
      });

    let hollow = self
      .hollow
      .lock()
      .unwrap()
      .contains(&format!("{}@{}", package.name, package.version));
    let result = match result {
      Ok(()) if hollow => tokio::fs::remove_dir_all(dest)
        .await
        .map_err(|source| DownloadError::Io {
          path: dest.to_path_buf(),
          source,
        }),
      other => other,
    };

    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    self.journal.push(format!("download-end:{}", package.name));
    result.map(|()| path)
  }
}

/// Plugin manager that can be told to fail activation or to contribute a backend.
#[derive(Default)]
pub struct FakePluginManager {
  journal: Journal,
  failing: Mutex<BTreeSet<String>>,
  contributions: Mutex<BTreeMap<String, Arc<dyn Installer>>>,
  registry: Mutex<Weak<InstallerRegistry>>,
}

impl FakePluginManager {
  pub fn fail_activation(&self, name: &str) {
    self.failing.lock().unwrap().insert(name.to_string());
  }

  /// Register `installer` once the plugin `name` is activated.
  pub fn contributes(&self, name: &str, installer: Arc<dyn Installer>) {
    self.contributions.lock().unwrap().insert(name.to_string(), installer);
  }
}

impl PluginManager for FakePluginManager {
  fn activate(&self, package: &Package) -> Result<(), PluginError> {
    self.journal.push(format!("activate:{}", package.name));
    if self.failing.lock().unwrap().contains(&package.name) {
      return Err(PluginError::Failed("activation hook exploded".to_string()));
    }

    let contribution = self.contributions.lock().unwrap().get(&package.name).cloned();
    if let Some(installer) = contribution
      && let Some(registry) = self.registry.lock().unwrap().upgrade()
    {
      registry.register(installer);
    }
    Ok(())
  }

  fn deactivate(&self, package: &Package) -> Result<(), PluginError> {
    self.journal.push(format!("deactivate:{}", package.name));
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Download,
  Prepare,
  Apply,
  Cleanup,
}

/// Wraps a real backend: journals every call and fails on request.
///
/// Failures are matched by package name, or by `name@version`.
pub struct Instrumented {
  inner: Arc<dyn Installer>,
  journal: Journal,
  controls: Controls,
}

/// What the harness tells instrumented backends to do, shared by all of them.
#[derive(Clone, Default)]
pub struct Controls {
  failures: Arc<Mutex<Vec<(Step, String)>>>,
  interrupts: Arc<Mutex<Vec<(String, CancellationToken)>>>,
}

impl Instrumented {
  pub fn new(inner: Arc<dyn Installer>, journal: Journal, controls: Controls) -> Self {
    Self {
      inner,
      journal,
      controls,
    }
  }

  /// Cancel the run from inside the apply step of `package` and never finish it.
  async fn interrupt_if_asked(&self, package: &Package) {
    let token = self
      .controls
      .interrupts
      .lock()
      .unwrap()
      .iter()
      .find(|(name, _)| *name == package.name)
      .map(|(_, token)| token.clone());
    if let Some(token) = token {
      self.journal.push(format!("interrupted:{}", package.name));
      token.cancel();
      std::future::pending::<()>().await;
    }
  }

  fn check(&self, step: Step, package: &Package) -> Result<(), InstallError> {
    let versioned = format!("{}@{}", package.name, package.version);
    let fails = self
      .controls
      .failures
      .lock()
      .unwrap()
      .iter()
      .any(|(s, name)| *s == step && (*name == package.name || *name == versioned));
    if !fails {
      return Ok(());
    }

    Err(match step {
      Step::Download => InstallError::Download(DownloadError::FetchFailed {
        url: format!("https://dist.invalid/{}", package.name),
        message: "connection reset".to_string(),
      }),
      Step::Prepare => InstallError::Rejected {
        package: package.to_string(),
        reason: "forced".to_string(),
      },
      Step::Apply | Step::Cleanup => InstallError::Io {
        path: PathBuf::from(&package.name),
        source: io::Error::other("forced"),
      },
    })
  }
}

#[async_trait]
impl Installer for Instrumented {
  fn name(&self) -> &'static str {
    self.inner.name()
  }

  fn supports(&self, package_type: &str) -> bool {
    self.inner.supports(package_type)
  }

  async fn download(&self, package: &Package, previous: Option<&Package>) -> Result<(), InstallError> {
    self.check(Step::Download, package)?;
    self.inner.download(package, previous).await
  }

  async fn prepare(
    &self,
    kind: OperationKind,
    package: &Package,
    previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    self.journal.push(format!("prepare:{}", package.name));
    self.check(Step::Prepare, package)?;
    self.inner.prepare(kind, package, previous).await
  }

  async fn install(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    self.journal.push(format!("install:{}", package.name));
    self.check(Step::Apply, package)?;
    self.interrupt_if_asked(package).await;
    self.inner.install(store, package).await
  }

  async fn update(
    &self,
    store: &mut dyn InstalledStore,
    initial: &Package,
    target: &Package,
  ) -> Result<(), InstallError> {
    self.journal.push(format!("update:{}", target.name));
    self.check(Step::Apply, target)?;
    self.interrupt_if_asked(target).await;
    self.inner.update(store, initial, target).await
  }

  async fn uninstall(&self, store: &mut dyn InstalledStore, package: &Package) -> Result<(), InstallError> {
    self.journal.push(format!("uninstall:{}", package.name));
    self.check(Step::Apply, package)?;
    self.inner.uninstall(store, package).await
  }

  async fn cleanup(
    &self,
    kind: OperationKind,
    package: &Package,
    previous: Option<&Package>,
  ) -> Result<(), InstallError> {
    self.journal.push(format!("cleanup:{}", package.name));
    self.check(Step::Cleanup, package)?;
    self.inner.cleanup(kind, package, previous).await
  }

  fn install_path(&self, package: &Package) -> Option<PathBuf> {
    self.inner.install_path(package)
  }
}

/// Memory store that snapshots its contents on every persist.
#[derive(Debug, Default)]
pub struct RecordingStore {
  inner: MemoryStore,
  journal: Journal,
  snapshots: Vec<Vec<String>>,
}

impl RecordingStore {
  pub fn new(journal: Journal) -> Self {
    Self {
      inner: MemoryStore::new(),
      journal,
      snapshots: Vec::new(),
    }
  }

  pub fn with_packages(journal: Journal, packages: impl IntoIterator<Item = Package>) -> Self {
    Self {
      inner: MemoryStore::with_packages(packages),
      journal,
      snapshots: Vec::new(),
    }
  }

  /// One entry per persist call, each listing `name@version` of every stored package.
  pub fn snapshots(&self) -> &[Vec<String>] {
    &self.snapshots
  }

  /// What a fresh process would load: the last persisted state.
  pub fn last_persisted(&self) -> Option<&Vec<String>> {
    self.snapshots.last()
  }

  pub fn describe(&self) -> Vec<String> {
    self
      .inner
      .packages()
      .into_iter()
      .map(|p| format!("{}@{}", p.name, p.version))
      .collect()
  }
}

impl InstalledStore for RecordingStore {
  fn add(&mut self, package: Package) {
    self.inner.add(package);
  }

  fn remove(&mut self, name: &str) -> Option<Package> {
    self.inner.remove(name)
  }

  fn get(&self, name: &str) -> Option<&Package> {
    self.inner.get(name)
  }

  fn packages(&self) -> Vec<&Package> {
    self.inner.packages()
  }

  fn persist(&mut self) -> Result<(), StoreError> {
    self.journal.push("persist");
    self.snapshots.push(self.describe());
    self.inner.persist()
  }
}

/// Records every event as `event:<name>:<package>`.
#[derive(Default)]
pub struct RecordingDispatcher {
  journal: Journal,
  fail_on: Mutex<Option<(PackageEventKind, String)>>,
  seen: Mutex<Vec<(PackageEventKind, String, usize, bool)>>,
}

impl RecordingDispatcher {
  pub fn new(journal: Journal) -> Self {
    Self {
      journal,
      ..Default::default()
    }
  }

  pub fn fail_on(&self, kind: PackageEventKind, name: &str) {
    *self.fail_on.lock().unwrap() = Some((kind, name.to_string()));
  }

  /// `(kind, package, size of the full operation list, dev_mode)` per event.
  pub fn seen(&self) -> Vec<(PackageEventKind, String, usize, bool)> {
    self.seen.lock().unwrap().clone()
  }
}

impl EventDispatcher for RecordingDispatcher {
  fn dispatch(&self, event: &PackageEvent<'_>) -> Result<(), EventError> {
    let name = event.operation.package().name.clone();
    self.journal.push(format!("event:{}:{}", event.kind, name));
    self
      .seen
      .lock()
      .unwrap()
      .push((event.kind, name.clone(), event.operations.len(), event.dev_mode));

    if self.fail_on.lock().unwrap().as_ref() == Some(&(event.kind, name)) {
      return Err(EventError {
        event: event.kind,
        message: "listener refused".to_string(),
      });
    }
    Ok(())
  }
}

/// A vendor directory wired to the stock backends, each instrumented.
pub struct Harness {
  pub dir: TempDir,
  pub config: EngineConfig,
  pub journal: Journal,
  pub downloader: Arc<FakeDownloader>,
  pub plugins: Arc<FakePluginManager>,
  pub dispatcher: Arc<RecordingDispatcher>,
  pub registry: Arc<InstallerRegistry>,
  controls: Controls,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_policy(PluginPolicy::AllowAll)
  }

  pub fn with_policy(policy: PluginPolicy) -> Self {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::with_vendor_dir(dir.path().join("vendor"));
    config.plugin_policy = policy;

    let journal = Journal::default();
    let downloader = Arc::new(FakeDownloader {
      journal: journal.clone(),
      ..Default::default()
    });
    let plugins = Arc::new(FakePluginManager {
      journal: journal.clone(),
      ..Default::default()
    });
    let controls = Controls::default();
    let registry = Arc::new(InstallerRegistry::new());
    *plugins.registry.lock().unwrap() = Arc::downgrade(&registry);

    let linker: Arc<dyn BinaryLinker> = Arc::new(BinDirLinker::new(&config.bin_dir));
    let library = || {
      LibraryInstaller::new(
        &config.vendor_dir,
        config.staging_dir(),
        downloader.clone(),
        linker.clone(),
      )
    };

    let backends: Vec<Arc<dyn Installer>> = vec![
      Arc::new(PluginInstaller::new(library(), plugins.clone(), config.plugin_policy.clone())),
      Arc::new(library()),
      Arc::new(MetapackageInstaller),
    ];
    for backend in backends {
      registry.register(Arc::new(Instrumented::new(backend, journal.clone(), controls.clone())));
    }

    Self {
      dispatcher: Arc::new(RecordingDispatcher::new(journal.clone())),
      dir,
      config,
      journal,
      downloader,
      plugins,
      registry,
      controls,
    }
  }

  pub fn fail(&self, step: Step, name: &str) {
    self.controls.failures.lock().unwrap().push((step, name.to_string()));
  }

  /// Make the apply step of `name` cancel `token` and hang, like a signal arriving mid-install.
  pub fn interrupt_while_applying(&self, name: &str, token: &CancellationToken) {
    self
      .controls
      .interrupts
      .lock()
      .unwrap()
      .push((name.to_string(), token.clone()));
  }

  pub fn engine(&self) -> Engine {
    Engine::new(self.registry.clone())
      .with_parallelism(self.config.parallelism)
      .with_dispatcher(self.dispatcher.clone())
  }

  pub fn store(&self) -> RecordingStore {
    RecordingStore::new(self.journal.clone())
  }

  /// An instrumented backend for extra types, e.g. one a plugin contributes.
  pub fn instrumented(&self, inner: Arc<dyn Installer>) -> Arc<dyn Installer> {
    Arc::new(Instrumented::new(inner, self.journal.clone(), self.controls.clone()))
  }

  pub fn installed_path(&self, name: &str) -> PathBuf {
    self.config.vendor_dir.join(name)
  }

  /// Whether any staged download is still lying around.
  pub fn has_staged_artifacts(&self) -> bool {
    std::fs::read_dir(self.config.staging_dir())
      .map(|mut entries| entries.next().is_some())
      .unwrap_or(false)
  }
}

pub fn library(name: &str, version: &str) -> Package {
  Package::new(name, version, TYPE_LIBRARY).with_dist_url(format!("https://dist.invalid/{name}.zip"))
}

pub fn metapackage(name: &str) -> Package {
  Package::new(name, "1.0.0", TYPE_METAPACKAGE)
}

/// A plugin that changes how later downloads are fetched.
pub fn download_plugin(name: &str) -> Package {
  Package::new(name, "1.0.0", TYPE_PLUGIN).with_extra(EXTRA_PLUGIN_MODIFIES_DOWNLOADS, Value::Bool(true))
}

pub fn plugin(name: &str) -> Package {
  Package::new(name, "1.0.0", TYPE_PLUGIN)
}

pub fn custom_installer(name: &str, version: &str) -> Package {
  Package::new(name, version, TYPE_INSTALLER)
}

pub fn install(package: Package) -> Operation {
  Operation::Install { package }
}

pub fn update(initial: Package, target: Package) -> Operation {
  Operation::Update { initial, target }
}

pub fn uninstall(package: Package) -> Operation {
  Operation::Uninstall { package }
}
