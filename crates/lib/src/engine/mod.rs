//! The operation execution engine.
//!
//! A run takes the resolver's ordered operation list and applies it in two
//! nested passes:
//!
//! 1. The list is cut into download batches so that a plugin which changes how
//!    downloads work is fully applied before anything after it is fetched.
//! 2. Each download batch downloads every artifact concurrently (bounded by
//!    the configured parallelism), then applies its operations strictly in
//!    order, cut again into sub-batches so that anything able to register new
//!    installers is applied on its own.
//!
//! The installed store is persisted after every completed sub-batch. Any
//! failure or interruption runs every registered cleanup and returns the
//! triggering error; the store is never persisted after that.

mod cleanup;
mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, split_for_apply, split_for_download};
use crate::config::DEFAULT_PARALLELISM;
use crate::events::{EventDispatcher, PackageEvent, PackageEventKind};
use crate::installer::{InstallError, Installer, InstallerRegistry};
use crate::notify::{self, NotificationQueue};
use crate::operation::{IndexedOperation, Operation};
use crate::store::InstalledStore;

pub use cleanup::{CleanupAction, CleanupRegistry};
pub use types::{EngineError, ExecuteOptions};

use types::Phase;

pub struct Engine {
  registry: Arc<InstallerRegistry>,
  dispatcher: Option<Arc<dyn EventDispatcher>>,
  notifications: NotificationQueue,
  http: reqwest::Client,
  notify: bool,
  notify_timeout: Duration,
  semaphore: Arc<Semaphore>,
}

impl Engine {
  pub fn new(registry: Arc<InstallerRegistry>) -> Self {
    Self {
      registry,
      dispatcher: None,
      notifications: NotificationQueue::new(),
      http: reqwest::Client::builder()
        .timeout(notify::DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_default(),
      notify: false,
      notify_timeout: notify::DEFAULT_TIMEOUT,
      semaphore: Arc::new(Semaphore::new(DEFAULT_PARALLELISM)),
    }
  }

  /// Cap the number of downloads in flight at once. Zero is treated as one.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    self
  }

  pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
    self.dispatcher = Some(dispatcher);
    self
  }

  /// Send queued install notifications after each successful run.
  pub fn with_notifications(mut self, enabled: bool) -> Self {
    self.notify = enabled;
    self
  }

  pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
    self.http = client;
    self
  }

  /// Bound each notification request; the default is [`notify::DEFAULT_TIMEOUT`].
  pub fn with_notification_timeout(mut self, timeout: Duration) -> Self {
    self.notify_timeout = timeout;
    self
  }

  pub fn notifications(&self) -> &NotificationQueue {
    &self.notifications
  }

  /// Drop state carried over from previous runs.
  pub fn reset(&mut self) {
    self.notifications.clear();
  }

  /// Apply `operations` to `store` in order.
  ///
  /// Cancelling `cancel` aborts in-flight work, rolls back like any other
  /// failure and returns [`EngineError::Interrupted`].
  pub async fn execute(
    &mut self,
    store: &mut dyn InstalledStore,
    operations: &[Operation],
    options: &ExecuteOptions,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    if operations.is_empty() {
      info!("nothing to do");
      return Ok(());
    }

    info!(
      operations = operations.len(),
      dev_mode = options.dev_mode,
      run_scripts = options.run_scripts,
      download_only = options.download_only,
      "starting execution"
    );

    let mut cleanups = CleanupRegistry::new();
    let result = self.run(store, operations, options, &mut cleanups, cancel).await;

    if let Err(e) = result {
      error!(error = %e, "execution failed");
      rollback(&cleanups).await;
      return Err(e);
    }

    if self.notify && !options.download_only {
      self.notifications.flush(&self.http, self.notify_timeout, cancel).await;
    }

    info!("execution complete");
    Ok(())
  }

  async fn run(
    &mut self,
    store: &mut dyn InstalledStore,
    operations: &[Operation],
    options: &ExecuteOptions,
    cleanups: &mut CleanupRegistry,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let batches = split_for_download(IndexedOperation::enumerate(operations));
    info!(batch_count = batches.len(), "computed download batches");

    for (batch_idx, batch) in batches.into_iter().enumerate() {
      if cancel.is_cancelled() {
        return Err(EngineError::Interrupted);
      }

      debug!(batch = batch_idx, operations = batch.len(), "downloading batch");
      self.download_batch(&batch, cleanups, cancel).await?;

      if options.download_only {
        debug!(batch = batch_idx, "download only, releasing staged artifacts");
        for (index, e) in cleanups.run_all().await {
          warn!(index, error = %e, "cleanup failed");
        }
        continue;
      }

      debug!(batch = batch_idx, "applying batch");
      self
        .apply_batch(store, batch, operations, options, cleanups, cancel)
        .await?;
    }

    Ok(())
  }

  /// Download every artifact of `batch` concurrently.
  ///
  /// Backends are resolved for the whole batch before the first download
  /// starts. A cleanup is registered for each operation before its download
  /// is spawned. The first failure aborts the downloads still in flight.
  async fn download_batch(
    &self,
    batch: &Batch,
    cleanups: &mut CleanupRegistry,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let mut jobs = Vec::new();
    for op in batch.iter().filter(|op| op.operation.needs_download()) {
      let installer = self
        .registry
        .installer_for(op.operation.package())
        .map_err(|e| EngineError::from_install(Phase::Download, &op.operation, e))?;
      jobs.push((op, installer));
    }

    if jobs.is_empty() {
      return Ok(());
    }

    let mut join_set: JoinSet<(Operation, Result<(), InstallError>)> = JoinSet::new();
    for (op, installer) in jobs {
      cleanups.register(op.index, CleanupAction::new(installer.clone(), op.operation.clone()));

      let operation = op.operation.clone();
      let semaphore = self.semaphore.clone();
      join_set.spawn(async move {
        // never closed, so acquiring only waits for a free slot
        let _permit = semaphore.acquire_owned().await;
        debug!(operation = %operation, installer = installer.name(), "downloading");
        let result = installer.download(operation.package(), operation.previous()).await;
        (operation, result)
      });
    }

    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        next = join_set.join_next() => Some(next),
      };
      let Some(next) = next else {
        join_set.shutdown().await;
        return Err(EngineError::Interrupted);
      };

      match next {
        None => return Ok(()),
        Some(Ok((operation, Ok(())))) => debug!(operation = %operation, "download finished"),
        Some(Ok((operation, Err(e)))) => {
          join_set.shutdown().await;
          return Err(EngineError::from_install(Phase::Download, &operation, e));
        }
        Some(Err(e)) => {
          error!(error = %e, "download task panicked");
          join_set.shutdown().await;
          return Err(EngineError::Task(e));
        }
      }
    }
  }

  async fn apply_batch(
    &mut self,
    store: &mut dyn InstalledStore,
    batch: Batch,
    operations: &[Operation],
    options: &ExecuteOptions,
    cleanups: &mut CleanupRegistry,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    for sub_batch in split_for_apply(batch) {
      let mut post_events = Vec::new();

      for op in &sub_batch {
        self.apply_one(store, op, operations, options, cleanups, cancel).await?;

        if options.run_scripts {
          store.persist()?;
        }
        if let Some(kind) = PackageEventKind::post(op.operation.kind()) {
          post_events.push((kind, &op.operation));
        }
      }

      if !options.run_scripts {
        store.persist()?;
      }
      debug!(operations = sub_batch.len(), "sub-batch applied");

      for (kind, operation) in post_events {
        self.dispatch(kind, operation, operations, options)?;
      }
    }

    Ok(())
  }

  async fn apply_one(
    &mut self,
    store: &mut dyn InstalledStore,
    op: &IndexedOperation,
    operations: &[Operation],
    options: &ExecuteOptions,
    cleanups: &mut CleanupRegistry,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let operation = &op.operation;

    match operation {
      Operation::MarkAliasInstalled { package } => {
        if !store.contains(&package.store_key()) {
          store.add(package.clone());
        }
        info!(operation = %operation, "applied");
        return Ok(());
      }
      Operation::MarkAliasUninstalled { package } => {
        store.remove(&package.store_key());
        info!(operation = %operation, "applied");
        return Ok(());
      }
      _ => {}
    }

    if let Some(kind) = PackageEventKind::pre(operation.kind()) {
      self.dispatch(kind, operation, operations, options)?;
    }

    let installer = self
      .registry
      .installer_for(operation.package())
      .map_err(|e| EngineError::from_install(Phase::Apply, operation, e))?;
    cleanups.register(op.index, CleanupAction::new(installer.clone(), operation.clone()));

    cancellable(cancel, async {
      installer
        .prepare(operation.kind(), operation.package(), operation.previous())
        .await
        .map_err(|e| EngineError::from_install(Phase::Prepare, operation, e))
    })
    .await?;

    cancellable(cancel, async {
      self
        .mutate(&mut *store, &*installer, operation)
        .await
        .map_err(|e| EngineError::from_install(Phase::Apply, operation, e))
    })
    .await?;

    cleanups
      .run(op.index)
      .await
      .map_err(|e| EngineError::from_install(Phase::Apply, operation, e))?;

    if let Some(target) = operation.installed_target() {
      self.notifications.record(target);
    }

    info!(operation = %operation, "applied");
    Ok(())
  }

  /// The store-and-disk mutation of one package change.
  async fn mutate(
    &self,
    store: &mut dyn InstalledStore,
    installer: &dyn Installer,
    operation: &Operation,
  ) -> Result<(), InstallError> {
    match operation {
      Operation::Install { package } => installer.install(store, package).await,
      Operation::Update { initial, target } if initial.package_type != target.package_type => {
        debug!(
          from = %initial.package_type,
          to = %target.package_type,
          "package type changed, replacing through both installers"
        );
        let previous = self.registry.installer_for(initial)?;
        previous.uninstall(&mut *store, initial).await?;
        installer.install(store, target).await
      }
      Operation::Update { initial, target } => installer.update(store, initial, target).await,
      Operation::Uninstall { package } => installer.uninstall(store, package).await,
      Operation::MarkAliasInstalled { .. } | Operation::MarkAliasUninstalled { .. } => Ok(()),
    }
  }

  fn dispatch(
    &self,
    kind: PackageEventKind,
    operation: &Operation,
    operations: &[Operation],
    options: &ExecuteOptions,
  ) -> Result<(), EngineError> {
    if !options.run_scripts {
      return Ok(());
    }
    let Some(dispatcher) = &self.dispatcher else {
      return Ok(());
    };

    debug!(event = %kind, operation = %operation, "dispatching event");
    dispatcher
      .dispatch(&PackageEvent {
        kind,
        operation,
        operations,
        dev_mode: options.dev_mode,
      })
      .map_err(|source| EngineError::Event {
        operation: operation.to_string(),
        source,
      })
  }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
  cancel: &CancellationToken,
  fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(EngineError::Interrupted),
    result = fut => result,
  }
}

async fn rollback(cleanups: &CleanupRegistry) {
  info!(count = cleanups.len(), "rolling back");
  for (index, e) in cleanups.run_all().await {
    warn!(index, error = %e, "cleanup failed during rollback");
  }
  info!("rollback complete");
}
