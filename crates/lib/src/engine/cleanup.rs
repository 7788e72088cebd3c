//! Per-run registry of cleanup actions keyed by operation index.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::installer::{InstallError, Installer};
use crate::operation::Operation;

/// Releases whatever one operation left behind. Safe to run more than once.
#[derive(Clone)]
pub struct CleanupAction {
  installer: Arc<dyn Installer>,
  operation: Operation,
}

impl CleanupAction {
  pub fn new(installer: Arc<dyn Installer>, operation: Operation) -> Self {
    Self { installer, operation }
  }

  pub async fn run(&self) -> Result<(), InstallError> {
    self
      .installer
      .cleanup(self.operation.kind(), self.operation.package(), self.operation.previous())
      .await
  }
}

/// Append-only during a run: an index keeps the first action registered for it.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
  actions: BTreeMap<usize, CleanupAction>,
}

impl CleanupRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, index: usize, action: CleanupAction) {
    self.actions.entry(index).or_insert(action);
  }

  pub fn len(&self) -> usize {
    self.actions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.actions.is_empty()
  }

  /// Run the action registered for `index`, if any.
  pub async fn run(&self, index: usize) -> Result<(), InstallError> {
    match self.actions.get(&index) {
      Some(action) => action.run().await,
      None => Ok(()),
    }
  }

  /// Run every action in index order, collecting failures instead of stopping at the first.
  pub async fn run_all(&self) -> Vec<(usize, InstallError)> {
    let mut failures = Vec::new();
    for (index, action) in &self.actions {
      debug!(index = *index, operation = %action.operation, "running cleanup");
      if let Err(e) = action.run().await {
        failures.push((*index, e));
      }
    }
    failures
  }
}
