//! Package lifecycle events fired around each applied operation.

use std::fmt;

use thiserror::Error;

use crate::operation::{Operation, OperationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageEventKind {
  PreInstall,
  PostInstall,
  PreUpdate,
  PostUpdate,
  PreUninstall,
  PostUninstall,
}

impl PackageEventKind {
  /// Stable event name as seen by listeners.
  pub fn name(self) -> &'static str {
    match self {
      PackageEventKind::PreInstall => "pre-package-install",
      PackageEventKind::PostInstall => "post-package-install",
      PackageEventKind::PreUpdate => "pre-package-update",
      PackageEventKind::PostUpdate => "post-package-update",
      PackageEventKind::PreUninstall => "pre-package-uninstall",
      PackageEventKind::PostUninstall => "post-package-uninstall",
    }
  }

  /// The pre-change event for `kind`; alias markers have none.
  pub fn pre(kind: OperationKind) -> Option<Self> {
    match kind {
      OperationKind::Install => Some(PackageEventKind::PreInstall),
      OperationKind::Update => Some(PackageEventKind::PreUpdate),
      OperationKind::Uninstall => Some(PackageEventKind::PreUninstall),
      OperationKind::MarkAliasInstalled | OperationKind::MarkAliasUninstalled => None,
    }
  }

  /// The post-change event for `kind`; alias markers have none.
  pub fn post(kind: OperationKind) -> Option<Self> {
    match kind {
      OperationKind::Install => Some(PackageEventKind::PostInstall),
      OperationKind::Update => Some(PackageEventKind::PostUpdate),
      OperationKind::Uninstall => Some(PackageEventKind::PostUninstall),
      OperationKind::MarkAliasInstalled | OperationKind::MarkAliasUninstalled => None,
    }
  }
}

impl fmt::Display for PackageEventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PackageEvent<'a> {
  pub kind: PackageEventKind,
  pub operation: &'a Operation,
  /// The full operation list of the run.
  pub operations: &'a [Operation],
  pub dev_mode: bool,
}

#[derive(Debug, Error)]
#[error("listener for {event} failed: {message}")]
pub struct EventError {
  pub event: PackageEventKind,
  pub message: String,
}

/// Receives lifecycle events; a failing listener aborts the run.
pub trait EventDispatcher: Send + Sync {
  fn dispatch(&self, event: &PackageEvent<'_>) -> Result<(), EventError>;
}
