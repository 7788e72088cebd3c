//! Package change operations produced by the resolver.
//!
//! An [`Operation`] is immutable once created. It carries everything needed to
//! replay it in logs and to clean it up individually, including both endpoints
//! of an update.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::package::Package;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "kebab-case")]
pub enum Operation {
  Install { package: Package },
  Update { initial: Package, target: Package },
  Uninstall { package: Package },
  MarkAliasInstalled { package: Package },
  MarkAliasUninstalled { package: Package },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
  Install,
  Update,
  Uninstall,
  MarkAliasInstalled,
  MarkAliasUninstalled,
}

impl OperationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      OperationKind::Install => "install",
      OperationKind::Update => "update",
      OperationKind::Uninstall => "uninstall",
      OperationKind::MarkAliasInstalled => "mark-alias-installed",
      OperationKind::MarkAliasUninstalled => "mark-alias-uninstalled",
    }
  }

  /// Whether this kind goes through an installer backend and fires lifecycle events.
  pub fn is_package_change(self) -> bool {
    matches!(
      self,
      OperationKind::Install | OperationKind::Update | OperationKind::Uninstall
    )
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Operation {
  pub fn kind(&self) -> OperationKind {
    match self {
      Operation::Install { .. } => OperationKind::Install,
      Operation::Update { .. } => OperationKind::Update,
      Operation::Uninstall { .. } => OperationKind::Uninstall,
      Operation::MarkAliasInstalled { .. } => OperationKind::MarkAliasInstalled,
      Operation::MarkAliasUninstalled { .. } => OperationKind::MarkAliasUninstalled,
    }
  }

  /// The package this operation leaves behind (the target for updates).
  pub fn package(&self) -> &Package {
    match self {
      Operation::Install { package }
      | Operation::Uninstall { package }
      | Operation::MarkAliasInstalled { package }
      | Operation::MarkAliasUninstalled { package } => package,
      Operation::Update { target, .. } => target,
    }
  }

  /// The package being replaced, for updates only.
  pub fn previous(&self) -> Option<&Package> {
    match self {
      Operation::Update { initial, .. } => Some(initial),
      _ => None,
    }
  }

  /// The package an install or update puts in place, if any.
  ///
  /// This is what the batcher inspects when deciding where to cut.
  pub fn installed_target(&self) -> Option<&Package> {
    match self {
      Operation::Install { package } => Some(package),
      Operation::Update { target, .. } => Some(target),
      _ => None,
    }
  }

  /// Whether this operation fetches an artifact before being applied.
  pub fn needs_download(&self) -> bool {
    matches!(self, Operation::Install { .. } | Operation::Update { .. })
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operation::Install { package } => write!(f, "Installing {}", package),
      Operation::Update { initial, target } => {
        if initial.version == target.version {
          write!(f, "Reinstalling {}", target)
        } else {
          let verb = if is_downgrade(&initial.version, &target.version) {
            "Downgrading"
          } else {
            "Upgrading"
          };
          write!(f, "{} {} ({} => {})", verb, target.name, initial.version, target.version)
        }
      }
      Operation::Uninstall { package } => write!(f, "Removing {}", package),
      Operation::MarkAliasInstalled { package } => write!(f, "Marking {} as installed, alias", package),
      Operation::MarkAliasUninstalled { package } => write!(f, "Marking {} as uninstalled, alias", package),
    }
  }
}

/// Best-effort dotted numeric comparison used for log wording only.
fn is_downgrade(from: &str, to: &str) -> bool {
  let parse = |v: &str| -> Vec<u64> {
    v.trim_start_matches('v')
      .split(['.', '-', '+'])
      .map_while(|part| part.parse::<u64>().ok())
      .collect()
  };
  parse(to) < parse(from)
}

/// An operation paired with its position in the resolver's list.
///
/// Batches are ordered sequences of these pairs; the index is what cleanup
/// actions are keyed by.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedOperation {
  pub index: usize,
  pub operation: Operation,
}

impl IndexedOperation {
  pub fn new(index: usize, operation: Operation) -> Self {
    Self { index, operation }
  }

  /// Pair every operation with its position in `operations`.
  pub fn enumerate(operations: &[Operation]) -> Vec<IndexedOperation> {
    operations
      .iter()
      .cloned()
      .enumerate()
      .map(|(index, operation)| IndexedOperation { index, operation })
      .collect()
  }
}
