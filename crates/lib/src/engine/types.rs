//! Error and option types for engine runs.

use thiserror::Error;

use crate::events::EventError;
use crate::installer::InstallError;
use crate::operation::Operation;
use crate::store::StoreError;

/// Terminal outcome of a failed run.
///
/// Every variant tied to an operation carries that operation's description.
#[derive(Debug, Error)]
pub enum EngineError {
  /// No installer backend supports the package type.
  #[error("{operation}: no installer supports package type \"{package_type}\"")]
  UnknownPackageType { operation: String, package_type: String },

  #[error("{operation}: download failed: {source}")]
  DownloadFailed {
    operation: String,
    #[source]
    source: InstallError,
  },

  #[error("{operation}: rejected: {source}")]
  PrepareRejected {
    operation: String,
    #[source]
    source: InstallError,
  },

  #[error("{operation}: {source}")]
  ApplyFailed {
    operation: String,
    #[source]
    source: InstallError,
  },

  /// The plugin was uninstalled again before this error was raised.
  #[error("{operation}: {source}")]
  PluginActivationFailed {
    operation: String,
    #[source]
    source: InstallError,
  },

  #[error("{operation}: {source}")]
  UnsupportedOperation {
    operation: String,
    #[source]
    source: InstallError,
  },

  /// The run was cancelled from outside, usually by a signal.
  #[error("interrupted")]
  Interrupted,

  #[error("{operation}: {source}")]
  Event {
    operation: String,
    #[source]
    source: EventError,
  },

  #[error("failed to persist installed store: {0}")]
  Store(#[from] StoreError),

  #[error("download task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Which step of an operation an installer error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
  Download,
  Prepare,
  Apply,
}

impl EngineError {
  /// Classify an installer error raised while `phase` of `operation` ran.
  pub(crate) fn from_install(phase: Phase, operation: &Operation, source: InstallError) -> Self {
    let operation = operation.to_string();
    match source {
      InstallError::UnknownPackageType(package_type) => EngineError::UnknownPackageType {
        operation,
        package_type,
      },
      source @ InstallError::UnsupportedOperation { .. } => EngineError::UnsupportedOperation { operation, source },
      source @ InstallError::PluginActivation { .. } => EngineError::PluginActivationFailed { operation, source },
      source => match phase {
        Phase::Download => EngineError::DownloadFailed { operation, source },
        Phase::Prepare => EngineError::PrepareRejected { operation, source },
        Phase::Apply => EngineError::ApplyFailed { operation, source },
      },
    }
  }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
  /// Whether dev requirements are part of this run; passed through to listeners.
  pub dev_mode: bool,

  /// Fire lifecycle events. Also makes the store persist after every operation.
  pub run_scripts: bool,

  /// Only download, then clean up, without applying anything.
  pub download_only: bool,
}

impl Default for ExecuteOptions {
  fn default() -> Self {
    Self {
      dev_mode: true,
      run_scripts: true,
      download_only: false,
    }
  }
}
