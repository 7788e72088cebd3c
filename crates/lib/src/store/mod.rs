//! The installed store: which packages are currently installed.
//!
//! The store is owned by the engine for the duration of a run and mutated only
//! by the engine and the installer backends it calls. Changes live in memory
//! until [`InstalledStore::persist`] flushes them to durable storage.

mod json;
mod memory;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::package::Package;

pub use json::JsonStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to read installed store {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse installed store {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize installed store: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write installed store {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

pub trait InstalledStore: Send + Sync {
  /// Add a package, replacing any package with the same [`Package::store_key`].
  fn add(&mut self, package: Package);

  /// Remove the package stored under `name` (its store key), returning it if present.
  fn remove(&mut self, name: &str) -> Option<Package>;

  fn get(&self, name: &str) -> Option<&Package>;

  /// All installed packages, ordered by name.
  fn packages(&self) -> Vec<&Package>;

  /// Flush the current set to durable storage.
  fn persist(&mut self) -> Result<(), StoreError>;

  fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Whether exactly this package (name and version) is installed.
  fn has_package(&self, package: &Package) -> bool {
    self
      .get(&package.name)
      .is_some_and(|installed| installed.version == package.version)
  }
}
