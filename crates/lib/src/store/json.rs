//! JSON-backed installed store.
//!
//! # Storage Layout
//!
//! ```text
//! <vendor>/installed.json
//! ```
//!
//! ```json
//! {
//!   "packages": [
//!     { "name": "acme/log", "version": "1.2.0", "type": "library" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::package::Package;

use super::{InstalledStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstalledFile {
  #[serde(default)]
  packages: Vec<Package>,
}

#[derive(Debug)]
pub struct JsonStore {
  path: PathBuf,
  packages: BTreeMap<String, Package>,
}

impl JsonStore {
  /// Load the store at `path`. A missing file is an empty store.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let path = path.into();

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "installed store not found, starting empty");
        return Ok(Self {
          path,
          packages: BTreeMap::new(),
        });
      }
      Err(source) => return Err(StoreError::Read { path, source }),
    };

    let file: InstalledFile = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
      path: path.clone(),
      source,
    })?;

    info!(path = %path.display(), count = file.packages.len(), "loaded installed store");

    Ok(Self {
      path,
      packages: file.packages.into_iter().map(|p| (p.store_key(), p)).collect(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl InstalledStore for JsonStore {
  fn add(&mut self, package: Package) {
    self.packages.insert(package.store_key(), package);
  }

  fn remove(&mut self, name: &str) -> Option<Package> {
    self.packages.remove(name)
  }

  fn get(&self, name: &str) -> Option<&Package> {
    self.packages.get(name)
  }

  fn packages(&self) -> Vec<&Package> {
    self.packages.values().collect()
  }

  /// Write atomically: write to a temp file next to the store, then rename.
  fn persist(&mut self) -> Result<(), StoreError> {
    let file = InstalledFile {
      packages: self.packages.values().cloned().collect(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(StoreError::Serialize)?;

    let write_err = |source| StoreError::Write {
      path: self.path.clone(),
      source,
    };

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(write_err)?;
    }

    let temp_path = self.path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;

    debug!(path = %self.path.display(), count = self.packages.len(), "persisted installed store");
    Ok(())
  }
}
