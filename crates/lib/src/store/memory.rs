use std::collections::BTreeMap;

use crate::package::Package;

use super::{InstalledStore, StoreError};

/// A store that lives only in memory; `persist` counts calls and does nothing else.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
  packages: BTreeMap<String, Package>,
  persist_count: usize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_packages(packages: impl IntoIterator<Item = Package>) -> Self {
    Self {
      packages: packages.into_iter().map(|p| (p.store_key(), p)).collect(),
      persist_count: 0,
    }
  }

  pub fn persist_count(&self) -> usize {
    self.persist_count
  }
}

impl InstalledStore for MemoryStore {
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

  fn persist(&mut self) -> Result<(), StoreError> {
    self.persist_count += 1;
    Ok(())
  }
}
