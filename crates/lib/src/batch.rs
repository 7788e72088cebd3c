//! Splitting an ordered operation list into batches.
//!
//! Batching never reorders anything: it only inserts cut points. Two passes
//! exist:
//!
//! - [`split_for_download`] isolates plugins that modify downloads, so nothing
//!   downloads alongside or after them until they are fully applied.
//! - [`split_for_apply`] cuts after every plugin or custom installer inside a
//!   download batch, so each one is activated before later operations apply.

use crate::operation::IndexedOperation;
use crate::package::Package;

/// A contiguous, order-preserving run of operations.
pub type Batch = Vec<IndexedOperation>;

/// Pass A: cut around plugins that modify how downloads are fetched.
///
/// Such a plugin is emitted as a singleton batch; the accumulator is closed
/// before it and restarted after it.
pub fn split_for_download(operations: Vec<IndexedOperation>) -> Vec<Batch> {
  split_isolating(operations, Package::modifies_downloads)
}

/// Pass B: cut around plugins and custom installers within one download batch.
pub fn split_for_apply(batch: Batch) -> Vec<Batch> {
  split_isolating(batch, Package::extends_installers)
}

fn split_isolating(operations: Vec<IndexedOperation>, isolate: impl Fn(&Package) -> bool) -> Vec<Batch> {
  let mut batches = Vec::new();
  let mut current = Vec::new();

  for op in operations {
    let cut = op
      .operation
      .installed_target()
      .is_some_and(|package| !package.is_alias() && isolate(package));

    if cut {
      if !current.is_empty() {
        batches.push(std::mem::take(&mut current));
      }
      batches.push(vec![op]);
    } else {
      current.push(op);
    }
  }

  if !current.is_empty() {
    batches.push(current);
  }

  batches
}
