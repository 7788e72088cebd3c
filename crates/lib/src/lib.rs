//! stevedore-lib: the operation execution engine of the stevedore package manager
//!
//! Given the ordered operation list a resolver produced, this crate applies it
//! to a project's vendor directory:
//! - `Operation`: one install, update, uninstall or alias-mark
//! - `Installer`: a per-package-type backend, selected through an `InstallerRegistry`
//! - `InstalledStore`: the persisted record of what is installed
//! - `Engine`: batches, downloads concurrently, applies in order, rolls back on failure

pub mod batch;
pub mod config;
pub mod consts;
pub mod download;
pub mod engine;
pub mod events;
pub mod installer;
pub mod notify;
pub mod operation;
pub mod package;
pub mod run_lock;
pub mod signal;
pub mod store;
