//! Advisory lock on a vendor dir's state directory.
//!
//! An apply holds it exclusively and records which plan it is running, so a
//! second apply (or a status read) started meanwhile can say who is in the
//! way. Readers share it and record nothing.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const LOCK_FILENAME: &str = "run.lock";

/// What a lock is taken for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum LockHolder {
  /// Mutates the vendor dir; excludes everyone else.
  Apply { plan: PathBuf, operations: usize },
  /// Only reads the installed store; any number may run together.
  Status,
}

impl LockHolder {
  fn exclusive(&self) -> bool {
    matches!(self, LockHolder::Apply { .. })
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockHolder::Apply { plan, operations } => {
        write!(f, "apply of {} ({} operation(s))", plan.display(), operations)
      }
      LockHolder::Status => f.write_str("status"),
    }
  }
}

/// Written into the lock file by the exclusive holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
  pub pid: u32,
  pub started_at_unix: u64,
  #[serde(flatten)]
  pub holder: LockHolder,
}

impl LockMetadata {
  fn for_current_process(holder: LockHolder) -> Self {
    Self {
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      holder,
    }
  }
}

#[derive(Debug, Error)]
pub enum RunLockError {
  #[error(
    "vendor dir is busy: {}\n\
     If no stevedore process is running, remove the lock file:\n  {}",
    describe_owner(.owner.as_ref()),
    .lock_path.display()
  )]
  Busy {
    owner: Option<LockMetadata>,
    lock_path: PathBuf,
  },

  #[error("failed to {action} {}: {source}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn describe_owner(owner: Option<&LockMetadata>) -> String {
  match owner {
    Some(owner) => format!(
      "{} by PID {} since unix time {}",
      owner.holder, owner.pid, owner.started_at_unix
    ),
    None => "held by a process that left no metadata".to_string(),
  }
}

/// Held for the duration of a command; released on drop.
#[derive(Debug)]
pub struct RunLock {
  file: File,
  lock_path: PathBuf,
  exclusive: bool,
}

impl RunLock {
  /// Take the lock in `state_dir` without waiting.
  pub fn acquire(state_dir: &Path, holder: LockHolder) -> Result<Self, RunLockError> {
    let lock_path = state_dir.join(LOCK_FILENAME);

    std::fs::create_dir_all(state_dir).map_err(io_error("create", state_dir))?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_error("open", lock_path.as_path()))?;

    match try_lock(&file, holder.exclusive()) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(RunLockError::Busy {
          owner: read_owner(&lock_path),
          lock_path,
        });
      }
      Err(e) => return Err(io_error("lock", lock_path.as_path())(e)),
    }

    let lock = RunLock {
      file,
      lock_path,
      exclusive: holder.exclusive(),
    };
    if lock.exclusive {
      debug!(holder = %holder, path = %lock.lock_path.display(), "vendor dir locked");
      lock
        .record(&LockMetadata::for_current_process(holder))
        .map_err(io_error("write", lock.lock_path.as_path()))?;
    }
    Ok(lock)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Metadata as seen through the held handle. Reopening the file would fail on windows.
  pub fn metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn record(&self, metadata: &LockMetadata) -> io::Result<()> {
    let mut file = &self.file;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?)?;
    file.flush()
  }
}

impl Drop for RunLock {
  fn drop(&mut self) {
    // stale metadata would be blamed for contention caused by later readers
    if self.exclusive {
      let _ = self.file.set_len(0);
    }
  }
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> RunLockError {
  let path = path.to_path_buf();
  move |source| RunLockError::Io { action, path, source }
}

fn read_owner(lock_path: &Path) -> Option<LockMetadata> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock(file: &File, exclusive: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let operation = if exclusive {
    FlockOperation::NonBlockingLockExclusive
  } else {
    FlockOperation::NonBlockingLockShared
  };
  flock(file, operation).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, exclusive: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: the handle is owned by `file` and stays open for the call; a
  // zeroed OVERLAPPED locks from offset 0.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if locked == 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}
