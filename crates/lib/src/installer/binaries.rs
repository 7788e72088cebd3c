//! Exposing package executables in a shared bin directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::package::Package;

use super::contained_path;

pub trait BinaryLinker: Send + Sync {
  /// Expose the binaries declared by `package`, which is installed at `install_path`.
  fn link(&self, package: &Package, install_path: &Path) -> io::Result<()>;

  /// Remove whatever `link` exposed for `package`. Missing links are not an error.
  fn unlink(&self, package: &Package) -> io::Result<()>;
}

/// Links binaries into a single directory, symlinking on unix and copying elsewhere.
#[derive(Debug, Clone)]
pub struct BinDirLinker {
  bin_dir: PathBuf,
}

impl BinDirLinker {
  pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
    Self { bin_dir: bin_dir.into() }
  }

  fn link_path(&self, binary: &str) -> Option<PathBuf> {
    Path::new(binary).file_name().map(|name| self.bin_dir.join(name))
  }
}

impl BinaryLinker for BinDirLinker {
  fn link(&self, package: &Package, install_path: &Path) -> io::Result<()> {
    if package.binaries.is_empty() {
      return Ok(());
    }

    fs::create_dir_all(&self.bin_dir)?;

    for binary in &package.binaries {
      let Some(relative) = contained_path(binary) else {
        warn!(package = %package.name, binary = %binary, "skipping binary outside the package");
        continue;
      };
      let Some(link) = self.link_path(binary) else {
        warn!(package = %package.name, binary = %binary, "skipping binary without a file name");
        continue;
      };
      let source = match dunce::canonicalize(install_path.join(relative)) {
        Ok(source) => source,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          warn!(package = %package.name, binary = %binary, "skipping binary not found in package");
          continue;
        }
        Err(e) => return Err(e),
      };

      if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
      }

      debug!(source = %source.display(), link = %link.display(), "linking binary");
      create_link(&source, &link)?;
    }

    Ok(())
  }

  fn unlink(&self, package: &Package) -> io::Result<()> {
    for binary in &package.binaries {
      let Some(link) = self.link_path(binary) else {
        continue;
      };

      match fs::remove_file(&link) {
        Ok(()) => debug!(link = %link.display(), "removed binary link"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
      }
    }

    Ok(())
  }
}

#[cfg(unix)]
fn create_link(source: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(source, link)
}

#[cfg(not(unix))]
fn create_link(source: &Path, link: &Path) -> io::Result<()> {
  fs::copy(source, link).map(|_| ())
}
