//! Fetching package artifacts into a staging directory.
//!
//! Downloads never touch the installed store. A downloader writes the artifact
//! for one package into the directory it is given; moving it into place is the
//! installer's job.

mod http;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::package::Package;

pub use http::HttpDownloader;

#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("{package} has no dist url to download from")]
  NoDistUrl { package: String },

  #[error("fetch failed for {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("io error while downloading to {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[async_trait]
pub trait Downloader: Send + Sync {
  /// Fetch the artifact for `package` into `dest`, returning the written file.
  ///
  /// `previous` is the package being replaced when this download is part of
  /// an update.
  async fn download(&self, package: &Package, dest: &Path, previous: Option<&Package>)
  -> Result<PathBuf, DownloadError>;
}
