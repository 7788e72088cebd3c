//! HTTP (and `file://`) artifact downloader.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::package::Package;

use super::{DownloadError, Downloader};

#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
  client: reqwest::Client,
}

impl HttpDownloader {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }

  async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
    if let Some(path) = url.strip_prefix("file://") {
      return fs::read(path).await.map_err(|source| DownloadError::Io {
        path: PathBuf::from(path),
        source,
      });
    }

    let fetch_failed = |message: String| DownloadError::FetchFailed {
      url: url.to_string(),
      message,
    };

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| fetch_failed(e.to_string()))?;

    if !response.status().is_success() {
      return Err(fetch_failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| fetch_failed(e.to_string()))?;
    Ok(bytes.to_vec())
  }
}

#[async_trait]
impl Downloader for HttpDownloader {
  async fn download(
    &self,
    package: &Package,
    dest: &Path,
    previous: Option<&Package>,
  ) -> Result<PathBuf, DownloadError> {
    let url = package.dist_url.as_deref().ok_or_else(|| DownloadError::NoDistUrl {
      package: package.to_string(),
    })?;

    info!(package = %package.name, url = %url, "downloading");
    if let Some(previous) = previous {
      debug!(package = %package.name, from = %previous.version, to = %package.version, "download is part of an update");
    }

    let io_err = |source| DownloadError::Io {
      path: dest.to_path_buf(),
      source,
    };

    fs::create_dir_all(dest).await.map_err(io_err)?;

    let bytes = self.fetch(url).await?;
    let dest_path = dest.join(url_to_filename(url));

    let mut file = fs::File::create(&dest_path).await.map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;

    let digest = hex::encode(Sha256::digest(&bytes));
    info!(package = %package.name, path = %dest_path.display(), size = bytes.len(), sha256 = %digest, "download complete");

    Ok(dest_path)
  }
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of the
/// URL if no suitable filename can be extracted.
fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let digest = hex::encode(Sha256::digest(url.as_bytes()));
  format!("download_{}", &digest[..16])
}
