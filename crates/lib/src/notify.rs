//! Post-run install notifications.
//!
//! Packages that declare a notification endpoint are queued while the run
//! applies them and reported once, after every batch has completed. Flushing
//! is best-effort: failures are logged and otherwise ignored, every request is
//! bounded by a timeout, and cancelling the run abandons whatever is still in
//! flight.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound for a single notification request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

use crate::package::Package;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifiedDownload {
  pub name: String,
  pub version: String,
}

#[derive(Debug, Serialize)]
struct NotificationBody<'a> {
  downloads: &'a [NotifiedDownload],
}

#[derive(Debug, Default)]
pub struct NotificationQueue {
  /// Endpoint URL -> downloads to report to it.
  pending: BTreeMap<String, Vec<NotifiedDownload>>,
}

impl NotificationQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue `package` if it declares a notification endpoint.
  pub fn record(&mut self, package: &Package) {
    let Some(url) = &package.notification_url else {
      return;
    };

    self.pending.entry(url.clone()).or_default().push(NotifiedDownload {
      name: package.name.clone(),
      version: package.version.clone(),
    });
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  pub fn pending(&self) -> &BTreeMap<String, Vec<NotifiedDownload>> {
    &self.pending
  }

  pub fn clear(&mut self) {
    self.pending.clear();
  }

  /// Send one POST per endpoint, concurrently, and empty the queue. Never fails.
  pub async fn flush(&mut self, client: &reqwest::Client, timeout: Duration, cancel: &CancellationToken) {
    let pending = std::mem::take(&mut self.pending);
    if pending.is_empty() {
      return;
    }

    info!(endpoints = pending.len(), "sending install notifications");

    let mut join_set = JoinSet::new();
    for (url, downloads) in pending {
      let client = client.clone();
      join_set.spawn(async move { send(&client, &url, &downloads, timeout).await });
    }

    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        next = join_set.join_next() => Some(next),
      };
      match next {
        None => {
          debug!(remaining = join_set.len(), "run cancelled, abandoning notifications");
          join_set.shutdown().await;
          return;
        }
        Some(None) => return,
        Some(Some(Ok(()))) => {}
        Some(Some(Err(e))) => debug!(error = %e, "notification task failed"),
      }
    }
  }
}

async fn send(client: &reqwest::Client, url: &str, downloads: &[NotifiedDownload], timeout: Duration) {
  let body = NotificationBody { downloads };
  match client.post(url).timeout(timeout).json(&body).send().await {
    Ok(response) if response.status().is_success() => {
      debug!(url = %url, count = downloads.len(), "notification sent");
    }
    Ok(response) => {
      debug!(url = %url, status = %response.status(), "notification endpoint rejected report");
    }
    Err(e) => {
      debug!(url = %url, error = %e, "notification failed");
    }
  }
}
