//! Turning process signals into run cancellation.
//!
//! [`SignalListener::spawn`] watches for interrupt, terminate and hangup and
//! cancels the given token on the first one received. The engine then rolls
//! back and returns [`EngineError::Interrupted`](crate::engine::EngineError);
//! the caller asks the listener which signal it was to pick an exit code.

use std::io;
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
  Interrupt,
  Terminate,
  Hangup,
}

impl Signal {
  /// The conventional POSIX signal number.
  pub fn number(self) -> i32 {
    match self {
      Signal::Hangup => 1,
      Signal::Interrupt => 2,
      Signal::Terminate => 15,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Signal::Hangup => "SIGHUP",
      Signal::Interrupt => "SIGINT",
      Signal::Terminate => "SIGTERM",
    }
  }

  /// Exit status a shell reports for a process killed by this signal.
  pub fn exit_code(self) -> i32 {
    128 + self.number()
  }
}

/// Background task forwarding the first received signal to a cancellation token.
///
/// The task is aborted when the listener is dropped.
pub struct SignalListener {
  received: Arc<OnceLock<Signal>>,
  task: JoinHandle<()>,
}

impl SignalListener {
  /// Start listening. Must be called from within a tokio runtime.
  pub fn spawn(token: CancellationToken) -> io::Result<Self> {
    let received = Arc::new(OnceLock::new());
    let task = spawn_listener(token, received.clone())?;
    Ok(Self { received, task })
  }

  /// The signal that cancelled the run, if any arrived.
  pub fn received(&self) -> Option<Signal> {
    self.received.get().copied()
  }
}

impl Drop for SignalListener {
  fn drop(&mut self) {
    self.task.abort();
  }
}

fn record(token: &CancellationToken, received: &OnceLock<Signal>, signal: Signal) {
  warn!(signal = signal.name(), "received signal, aborting");
  let _ = received.set(signal);
  token.cancel();
}

#[cfg(unix)]
fn spawn_listener(token: CancellationToken, received: Arc<OnceLock<Signal>>) -> io::Result<JoinHandle<()>> {
  use tokio::signal::unix::{SignalKind, signal};

  let mut interrupt = signal(SignalKind::interrupt())?;
  let mut terminate = signal(SignalKind::terminate())?;
  let mut hangup = signal(SignalKind::hangup())?;

  Ok(tokio::spawn(async move {
    let signal = tokio::select! {
      _ = interrupt.recv() => Signal::Interrupt,
      _ = terminate.recv() => Signal::Terminate,
      _ = hangup.recv() => Signal::Hangup,
    };
    record(&token, &received, signal);
  }))
}

#[cfg(not(unix))]
fn spawn_listener(token: CancellationToken, received: Arc<OnceLock<Signal>>) -> io::Result<JoinHandle<()>> {
  Ok(tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      record(&token, &received, Signal::Interrupt);
    }
  }))
}
