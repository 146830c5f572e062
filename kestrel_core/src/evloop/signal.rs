//! Signal watcher tasks.
//!
//! The OS handler side is tokio's: each watched signal gets a task that turns
//! deliveries into completions drained by the poll phase, so the JS callback
//! always runs on the loop thread.

use crate::evloop::msg::Completion;
use crate::evloop::registry::HandleId;

use std::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Maps a signal name (`"SIGINT"`, …) to its number, for the signals binding.
pub fn signum_from_name(name: &str) -> Option<i32> {
  match name {
    "SIGHUP" => Some(1),
    "SIGINT" => Some(2),
    "SIGQUIT" => Some(3),
    "SIGABRT" => Some(6),
    "SIGUSR1" => Some(10),
    "SIGUSR2" => Some(12),
    "SIGPIPE" => Some(13),
    "SIGALRM" => Some(14),
    "SIGTERM" => Some(15),
    "SIGCHLD" => Some(17),
    "SIGCONT" => Some(18),
    "SIGWINCH" => Some(28),
    _ => None,
  }
}

#[cfg(unix)]
pub async fn signal_task(
  id: HandleId,
  signum: i32,
  completions: Sender<Completion>,
  cancel: CancellationToken,
) {
  use tokio::signal::unix::{SignalKind, signal};

  let mut watcher = match signal(SignalKind::from_raw(signum)) {
    Ok(watcher) => watcher,
    Err(e) => {
      trace!("failed to watch signal {signum}: {e:?}");
      return;
    }
  };

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      received = watcher.recv() => {
        if received.is_none() {
          break;
        }
        if completions.send(Completion::Signal { id, signum }).is_err() {
          break;
        }
      }
    }
  }
}

#[cfg(windows)]
pub async fn signal_task(
  id: HandleId,
  signum: i32,
  completions: Sender<Completion>,
  cancel: CancellationToken,
) {
  // Only ctrl-c maps cleanly on windows; everything else is ignored.
  if signum != 2 {
    return;
  }
  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      received = tokio::signal::ctrl_c() => {
        if received.is_err() {
          break;
        }
        if completions.send(Completion::Signal { id, signum }).is_err() {
          break;
        }
      }
    }
  }
}
