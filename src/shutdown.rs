use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::{
  sync::CancellationToken,
  task::{task_tracker::TaskTrackerToken, TaskTracker},
};

use crate::errors::{Errors, Result};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Open,
  Closing,
  Closed,
}

/// Keeps the engine alive until every query producer has finished.
///
/// Producers hold a [`StreamerToken`] for their whole life. Close flips the
/// lifecycle to closing, signals every producer, waits for all tokens to be
/// dropped and only then runs the engine teardown.
pub(crate) struct ShutdownCoordinator {
  status: AtomicU8,
  closing: CancellationToken,
  closed: CancellationToken,
  streamers: TaskTracker,
}

/// Registration of one active producer; dropping it deregisters.
pub(crate) struct StreamerToken {
  _token: TaskTrackerToken,
}

impl ShutdownCoordinator {
  pub(crate) fn new() -> Self {
    Self {
      status: AtomicU8::new(OPEN),
      closing: CancellationToken::new(),
      closed: CancellationToken::new(),
      streamers: TaskTracker::new(),
    }
  }

  pub(crate) fn lifecycle(&self) -> Lifecycle {
    match self.status.load(Ordering::SeqCst) {
      OPEN => Lifecycle::Open,
      CLOSING => Lifecycle::Closing,
      _ => Lifecycle::Closed,
    }
  }

  pub(crate) fn register(&self) -> Result<StreamerToken> {
    // Take the token before looking at the status: a close that has not
    // flipped the status yet is then guaranteed to wait for us.
    let token = StreamerToken {
      _token: self.streamers.token(),
    };
    if self.status.load(Ordering::SeqCst) != OPEN {
      return Err(Errors::DatastoreClosed);
    }
    Ok(token)
  }

  /// Fires once close has begun.
  pub(crate) fn closing_signal(&self) -> CancellationToken {
    self.closing.clone()
  }

  pub(crate) fn outstanding(&self) -> usize {
    self.streamers.len()
  }

  /// Runs `teardown` once, after every registered producer is gone.
  /// Concurrent and later callers wait for that first close to finish and
  /// return `Ok`.
  pub(crate) async fn close<F>(&self, teardown: F) -> Result<()>
  where
    F: FnOnce() -> Result<()>,
  {
    if self
      .status
      .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      self.closed.cancelled().await;
      return Ok(());
    }

    self.closing.cancel();
    self.streamers.close();
    self.streamers.wait().await;

    let res = teardown();
    self.status.store(CLOSED, Ordering::SeqCst);
    self.closed.cancel();
    res
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::{
      atomic::{AtomicBool, AtomicUsize},
      Arc,
    },
    time::Duration,
  };

  #[tokio::test]
  async fn test_close_waits_for_streamers() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let token = coordinator.register().unwrap();
    let signal = coordinator.closing_signal();
    assert_eq!(coordinator.outstanding(), 1);

    let torn_down = Arc::new(AtomicBool::new(false));
    let closer = {
      let coordinator = coordinator.clone();
      let torn_down = torn_down.clone();
      tokio::spawn(async move {
        coordinator
          .close(|| {
            torn_down.store(true, Ordering::SeqCst);
            Ok(())
          })
          .await
      })
    };

    signal.cancelled().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!torn_down.load(Ordering::SeqCst));
    assert_eq!(coordinator.lifecycle(), Lifecycle::Closing);

    drop(token);
    closer.await.unwrap().unwrap();
    assert!(torn_down.load(Ordering::SeqCst));
    assert_eq!(coordinator.lifecycle(), Lifecycle::Closed);
  }

  #[tokio::test]
  async fn test_close_is_idempotent() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let teardowns = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let coordinator = coordinator.clone();
      let teardowns = teardowns.clone();
      handles.push(tokio::spawn(async move {
        coordinator
          .close(|| {
            teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
          })
          .await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.lifecycle(), Lifecycle::Closed);
  }

  #[tokio::test]
  async fn test_register_after_close() {
    let coordinator = ShutdownCoordinator::new();
    coordinator.close(|| Ok(())).await.unwrap();
    assert!(matches!(coordinator.register(), Err(Errors::DatastoreClosed)));
    assert_eq!(coordinator.outstanding(), 0);
  }
}
