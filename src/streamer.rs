use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
  engine::Cursor,
  errors::{Errors, Result},
  query::{
    naive::naive_query_apply,
    planner::Direction,
    Entry, Query, QueryResult,
  },
};

/// Why a producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
  /// The cursor ran out of keys.
  Exhausted,
  /// `limit` entries were delivered.
  LimitReached,
  /// An engine error was delivered as the last event.
  Failed,
  /// The consumer went away or the datastore started closing.
  Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
  Created,
  Skipping,
  Emitting,
  Closed,
}

/// Delivery could not proceed; the producer must stop.
#[derive(Debug)]
pub(crate) struct Interrupted;

/// Producer half of the result channel.
pub(crate) struct ResultSender {
  tx: mpsc::Sender<QueryResult>,
  shutdown: CancellationToken,
  cancel: CancellationToken,
}

impl ResultSender {
  pub(crate) fn new(
    tx: mpsc::Sender<QueryResult>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      tx,
      shutdown,
      cancel,
    }
  }

  fn stop_requested(&self) -> bool {
    self.shutdown.is_cancelled() || self.cancel.is_cancelled()
  }

  /// Waits until the consumer takes `result`, the datastore starts closing,
  /// or the consumer cancels, whichever comes first.
  pub(crate) async fn send(&self, result: QueryResult) -> std::result::Result<(), Interrupted> {
    tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => {}
      _ = self.cancel.cancelled() => {}
      sent = self.tx.send(result) => {
        if sent.is_ok() {
          return Ok(());
        }
      }
    }
    Err(self.interrupt())
  }

  /// Tells the consumer, if it is still listening, that the stream was cut
  /// short. Never blocks.
  fn interrupt(&self) -> Interrupted {
    let _ = self.tx.try_send(Err(Errors::CloseRequested));
    Interrupted
  }
}

/// Closes the cursor exactly once, on whichever path gets there first.
struct CursorGuard {
  cursor: Box<dyn Cursor>,
  released: bool,
}

impl CursorGuard {
  fn release(&mut self) {
    if !self.released {
      self.released = true;
      let _ = self.cursor.close();
    }
  }
}

impl Drop for CursorGuard {
  fn drop(&mut self) {
    self.release();
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  /// Cursor order is the requested order.
  Native,
  /// Everything is read, then filtered, sorted and paged in memory.
  Naive,
}

/// Drives one cursor for one query and feeds the results channel.
pub(crate) struct ResultStreamer {
  cursor: CursorGuard,
  direction: Direction,
  query: Query,
  mode: Mode,
  state: StreamState,
}

impl ResultStreamer {
  pub(crate) fn native(cursor: Box<dyn Cursor>, direction: Direction, query: &Query) -> Self {
    Self::build(cursor, direction, query, Mode::Native)
  }

  pub(crate) fn naive(cursor: Box<dyn Cursor>, base: Option<Direction>, query: &Query) -> Self {
    Self::build(
      cursor,
      base.unwrap_or(Direction::Forward),
      query,
      Mode::Naive,
    )
  }

  fn build(cursor: Box<dyn Cursor>, direction: Direction, query: &Query, mode: Mode) -> Self {
    Self {
      cursor: CursorGuard {
        cursor,
        released: false,
      },
      direction,
      query: query.clone(),
      mode,
      state: StreamState::Created,
    }
  }

  #[cfg(test)]
  pub(crate) fn state(&self) -> StreamState {
    self.state
  }

  /// Moves the cursor onto its first key. Returns false when there is
  /// nothing to read; `error()` tells whether that is because of a failure.
  pub(crate) fn position(&mut self) -> bool {
    self.state = StreamState::Skipping;
    match self.direction {
      Direction::Forward => self.cursor.cursor.seek_first(),
      Direction::Reverse => self.cursor.cursor.seek_last(),
    }
  }

  pub(crate) fn error(&self) -> Option<Errors> {
    self.cursor.cursor.error()
  }

  pub(crate) fn close(&mut self) {
    self.cursor.release();
    self.state = StreamState::Closed;
  }

  fn advance(&mut self) {
    match self.direction {
      Direction::Forward => self.cursor.cursor.next(),
      Direction::Reverse => self.cursor.cursor.prev(),
    };
  }

  /// Copies the current key (and value, if needed) out of the cursor. Must
  /// happen before the cursor moves again.
  fn materialize(&self) -> Result<Entry> {
    let cursor = &self.cursor.cursor;
    let key = match std::str::from_utf8(cursor.key()) {
      Ok(key) => key.to_string(),
      Err(_) => return Err(Errors::KeyNotUtf8(hex_key(cursor.key()))),
    };
    let mut entry = Entry {
      key,
      value: None,
      size: None,
    };
    if !self.query.keys_only || self.query.returns_sizes {
      let value = cursor.value()?;
      if self.query.returns_sizes {
        entry.size = Some(value.len());
      }
      if !self.query.keys_only {
        entry.value = Some(Bytes::copy_from_slice(value));
      }
    }
    Ok(entry)
  }

  /// Next entry under the cursor, `None` once the cursor is done.
  fn next_entry(&mut self) -> Result<Option<Entry>> {
    if !self.cursor.cursor.valid() {
      return match self.cursor.cursor.error() {
        Some(err) => Err(err),
        None => Ok(None),
      };
    }
    let entry = self.materialize();
    self.advance();
    entry.map(Some)
  }

  /// Next entry that passes every filter.
  fn pull(&mut self) -> Result<Option<Entry>> {
    while let Some(entry) = self.next_entry()? {
      if self.query.matches(&entry) {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }

  /// Runs the stream to completion. The cursor is released on every return
  /// path, and on drop if the task itself is aborted.
  pub(crate) async fn run(mut self, sender: ResultSender) -> StreamEnd {
    if self.state == StreamState::Created {
      self.position();
    }
    let end = match self.mode {
      Mode::Native => self.run_native(&sender).await,
      Mode::Naive => self.run_naive(&sender).await,
    };
    self.close();
    end
  }

  async fn run_native(&mut self, sender: &ResultSender) -> StreamEnd {
    let (offset, limit) = (self.query.offset, self.query.limit);
    self.state = StreamState::Skipping;
    let mut skipped = 0;
    while skipped < offset {
      if sender.stop_requested() {
        sender.interrupt();
        return StreamEnd::Interrupted;
      }
      match self.pull() {
        Ok(Some(_)) => skipped += 1,
        Ok(None) => return StreamEnd::Exhausted,
        Err(err) => return self.fail(sender, err).await,
      }
    }

    self.state = StreamState::Emitting;
    let mut sent = 0;
    while limit == 0 || sent < limit {
      match self.pull() {
        Ok(Some(entry)) => {
          if sender.send(Ok(entry)).await.is_err() {
            return StreamEnd::Interrupted;
          }
          sent += 1;
        }
        Ok(None) => return StreamEnd::Exhausted,
        Err(err) => return self.fail(sender, err).await,
      }
    }
    StreamEnd::LimitReached
  }

  async fn run_naive(&mut self, sender: &ResultSender) -> StreamEnd {
    let mut entries = Vec::new();
    loop {
      if sender.stop_requested() {
        sender.interrupt();
        return StreamEnd::Interrupted;
      }
      match self.next_entry() {
        Ok(Some(entry)) => entries.push(entry),
        Ok(None) => break,
        Err(err) => return self.fail(sender, err).await,
      }
    }
    // the cursor is not needed for the in-memory part
    self.cursor.release();

    let entries = naive_query_apply(&self.query, entries);

    self.state = StreamState::Emitting;
    let limit = self.query.limit;
    let reached_limit = limit > 0 && entries.len() == limit;
    for entry in entries {
      if sender.send(Ok(entry)).await.is_err() {
        return StreamEnd::Interrupted;
      }
    }
    if reached_limit {
      StreamEnd::LimitReached
    } else {
      StreamEnd::Exhausted
    }
  }

  async fn fail(&mut self, sender: &ResultSender, err: Errors) -> StreamEnd {
    match sender.send(Err(err)).await {
      Ok(()) => StreamEnd::Failed,
      Err(Interrupted) => StreamEnd::Interrupted,
    }
  }
}

fn hex_key(key: &[u8]) -> String {
  key.iter().map(|b| format!("{:02x}", b)).collect()
}
