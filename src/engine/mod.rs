//! The sorted key-value engine the datastore is layered on.
//!
//! [`Engine`], [`Cursor`] and [`EngineBatch`] describe everything the
//! datastore needs from its storage: point reads and writes, bounded ordered
//! cursors, atomic batches, metrics and lifecycle. [`SkipListEngine`] is the
//! bundled implementation.

pub mod memtable;
pub mod skiplist;
pub mod wal;

use std::fmt;

use bytes::Bytes;

use crate::errors::Result;

pub use self::skiplist::SkipListEngine;

/// Whether a write is fsync'ed to the write-ahead log before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
  Sync,
  NoSync,
}

/// Byte range a cursor is confined to: `[lower_bound, upper_bound)`.
/// `None` means unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOptions {
  pub lower_bound: Option<Bytes>,
  pub upper_bound: Option<Bytes>,
}

impl CursorOptions {
  pub fn contains(&self, key: &[u8]) -> bool {
    if let Some(lower) = &self.lower_bound {
      if key < lower.as_ref() {
        return false;
      }
    }
    match &self.upper_bound {
      Some(upper) => key < upper.as_ref(),
      None => true,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
  pub disk_space_usage: u64,
  pub wal_bytes: u64,
  pub live_keys: usize,
  pub open_cursors: usize,
  pub visible_seq: u64,
}

impl fmt::Display for Metrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "disk-space-usage: {}", self.disk_space_usage)?;
    writeln!(f, "wal-bytes:        {}", self.wal_bytes)?;
    writeln!(f, "live-keys:        {}", self.live_keys)?;
    writeln!(f, "open-cursors:     {}", self.open_cursors)?;
    write!(f, "visible-seq:      {}", self.visible_seq)
  }
}

pub trait Engine: Sync + Send {
  /// Returns `None` when the key does not exist.
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

  fn set(&self, key: Bytes, value: Bytes, durability: Durability) -> Result<()>;

  fn delete(&self, key: Bytes, durability: Durability) -> Result<()>;

  /// Writes an empty record to the log, fsync'ing it when asked to.
  fn log_data(&self, durability: Durability) -> Result<()>;

  /// Opens a cursor over a consistent snapshot of `[lower, upper)`.
  /// The cursor starts unpositioned.
  fn new_cursor(&self, options: CursorOptions) -> Result<Box<dyn Cursor>>;

  fn new_batch(&self) -> Box<dyn EngineBatch>;

  fn metrics(&self) -> Metrics;

  fn wal_disabled(&self) -> bool;

  fn flush(&self) -> Result<()>;

  fn close(&self) -> Result<()>;
}

/// A bounded, bidirectional iterator. `key` and `value` may only be read
/// while `valid()` holds and are invalidated by the next move.
pub trait Cursor: Send {
  fn seek_first(&mut self) -> bool;

  fn seek_last(&mut self) -> bool;

  fn next(&mut self) -> bool;

  fn prev(&mut self) -> bool;

  fn valid(&self) -> bool;

  fn key(&self) -> &[u8];

  fn value(&self) -> Result<&[u8]>;

  /// The error that stopped iteration, if any.
  fn error(&self) -> Option<crate::errors::Errors>;

  fn close(&mut self) -> Result<()>;
}

/// Pending writes applied in insertion order by one atomic commit.
pub trait EngineBatch: Send {
  fn set(&mut self, key: Bytes, value: Bytes) -> Result<()>;

  fn delete(&mut self, key: Bytes) -> Result<()>;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn commit(self: Box<Self>, durability: Durability) -> Result<()>;
}
