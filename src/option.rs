use lazy_static::lazy_static;
use std::path::PathBuf;

use crate::{engine::Durability, logging::Logger};

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("flash-ds");
}

#[derive(Debug, Clone)]
pub struct Options {
  pub dir_path: PathBuf,

  /// Fsync the write-ahead log on every put, delete and batch commit.
  pub sync_writes: bool,

  /// Keep everything in the memtable only. `Datastore::sync` becomes a no-op.
  pub disable_wal: bool,

  /// Replay the write-ahead log through a read-only memory map.
  pub mmap_at_startup: bool,

  /// Capacity of the channel between a query producer and its consumer.
  pub result_buffer_size: usize,

  pub logger: Logger,
}

impl Options {
  pub(crate) fn write_durability(&self) -> Durability {
    if self.sync_writes {
      Durability::Sync
    } else {
      Durability::NoSync
    }
  }
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      sync_writes: false,
      disable_wal: false,
      mmap_at_startup: true,
      result_buffer_size: 64,
      logger: Logger::default(),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
  pub max_batch_num: usize,

  pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
  fn default() -> Self {
    Self {
      max_batch_num: 10000,
      sync_writes: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
