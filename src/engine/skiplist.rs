use std::{
  collections::{BTreeMap, HashSet},
  fs::{self, File, OpenOptions},
  path::PathBuf,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::Mutex;

use crate::{
  errors::{Errors, Result},
  logging::Logger,
  option::{IOManagerType, Options},
  util,
};

use super::{
  memtable::{Memtable, WriteOp},
  wal::{Wal, WalRecord},
  Cursor, CursorOptions, Durability, Engine, EngineBatch, Metrics,
};

pub const FILE_LOCK_NAME: &str = "flock";

/// Sorted engine made of a multi-version skiplist memtable and an optional
/// write-ahead log.
pub struct SkipListEngine {
  shared: Arc<Shared>,
}

struct Shared {
  dir_path: PathBuf,
  memtable: Memtable,
  wal: Option<Wal>,
  // last assigned sequence number; held for the whole write path
  commit_lock: Mutex<u64>,
  snapshots: Mutex<Snapshots>,
  open_cursors: AtomicUsize,
  closed: AtomicBool,
  lock_file: Mutex<Option<File>>,
  logger: Logger,
}

/// Snapshots held by open cursors, and the keys whose old versions they keep
/// alive.
#[derive(Default)]
struct Snapshots {
  pinned: BTreeMap<u64, usize>,
  lagging: HashSet<Bytes>,
}

impl Snapshots {
  /// Oldest sequence any reader may still ask for.
  fn watermark(&self, visible_seq: u64) -> u64 {
    self
      .pinned
      .keys()
      .next()
      .copied()
      .unwrap_or(visible_seq)
  }
}

impl SkipListEngine {
  pub fn open(options: &Options) -> Result<Self> {
    let logger = options.logger.clone();
    let memtable = Memtable::new();
    let mut last_seq = 0;

    let (wal, lock_file) = if options.disable_wal {
      (None, None)
    } else {
      let dir_path = &options.dir_path;
      if !dir_path.is_dir() {
        if let Err(e) = fs::create_dir_all(dir_path) {
          logger.error(format_args!("failed to create database directory: {}", e));
          return Err(Errors::FailedToCreateDatabaseDir);
        }
      }

      let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir_path.join(FILE_LOCK_NAME))
        .map_err(|e| Errors::Io {
          op: "open lock file",
          reason: e.to_string(),
        })?;
      if lock_file.try_lock_exclusive().is_err() {
        logger.error(format_args!(
          "database directory {} is locked by another process",
          dir_path.display()
        ));
        return Err(Errors::DatabaseIsUsing);
      }

      let io_type = if options.mmap_at_startup {
        IOManagerType::MemoryMap
      } else {
        IOManagerType::StandardFileIO
      };
      let (mut wal, replay) = Wal::open(dir_path, io_type, &logger)?;
      let mut replayed_ops = 0;
      for record in &replay.records {
        last_seq = last_seq.max(record.seq);
        memtable.apply(last_seq, &record.ops);
        for op in &record.ops {
          memtable.prune(op.key(), last_seq);
        }
        replayed_ops += record.ops.len();
      }
      logger.info(format_args!(
        "opened {} with {} replayed writes, seq {}",
        wal.path().display(),
        replay.records.len(),
        last_seq
      ));

      let live = memtable.live_entries(last_seq);
      if replayed_ops > live.len() {
        let before = wal.size();
        wal = wal.rewrite(&WalRecord {
          seq: last_seq,
          ops: live,
        })?;
        logger.info(format_args!(
          "compacted {} from {} to {} bytes",
          wal.path().display(),
          before,
          wal.size()
        ));
      }
      (Some(wal), Some(lock_file))
    };

    Ok(Self {
      shared: Arc::new(Shared {
        dir_path: options.dir_path.clone(),
        memtable,
        wal,
        commit_lock: Mutex::new(last_seq),
        snapshots: Mutex::new(Snapshots::default()),
        open_cursors: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        lock_file: Mutex::new(lock_file),
        logger,
      }),
    })
  }
}

impl Shared {
  fn check_open(&self) -> Result<()> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Errors::EngineClosed);
    }
    Ok(())
  }

  /// Logs and applies `ops` as one unit. Nothing becomes visible unless the
  /// log append succeeded.
  fn commit(&self, ops: Vec<WriteOp>, durability: Durability) -> Result<()> {
    let mut last_seq = self.commit_lock.lock();
    self.check_open()?;
    let seq = *last_seq + 1;
    let record = WalRecord { seq, ops };
    if let Some(wal) = &self.wal {
      wal.append(&record, durability)?;
    }
    self.memtable.apply(seq, &record.ops);
    *last_seq = seq;

    let watermark = {
      let mut snapshots = self.snapshots.lock();
      let watermark = snapshots.watermark(seq);
      if watermark < seq {
        snapshots
          .lagging
          .extend(record.ops.iter().map(|op| op.key().clone()));
      }
      watermark
    };
    for op in &record.ops {
      self.memtable.prune(op.key(), watermark);
    }
    Ok(())
  }

  /// Registers a reader at the current visible sequence.
  fn pin(&self) -> u64 {
    let mut snapshots = self.snapshots.lock();
    let seq = self.memtable.visible_seq();
    *snapshots.pinned.entry(seq).or_insert(0) += 1;
    seq
  }

  /// Releases a reader, then drops the versions it alone was keeping.
  fn unpin(&self, seq: u64) {
    let (keys, watermark) = {
      let mut snapshots = self.snapshots.lock();
      let before = snapshots.watermark(seq);
      if let Some(count) = snapshots.pinned.get_mut(&seq) {
        *count -= 1;
        if *count == 0 {
          snapshots.pinned.remove(&seq);
        }
      }
      let watermark = snapshots.watermark(self.memtable.visible_seq());
      if snapshots.pinned.is_empty() {
        (snapshots.lagging.drain().collect::<Vec<_>>(), watermark)
      } else if watermark > before {
        (snapshots.lagging.iter().cloned().collect(), watermark)
      } else {
        (Vec::new(), watermark)
      }
    };
    for key in &keys {
      self.memtable.prune(key, watermark);
    }
  }
}

impl Engine for SkipListEngine {
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
    self.shared.check_open()?;
    let memtable = &self.shared.memtable;
    loop {
      let snapshot = memtable.visible_seq();
      let value = memtable.get(key, snapshot);
      // a miss may be a version pruned under us by a newer commit
      if value.is_some() || memtable.visible_seq() == snapshot {
        return Ok(value);
      }
    }
  }

  fn set(&self, key: Bytes, value: Bytes, durability: Durability) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.shared.commit(vec![WriteOp::Put(key, value)], durability)
  }

  fn delete(&self, key: Bytes, durability: Durability) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.shared.commit(vec![WriteOp::Delete(key)], durability)
  }

  fn log_data(&self, durability: Durability) -> Result<()> {
    let last_seq = self.shared.commit_lock.lock();
    self.shared.check_open()?;
    let Some(wal) = &self.shared.wal else {
      return Ok(());
    };
    wal.append(
      &WalRecord {
        seq: *last_seq,
        ops: Vec::new(),
      },
      durability,
    )
  }

  fn new_cursor(&self, options: CursorOptions) -> Result<Box<dyn Cursor>> {
    self.shared.check_open()?;
    self.shared.open_cursors.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(SkipListCursor {
      shared: self.shared.clone(),
      snapshot: self.shared.pin(),
      options,
      current: None,
      err: None,
      closed: false,
    }))
  }

  fn new_batch(&self) -> Box<dyn EngineBatch> {
    Box::new(SkipListBatch {
      shared: self.shared.clone(),
      ops: Vec::new(),
    })
  }

  fn metrics(&self) -> Metrics {
    let snapshot = self.shared.pin();
    let (disk_space_usage, wal_bytes) = match &self.shared.wal {
      Some(wal) => (util::file::dir_disk_size(&self.shared.dir_path), wal.size()),
      None => (0, 0),
    };
    let live_keys = self.shared.memtable.live_keys(snapshot);
    self.shared.unpin(snapshot);
    Metrics {
      disk_space_usage,
      wal_bytes,
      live_keys,
      open_cursors: self.shared.open_cursors.load(Ordering::SeqCst),
      visible_seq: snapshot,
    }
  }

  fn wal_disabled(&self) -> bool {
    self.shared.wal.is_none()
  }

  fn flush(&self) -> Result<()> {
    self.shared.check_open()?;
    match &self.shared.wal {
      Some(wal) => wal.sync(),
      None => Ok(()),
    }
  }

  fn close(&self) -> Result<()> {
    if self.shared.closed.swap(true, Ordering::SeqCst) {
      return Err(Errors::EngineClosed);
    }
    let _guard = self.shared.commit_lock.lock();
    if let Some(wal) = &self.shared.wal {
      wal.sync()?;
    }
    if let Some(lock_file) = self.shared.lock_file.lock().take() {
      let _ = lock_file.unlock();
    }
    self.shared.logger.info(format_args!(
      "engine at {} closed",
      self.shared.dir_path.display()
    ));
    Ok(())
  }
}

impl Drop for SkipListEngine {
  fn drop(&mut self) {
    if self.shared.closed.load(Ordering::SeqCst) {
      return;
    }
    if let Some(wal) = &self.shared.wal {
      if let Err(e) = wal.sync() {
        self
          .shared
          .logger
          .error(format_args!("failed to sync wal on drop: {}", e));
      }
    }
  }
}

pub struct SkipListBatch {
  shared: Arc<Shared>,
  ops: Vec<WriteOp>,
}

impl EngineBatch for SkipListBatch {
  fn set(&mut self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.ops.push(WriteOp::Put(key, value));
    Ok(())
  }

  fn delete(&mut self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.ops.push(WriteOp::Delete(key));
    Ok(())
  }

  fn len(&self) -> usize {
    self.ops.len()
  }

  fn commit(self: Box<Self>, durability: Durability) -> Result<()> {
    if self.ops.is_empty() {
      return self.shared.check_open();
    }
    self.shared.commit(self.ops, durability)
  }
}

/// Cursor over a fixed snapshot of the memtable.
pub struct SkipListCursor {
  shared: Arc<Shared>,
  snapshot: u64,
  options: CursorOptions,
  current: Option<(Bytes, Bytes)>,
  err: Option<Errors>,
  closed: bool,
}

impl SkipListCursor {
  fn usable(&mut self) -> bool {
    if self.closed {
      self.current = None;
      return false;
    }
    if self.shared.closed.load(Ordering::SeqCst) {
      self.err = Some(Errors::EngineClosed);
      self.current = None;
      return false;
    }
    true
  }

  fn settle_forward(&mut self, mut candidate: Option<Bytes>) -> bool {
    let memtable = &self.shared.memtable;
    while let Some(key) = candidate {
      if let Some(upper) = &self.options.upper_bound {
        if key >= *upper {
          break;
        }
      }
      if let Some(Some(value)) = memtable.lookup(&key, self.snapshot) {
        self.current = Some((key, value));
        return true;
      }
      candidate = memtable.key_after(&key);
    }
    self.current = None;
    false
  }

  fn settle_backward(&mut self, mut candidate: Option<Bytes>) -> bool {
    let memtable = &self.shared.memtable;
    while let Some(key) = candidate {
      if let Some(lower) = &self.options.lower_bound {
        if key < *lower {
          break;
        }
      }
      if let Some(Some(value)) = memtable.lookup(&key, self.snapshot) {
        self.current = Some((key, value));
        return true;
      }
      candidate = memtable.key_before(&key);
    }
    self.current = None;
    false
  }
}

impl Cursor for SkipListCursor {
  fn seek_first(&mut self) -> bool {
    if !self.usable() {
      return false;
    }
    let start = match &self.options.lower_bound {
      Some(lower) => self.shared.memtable.key_at_or_after(lower),
      None => self.shared.memtable.first_key(),
    };
    self.settle_forward(start)
  }

  fn seek_last(&mut self) -> bool {
    if !self.usable() {
      return false;
    }
    let start = match &self.options.upper_bound {
      Some(upper) => self.shared.memtable.key_before(upper),
      None => self.shared.memtable.last_key(),
    };
    self.settle_backward(start)
  }

  fn next(&mut self) -> bool {
    if !self.usable() {
      return false;
    }
    let Some((key, _)) = self.current.take() else {
      return false;
    };
    let candidate = self.shared.memtable.key_after(&key);
    self.settle_forward(candidate)
  }

  fn prev(&mut self) -> bool {
    if !self.usable() {
      return false;
    }
    let Some((key, _)) = self.current.take() else {
      return false;
    };
    let candidate = self.shared.memtable.key_before(&key);
    self.settle_backward(candidate)
  }

  fn valid(&self) -> bool {
    self.current.is_some()
  }

  fn key(&self) -> &[u8] {
    self.current.as_ref().map(|(k, _)| k.as_ref()).unwrap_or_default()
  }

  fn value(&self) -> Result<&[u8]> {
    match &self.current {
      Some((_, v)) => Ok(v.as_ref()),
      None => Err(self.err.clone().unwrap_or(Errors::ReadDataFileEOF)),
    }
  }

  fn error(&self) -> Option<Errors> {
    self.err.clone()
  }

  fn close(&mut self) -> Result<()> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;
    self.current = None;
    self.shared.unpin(self.snapshot);
    self.shared.open_cursors.fetch_sub(1, Ordering::SeqCst);
    Ok(())
  }
}

impl Drop for SkipListCursor {
  fn drop(&mut self) {
    let _ = Cursor::close(self);
  }
}
