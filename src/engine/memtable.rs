use std::{
  cmp::Ordering,
  ops::Bound,
  sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

/// A user key tagged with the sequence number of the write that produced it.
///
/// Versions of one key sort newest first, so a range starting at
/// `(key, snapshot)` lands on the newest version visible to that snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionedKey {
  key: Bytes,
  seq: u64,
}

impl VersionedKey {
  fn new(key: &[u8], seq: u64) -> Self {
    Self {
      key: Bytes::copy_from_slice(key),
      seq,
    }
  }
}

impl Ord for VersionedKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .key
      .cmp(&other.key)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for VersionedKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
  Put(Bytes, Bytes),
  Delete(Bytes),
}

impl WriteOp {
  pub fn key(&self) -> &Bytes {
    match self {
      WriteOp::Put(key, _) | WriteOp::Delete(key) => key,
    }
  }
}

/// Multi-version sorted table. Deletes are stored as `None` tombstones.
pub struct Memtable {
  map: SkipMap<VersionedKey, Option<Bytes>>,
  visible_seq: AtomicU64,
}

impl Memtable {
  pub fn new() -> Self {
    Self {
      map: SkipMap::new(),
      visible_seq: AtomicU64::new(0),
    }
  }

  pub fn visible_seq(&self) -> u64 {
    self.visible_seq.load(AtomicOrdering::Acquire)
  }

  /// Inserts every op under `seq`, then makes `seq` visible. Ops on the
  /// same key replace each other, so the last one in `ops` wins.
  ///
  /// Callers must serialize calls and pass strictly increasing sequences.
  pub fn apply(&self, seq: u64, ops: &[WriteOp]) {
    for op in ops {
      let (key, value) = match op {
        WriteOp::Put(key, value) => (key.clone(), Some(value.clone())),
        WriteOp::Delete(key) => (key.clone(), None),
      };
      self.map.insert(VersionedKey { key, seq }, value);
    }
    self.visible_seq.store(seq, AtomicOrdering::Release);
  }

  pub fn get(&self, key: &[u8], snapshot: u64) -> Option<Bytes> {
    self.lookup(key, snapshot).flatten()
  }

  /// `None` when the key has no version at `snapshot`, `Some(None)` when the
  /// newest visible version is a tombstone.
  pub fn lookup(&self, key: &[u8], snapshot: u64) -> Option<Option<Bytes>> {
    let entry = self.map.range(VersionedKey::new(key, snapshot)..).next()?;
    if entry.key().key.as_ref() != key {
      return None;
    }
    Some(entry.value().clone())
  }

  pub fn first_key(&self) -> Option<Bytes> {
    self.map.front().map(|e| e.key().key.clone())
  }

  pub fn last_key(&self) -> Option<Bytes> {
    self.map.back().map(|e| e.key().key.clone())
  }

  /// Smallest user key `>= from`.
  pub fn key_at_or_after(&self, from: &[u8]) -> Option<Bytes> {
    self
      .map
      .range(VersionedKey::new(from, u64::MAX)..)
      .next()
      .map(|e| e.key().key.clone())
  }

  /// Smallest user key `> after`.
  pub fn key_after(&self, after: &[u8]) -> Option<Bytes> {
    let start = VersionedKey::new(after, 0);
    self
      .map
      .range((Bound::Excluded(start), Bound::Unbounded))
      .next()
      .map(|e| e.key().key.clone())
  }

  /// Largest user key `< before`.
  pub fn key_before(&self, before: &[u8]) -> Option<Bytes> {
    self
      .map
      .range(..VersionedKey::new(before, u64::MAX))
      .next_back()
      .map(|e| e.key().key.clone())
  }

  pub fn live_keys(&self, snapshot: u64) -> usize {
    let mut count = 0;
    let mut next = self.first_key();
    while let Some(key) = next {
      if self.get(&key, snapshot).is_some() {
        count += 1;
      }
      next = self.key_after(&key);
    }
    count
  }

  /// Every key alive at `snapshot` as a put, in key order.
  pub fn live_entries(&self, snapshot: u64) -> Vec<WriteOp> {
    let mut ops = Vec::new();
    let mut next = self.first_key();
    while let Some(key) = next {
      next = self.key_after(&key);
      if let Some(value) = self.get(&key, snapshot) {
        ops.push(WriteOp::Put(key, value));
      }
    }
    ops
  }

  /// Drops the versions of `key` that no snapshot at or above `watermark`
  /// can read: everything older than the newest version at or below the
  /// watermark, and that version itself when it is a tombstone.
  ///
  /// Older versions go first, so a concurrent reader never sees a value
  /// resurface from under a removed tombstone.
  pub fn prune(&self, key: &[u8], watermark: u64) -> usize {
    let mut range = self.map.range(VersionedKey::new(key, watermark)..);
    let Some(newest) = range.next() else {
      return 0;
    };
    if newest.key().key.as_ref() != key {
      return 0;
    }
    let mut removed = 0;
    for entry in range {
      if entry.key().key.as_ref() != key {
        break;
      }
      if entry.remove() {
        removed += 1;
      }
    }
    if newest.value().is_none() && newest.remove() {
      removed += 1;
    }
    removed
  }

  /// Number of stored versions, tombstones included.
  pub fn version_count(&self) -> usize {
    self.map.len()
  }
}

impl Default for Memtable {
  fn default() -> Self {
    Self::new()
  }
}
