use bytes::Bytes;

use crate::{
  engine::{Durability, EngineBatch},
  errors::{Errors, Result},
  key::Key,
  option::WriteBatchOptions,
};

/// Accumulates puts and deletes and commits them atomically.
///
/// Operations are applied in insertion order, so a later operation on a key
/// shadows an earlier one. The first failed operation aborts the batch: every
/// later call returns [`Errors::BatchAborted`] and nothing is written.
pub struct Batch {
  inner: Option<Box<dyn EngineBatch>>,
  options: WriteBatchOptions,
}

impl Batch {
  pub(crate) fn new(inner: Box<dyn EngineBatch>, options: WriteBatchOptions) -> Self {
    Self {
      inner: Some(inner),
      options,
    }
  }

  pub fn put<V: Into<Bytes>>(&mut self, key: &Key, value: V) -> Result<()> {
    let value = value.into();
    self.accumulate("put", key, |batch, k| batch.set(k, value))
  }

  pub fn delete(&mut self, key: &Key) -> Result<()> {
    self.accumulate("delete", key, |batch, k| batch.delete(k))
  }

  pub fn len(&self) -> usize {
    self.inner.as_ref().map_or(0, |b| b.len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_aborted(&self) -> bool {
    self.inner.is_none()
  }

  pub fn commit(mut self) -> Result<()> {
    let inner = self.inner.take().ok_or(Errors::BatchAborted)?;
    let durability = if self.options.sync_writes {
      Durability::Sync
    } else {
      Durability::NoSync
    };
    inner
      .commit(durability)
      .map_err(|e| Errors::during("batch commit", e))
  }

  fn accumulate<F>(&mut self, op: &'static str, key: &Key, f: F) -> Result<()>
  where
    F: FnOnce(&mut dyn EngineBatch, Bytes) -> Result<()>,
  {
    let batch = self.inner.as_mut().ok_or(Errors::BatchAborted)?;
    let res = if batch.len() >= self.options.max_batch_num {
      Err(Errors::ExceedMaxBatchNum)
    } else {
      f(batch.as_mut(), Bytes::copy_from_slice(key.as_bytes()))
    };
    if let Err(e) = res {
      self.inner = None;
      return Err(Errors::BatchOp {
        op,
        key: key.to_string(),
        reason: Box::new(e),
      });
    }
    Ok(())
  }
}
