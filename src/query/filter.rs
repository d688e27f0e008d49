use std::fmt;

use bytes::Bytes;

use super::Entry;

/// A predicate over entries. Filters must be pure: the datastore may call
/// them more than once per entry and from a background task.
pub trait Filter: Send + Sync + fmt::Debug {
  fn filter(&self, entry: &Entry) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Eq,
  Ne,
  Gt,
  Ge,
  Lt,
  Le,
}

impl Op {
  fn holds<T: Ord + ?Sized>(self, a: &T, b: &T) -> bool {
    match self {
      Op::Eq => a == b,
      Op::Ne => a != b,
      Op::Gt => a > b,
      Op::Ge => a >= b,
      Op::Lt => a < b,
      Op::Le => a <= b,
    }
  }
}

/// Compares each entry's key against `key` with `op`.
#[derive(Debug, Clone)]
pub struct FilterKeyCompare {
  pub op: Op,
  pub key: String,
}

impl Filter for FilterKeyCompare {
  fn filter(&self, entry: &Entry) -> bool {
    self.op.holds(entry.key.as_str(), self.key.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct FilterKeyPrefix {
  pub prefix: String,
}

impl Filter for FilterKeyPrefix {
  fn filter(&self, entry: &Entry) -> bool {
    entry.key.starts_with(&self.prefix)
  }
}

/// Compares each entry's value against `value`. Entries without a value
/// (keys-only queries) never match.
#[derive(Debug, Clone)]
pub struct FilterValueCompare {
  pub op: Op,
  pub value: Bytes,
}

impl Filter for FilterValueCompare {
  fn filter(&self, entry: &Entry) -> bool {
    match &entry.value {
      Some(v) => self.op.holds(v.as_ref(), self.value.as_ref()),
      None => false,
    }
  }
}
