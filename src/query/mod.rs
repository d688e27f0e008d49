//! Query descriptors and everything needed to evaluate them.
//!
//! A [`Query`] names a key prefix plus optional filters, orders, offset and
//! limit. The datastore turns it into a bounded engine cursor (see
//! [`bounds`] and [`planner`]) and streams matching [`Entry`] values back
//! through [`Results`].

pub mod bounds;
pub mod filter;
pub mod naive;
pub mod order;
pub mod planner;
pub mod results;

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::Result;

pub use self::{
  filter::{Filter, FilterKeyCompare, FilterKeyPrefix, FilterValueCompare, Op},
  order::{EntryOrder, Order, OrderByFunction, OrderByValue, OrderByValueDescending},
  results::Results,
};

/// One query hit. `value` and `size` are only populated when the query asks
/// for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
  pub key: String,
  pub value: Option<Bytes>,
  pub size: Option<usize>,
}

impl Entry {
  pub fn new<K: Into<String>>(key: K, value: Bytes) -> Self {
    let size = value.len();
    Self {
      key: key.into(),
      value: Some(value),
      size: Some(size),
    }
  }
}

/// A single streamed query event: an entry, or the error that ended the stream.
pub type QueryResult = Result<Entry>;

#[derive(Debug, Clone, Default)]
pub struct Query {
  /// Slash-delimited namespace; only keys below it are returned.
  pub prefix: String,
  /// Maximum number of entries to return; 0 means unbounded.
  pub limit: usize,
  /// Number of matching entries to skip before returning any.
  pub offset: usize,
  pub orders: Vec<Order>,
  pub filters: Vec<Arc<dyn Filter>>,
  /// Do not materialize values.
  pub keys_only: bool,
  /// Populate `Entry::size` even when values are not returned.
  pub returns_sizes: bool,
}

impl Query {
  pub fn new<S: Into<String>>(prefix: S) -> Self {
    Self {
      prefix: prefix.into(),
      ..Default::default()
    }
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_offset(mut self, offset: usize) -> Self {
    self.offset = offset;
    self
  }

  pub fn with_order(mut self, order: Order) -> Self {
    self.orders.push(order);
    self
  }

  pub fn with_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
    self.filters.push(Arc::new(filter));
    self
  }

  pub fn with_keys_only(mut self, keys_only: bool) -> Self {
    self.keys_only = keys_only;
    self
  }

  pub fn with_returns_sizes(mut self, returns_sizes: bool) -> Self {
    self.returns_sizes = returns_sizes;
    self
  }

  /// True when every filter accepts `entry`.
  pub fn matches(&self, entry: &Entry) -> bool {
    self.filters.iter().all(|f| f.filter(entry))
  }
}
