use std::{cmp::Ordering, fmt, sync::Arc};

use super::Entry;

/// A comparator the engine cannot evaluate natively.
pub trait EntryOrder: Send + Sync + fmt::Debug {
  fn compare(&self, a: &Entry, b: &Entry) -> Ordering;
}

#[derive(Debug, Clone)]
pub enum Order {
  ByKey,
  ByKeyDescending,
  Other(Arc<dyn EntryOrder>),
}

impl Order {
  pub fn other<O: EntryOrder + 'static>(order: O) -> Self {
    Order::Other(Arc::new(order))
  }

  pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
    match self {
      Order::ByKey => a.key.as_bytes().cmp(b.key.as_bytes()),
      Order::ByKeyDescending => b.key.as_bytes().cmp(a.key.as_bytes()),
      Order::Other(order) => order.compare(a, b),
    }
  }
}

/// Compares by the orders in sequence; the first non-equal one decides.
pub fn compare_all(orders: &[Order], a: &Entry, b: &Entry) -> Ordering {
  orders
    .iter()
    .map(|o| o.compare(a, b))
    .find(|ord| *ord != Ordering::Equal)
    .unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByValue;

impl EntryOrder for OrderByValue {
  fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
    a.value.cmp(&b.value)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByValueDescending;

impl EntryOrder for OrderByValueDescending {
  fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
    b.value.cmp(&a.value)
  }
}

type CompareFn = dyn Fn(&Entry, &Entry) -> Ordering + Send + Sync;

/// Orders entries with an arbitrary closure.
#[derive(Clone)]
pub struct OrderByFunction(Arc<CompareFn>);

impl OrderByFunction {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&Entry, &Entry) -> Ordering + Send + Sync + 'static,
  {
    Self(Arc::new(f))
  }
}

impl fmt::Debug for OrderByFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("OrderByFunction")
  }
}

impl EntryOrder for OrderByFunction {
  fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
    (self.0)(a, b)
  }
}
