//! In-memory query evaluation over fully materialized entries, for orders
//! the engine cannot produce by itself.

use super::{order::compare_all, Entry, Filter, Order, Query};
use std::sync::Arc;

pub fn naive_filter(entries: Vec<Entry>, filters: &[Arc<dyn Filter>]) -> Vec<Entry> {
  if filters.is_empty() {
    return entries;
  }
  entries
    .into_iter()
    .filter(|e| filters.iter().all(|f| f.filter(e)))
    .collect()
}

/// Stable: entries comparing equal keep their scan order.
pub fn naive_order(entries: &mut [Entry], orders: &[Order]) {
  if orders.is_empty() {
    return;
  }
  entries.sort_by(|a, b| compare_all(orders, a, b));
}

pub fn naive_offset(mut entries: Vec<Entry>, offset: usize) -> Vec<Entry> {
  if offset >= entries.len() {
    return Vec::new();
  }
  entries.drain(..offset);
  entries
}

pub fn naive_limit(mut entries: Vec<Entry>, limit: usize) -> Vec<Entry> {
  if limit > 0 {
    entries.truncate(limit);
  }
  entries
}

/// Filters, sorts, skips and limits, in that order.
pub fn naive_query_apply(query: &Query, entries: Vec<Entry>) -> Vec<Entry> {
  let mut entries = naive_filter(entries, &query.filters);
  naive_order(&mut entries, &query.orders);
  let entries = naive_offset(entries, query.offset);
  naive_limit(entries, query.limit)
}
