//! Flash-DS: a hierarchical key/value datastore over a sorted storage engine.
//!
//! Keys are slash-delimited paths. Besides single-key reads and writes the
//! datastore answers prefix queries with filters, orders, offset and limit,
//! streaming results from a background producer that can be cancelled at any
//! time. Closing the datastore waits for every running query to finish before
//! the engine goes away.
//!
//! # Features
//!
//! * Lexicographic prefix scans pushed down to engine cursor bounds
//! * Native ascending/descending iteration, in-memory fallback for other orders
//! * Bounded, cancellable result streams that never leak a cursor
//! * Atomic write batches
//! * Write-ahead log with crash-tolerant replay
//!
//! # Basic Usage
//!
//! ```
//! use flash_ds::{db::Datastore, key::Key, option::Options, query::Query};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let opts = Options {
//!   disable_wal: true,
//!   ..Default::default()
//! };
//! let ds = Datastore::open(opts).expect("failed to open datastore");
//!
//! ds.put(&Key::new("/fruit/apple"), "red").expect("failed to put");
//! ds.put(&Key::new("/fruit/banana"), "yellow").expect("failed to put");
//!
//! let results = ds.query(Query::new("/fruit")).expect("failed to query");
//! let entries = results.rest().await.expect("query failed");
//! assert_eq!(entries.len(), 2);
//! assert_eq!(entries[0].key, "/fruit/apple");
//!
//! ds.close().await.expect("failed to close");
//! # }
//! ```

mod fio;
mod shutdown;
mod streamer;

pub mod batch;
pub mod db;
#[cfg(test)]
mod db_test;
pub mod engine;
pub mod errors;
pub mod key;
pub mod logging;
pub mod option;
pub mod query;
pub mod util;

pub use self::{
  db::Datastore,
  errors::{Errors, Result},
  key::Key,
  query::{Entry, Query, QueryResult, Results},
  shutdown::Lifecycle,
};
