use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
  db::Datastore,
  engine::{Cursor, CursorOptions, Durability, Engine, EngineBatch, Metrics, SkipListEngine},
  errors::{Errors, Result},
  key::Key,
  logging::{tests::CaptureSink, Logger},
  option::{Options, WriteBatchOptions},
  query::{FilterKeyPrefix, FilterValueCompare, Op, Order, OrderByValue, Query, QueryResult},
  shutdown::Lifecycle,
  util::rand_kv::{get_test_key, get_test_value},
};

fn mem_options() -> Options {
  Options {
    disable_wal: true,
    ..Default::default()
  }
}

fn disk_options(dir: &std::path::Path) -> Options {
  Options {
    dir_path: dir.to_path_buf(),
    ..Default::default()
  }
}

fn open_with(pairs: &[(&str, &str)]) -> Datastore {
  let ds = Datastore::open(mem_options()).unwrap();
  for (k, v) in pairs {
    ds.put(&Key::new(k), Bytes::copy_from_slice(v.as_bytes()))
      .unwrap();
  }
  ds
}

fn example_dataset() -> Datastore {
  open_with(&[("/a/1", "x"), ("/a/2", "y"), ("/b/1", "z")])
}

async fn run(ds: &Datastore, query: Query) -> Vec<(String, String)> {
  ds.query(query)
    .unwrap()
    .rest()
    .await
    .unwrap()
    .into_iter()
    .map(|e| {
      let value = e
        .value
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_default();
      (e.key, value)
    })
    .collect()
}

async fn run_keys(ds: &Datastore, query: Query) -> Vec<String> {
  run(ds, query).await.into_iter().map(|(k, _)| k).collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
  items
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Delegates to a [`SkipListEngine`] and records when cursors and the engine
/// itself are closed.
struct TrackingEngine {
  inner: SkipListEngine,
  events: Arc<Mutex<Vec<&'static str>>>,
}

impl TrackingEngine {
  fn new() -> Self {
    Self {
      inner: SkipListEngine::open(&mem_options()).unwrap(),
      events: Arc::default(),
    }
  }
}

struct TrackingCursor {
  inner: Box<dyn Cursor>,
  events: Arc<Mutex<Vec<&'static str>>>,
  closed: bool,
}

impl Cursor for TrackingCursor {
  fn seek_first(&mut self) -> bool {
    self.inner.seek_first()
  }

  fn seek_last(&mut self) -> bool {
    self.inner.seek_last()
  }

  fn next(&mut self) -> bool {
    self.inner.next()
  }

  fn prev(&mut self) -> bool {
    self.inner.prev()
  }

  fn valid(&self) -> bool {
    self.inner.valid()
  }

  fn key(&self) -> &[u8] {
    self.inner.key()
  }

  fn value(&self) -> Result<&[u8]> {
    self.inner.value()
  }

  fn error(&self) -> Option<Errors> {
    self.inner.error()
  }

  fn close(&mut self) -> Result<()> {
    assert!(!self.closed, "cursor closed twice");
    self.closed = true;
    self.events.lock().push("cursor closed");
    self.inner.close()
  }
}

impl Engine for TrackingEngine {
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
    self.inner.get(key)
  }

  fn set(&self, key: Bytes, value: Bytes, durability: Durability) -> Result<()> {
    self.inner.set(key, value, durability)
  }

  fn delete(&self, key: Bytes, durability: Durability) -> Result<()> {
    self.inner.delete(key, durability)
  }

  fn log_data(&self, durability: Durability) -> Result<()> {
    self.inner.log_data(durability)
  }

  fn new_cursor(&self, options: CursorOptions) -> Result<Box<dyn Cursor>> {
    self.events.lock().push("cursor opened");
    Ok(Box::new(TrackingCursor {
      inner: self.inner.new_cursor(options)?,
      events: self.events.clone(),
      closed: false,
    }))
  }

  fn new_batch(&self) -> Box<dyn EngineBatch> {
    self.inner.new_batch()
  }

  fn metrics(&self) -> Metrics {
    self.inner.metrics()
  }

  fn wal_disabled(&self) -> bool {
    self.inner.wal_disabled()
  }

  fn flush(&self) -> Result<()> {
    self.inner.flush()
  }

  fn close(&self) -> Result<()> {
    self.events.lock().push("engine closed");
    self.inner.close()
  }
}

/// Serves a fixed key list and fails after `fail_at` keys.
struct FailingCursor {
  keys: Vec<&'static str>,
  pos: usize,
  fail_at: usize,
}

impl FailingCursor {
  fn failed(&self) -> bool {
    self.pos >= self.fail_at
  }
}

impl Cursor for FailingCursor {
  fn seek_first(&mut self) -> bool {
    self.pos = 0;
    self.valid()
  }

  fn seek_last(&mut self) -> bool {
    self.pos = self.keys.len().saturating_sub(1);
    self.valid()
  }

  fn next(&mut self) -> bool {
    self.pos += 1;
    self.valid()
  }

  fn prev(&mut self) -> bool {
    self.pos = self.keys.len();
    false
  }

  fn valid(&self) -> bool {
    !self.failed() && self.pos < self.keys.len()
  }

  fn key(&self) -> &[u8] {
    self.keys[self.pos].as_bytes()
  }

  fn value(&self) -> Result<&[u8]> {
    Ok(b"v")
  }

  fn error(&self) -> Option<Errors> {
    if self.failed() {
      Some(Errors::Io {
        op: "cursor next",
        reason: "block checksum mismatch".to_string(),
      })
    } else {
      None
    }
  }

  fn close(&mut self) -> Result<()> {
    Ok(())
  }
}

struct FailingEngine {
  inner: SkipListEngine,
  fail_at: usize,
}

impl Engine for FailingEngine {
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
    self.inner.get(key)
  }

  fn set(&self, key: Bytes, value: Bytes, durability: Durability) -> Result<()> {
    self.inner.set(key, value, durability)
  }

  fn delete(&self, key: Bytes, durability: Durability) -> Result<()> {
    self.inner.delete(key, durability)
  }

  fn log_data(&self, durability: Durability) -> Result<()> {
    self.inner.log_data(durability)
  }

  fn new_cursor(&self, _options: CursorOptions) -> Result<Box<dyn Cursor>> {
    Ok(Box::new(FailingCursor {
      keys: vec!["/a/1", "/a/2", "/a/3", "/a/4"],
      pos: 0,
      fail_at: self.fail_at,
    }))
  }

  fn new_batch(&self) -> Box<dyn EngineBatch> {
    self.inner.new_batch()
  }

  fn metrics(&self) -> Metrics {
    self.inner.metrics()
  }

  fn wal_disabled(&self) -> bool {
    true
  }

  fn flush(&self) -> Result<()> {
    Ok(())
  }

  fn close(&self) -> Result<()> {
    self.inner.close()
  }
}

fn failing_datastore(fail_at: usize) -> Datastore {
  let engine = FailingEngine {
    inner: SkipListEngine::open(&mem_options()).unwrap(),
    fail_at,
  };
  Datastore::with_engine(Arc::new(engine), mem_options())
}

#[test]
fn test_datastore_get_put_delete() {
  let ds = Datastore::open(mem_options()).unwrap();
  let key = Key::new("/users/alice");

  assert_eq!(ds.get(&key), Err(Errors::KeyNotFound));
  assert_eq!(ds.has(&key), Ok(false));
  assert_eq!(ds.get_size(&key), Err(Errors::KeyNotFound));

  ds.put(&key, "hello").unwrap();
  assert_eq!(ds.get(&key).unwrap(), Bytes::from("hello"));
  assert_eq!(ds.has(&key), Ok(true));
  assert_eq!(ds.get_size(&key), Ok(5));

  ds.put(&key, "").unwrap();
  assert_eq!(ds.get_size(&key), Ok(0));
  assert_eq!(ds.has(&key), Ok(true));

  ds.delete(&key).unwrap();
  assert_eq!(ds.get(&key), Err(Errors::KeyNotFound));
  // deleting an absent key is fine
  ds.delete(&key).unwrap();
}

#[tokio::test]
async fn test_query_example_dataset() {
  let ds = example_dataset();

  let asc = run(&ds, Query::new("/a")).await;
  assert_eq!(asc, pairs(&[("/a/1", "x"), ("/a/2", "y")]));

  let by_key = run(&ds, Query::new("/a").with_order(Order::ByKey)).await;
  assert_eq!(by_key, asc);

  let desc = run(&ds, Query::new("/a").with_order(Order::ByKeyDescending)).await;
  assert_eq!(desc, pairs(&[("/a/2", "y"), ("/a/1", "x")]));
}

#[tokio::test]
async fn test_query_prefix_is_a_path() {
  let ds = open_with(&[
    ("/a", "self"),
    ("/a/1", "x"),
    ("/a/1/deep", "d"),
    ("/ab/1", "sibling"),
    ("/b", "z"),
  ]);

  assert_eq!(run_keys(&ds, Query::new("/a")).await, vec!["/a/1", "/a/1/deep"]);
  assert_eq!(run_keys(&ds, Query::new("a/")).await, vec!["/a/1", "/a/1/deep"]);
  assert_eq!(run_keys(&ds, Query::new("/a/1")).await, vec!["/a/1/deep"]);
  assert_eq!(run_keys(&ds, Query::new("/").with_limit(0)).await.len(), 5);
  assert_eq!(run_keys(&ds, Query::default()).await.len(), 5);
  assert!(run_keys(&ds, Query::new("/nothing")).await.is_empty());
}

#[tokio::test]
async fn test_query_descending_reverses_ascending() {
  let ds = Datastore::open(mem_options()).unwrap();
  for i in 0..200 {
    ds.put(&get_test_key(i), get_test_value(i)).unwrap();
  }

  let asc = run_keys(&ds, Query::new("/flash-ds/key")).await;
  let mut desc = run_keys(
    &ds,
    Query::new("/flash-ds/key").with_order(Order::ByKeyDescending),
  )
  .await;
  assert_eq!(asc.len(), 200);
  desc.reverse();
  assert_eq!(asc, desc);
  assert!(asc.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_query_offset_and_limit() {
  let ds = Datastore::open(mem_options()).unwrap();
  for i in 0..10 {
    ds.put(&Key::new(format!("/n/{}", i)), i.to_string()).unwrap();
  }

  let keys = run_keys(&ds, Query::new("/n").with_offset(3).with_limit(4)).await;
  assert_eq!(keys, vec!["/n/3", "/n/4", "/n/5", "/n/6"]);

  let keys = run_keys(
    &ds,
    Query::new("/n")
      .with_order(Order::ByKeyDescending)
      .with_offset(8)
      .with_limit(5),
  )
  .await;
  assert_eq!(keys, vec!["/n/1", "/n/0"]);

  assert!(run_keys(&ds, Query::new("/n").with_offset(10)).await.is_empty());
  assert_eq!(run_keys(&ds, Query::new("/n").with_limit(0)).await.len(), 10);
}

#[tokio::test]
async fn test_query_filters_apply_before_offset() {
  let ds = Datastore::open(mem_options()).unwrap();
  for i in 0..10 {
    ds.put(&Key::new(format!("/n/{}", i)), i.to_string()).unwrap();
  }

  let query = Query::new("/n")
    .with_filter(FilterValueCompare {
      op: Op::Ge,
      value: Bytes::from("5"),
    })
    .with_offset(1)
    .with_limit(2);
  assert_eq!(run_keys(&ds, query).await, vec!["/n/6", "/n/7"]);

  let query = Query::new("/n")
    .with_filter(FilterKeyPrefix {
      prefix: "/n/9".to_string(),
    })
    .with_offset(1);
  assert!(run_keys(&ds, query).await.is_empty());
}

#[tokio::test]
async fn test_query_keys_only_and_sizes() {
  let ds = example_dataset();
  let entries = ds
    .query(Query::new("/a").with_keys_only(true).with_returns_sizes(true))
    .unwrap()
    .rest()
    .await
    .unwrap();
  assert_eq!(entries.len(), 2);
  assert!(entries.iter().all(|e| e.value.is_none()));
  assert!(entries.iter().all(|e| e.size == Some(1)));
}

#[tokio::test]
async fn test_query_fallback_orders() {
  let ds = open_with(&[("/v/a", "3"), ("/v/b", "1"), ("/v/c", "2"), ("/v/d", "1")]);

  let keys = run_keys(&ds, Query::new("/v").with_order(Order::other(OrderByValue))).await;
  assert_eq!(keys, vec!["/v/b", "/v/d", "/v/c", "/v/a"]);

  // the key order breaks ties between equal values
  let keys = run_keys(
    &ds,
    Query::new("/v")
      .with_order(Order::other(OrderByValue))
      .with_order(Order::ByKeyDescending),
  )
  .await;
  assert_eq!(keys, vec!["/v/d", "/v/b", "/v/c", "/v/a"]);

  let keys = run_keys(
    &ds,
    Query::new("/v")
      .with_order(Order::other(OrderByValue))
      .with_offset(1)
      .with_limit(2),
  )
  .await;
  assert_eq!(keys, vec!["/v/d", "/v/c"]);
}

#[tokio::test]
async fn test_query_incompatible_orders() {
  let sink = Arc::new(CaptureSink::default());
  let options = Options {
    logger: Logger::new(sink.clone()),
    ..mem_options()
  };
  let ds = Datastore::open(options).unwrap();
  ds.put(&Key::new("/a/1"), "x").unwrap();

  let res = ds.query(
    Query::new("/a")
      .with_order(Order::ByKey)
      .with_order(Order::ByKeyDescending),
  );
  assert!(matches!(res, Err(Errors::IncompatibleOrders(_))));
  assert!(sink
    .lines
    .lock()
    .iter()
    .any(|(level, _)| *level == log::Level::Warn));
  assert_eq!(ds.metrics().open_cursors, 0);
}

#[tokio::test]
async fn test_query_sees_snapshot() {
  let ds = example_dataset();
  let mut results = ds.query(Query::new("/a")).unwrap();
  ds.put(&Key::new("/a/3"), "late").unwrap();
  ds.delete(&Key::new("/a/2")).unwrap();

  let mut keys = Vec::new();
  while let Some(res) = results.next().await {
    keys.push(res.unwrap().key);
  }
  assert_eq!(keys, vec!["/a/1", "/a/2"]);
}

#[tokio::test]
async fn test_query_cursor_error_is_terminal() {
  let ds = failing_datastore(2);
  let mut results = ds.query(Query::new("/a")).unwrap();

  let mut got: Vec<QueryResult> = Vec::new();
  while let Some(res) = results.next().await {
    got.push(res);
  }
  assert_eq!(got.len(), 3);
  assert_eq!(got[0].as_ref().unwrap().key, "/a/1");
  assert_eq!(got[1].as_ref().unwrap().key, "/a/2");
  assert!(matches!(got[2], Err(Errors::Io { .. })));

  // the error counts as the end of the stream for offset too
  let res = ds
    .query(Query::new("/a").with_offset(5))
    .unwrap()
    .rest()
    .await;
  assert!(matches!(res, Err(Errors::Io { .. })));

  // failing before the first key still reports the error
  let ds = failing_datastore(0);
  let res = ds.query(Query::new("/a")).unwrap().rest().await;
  assert!(matches!(res, Err(Errors::Io { .. })));
}

#[test]
fn test_query_without_runtime() {
  let ds = example_dataset();
  let res = ds.query(Query::new("/a"));
  assert!(matches!(res, Err(Errors::NoRuntime)));
  assert_eq!(ds.metrics().open_cursors, 0);
}

#[test]
fn test_batch_semantics() {
  let ds = Datastore::open(mem_options()).unwrap();
  let key = Key::new("/k");

  let mut batch = ds.batch().unwrap();
  batch.put(&key, "a").unwrap();
  batch.delete(&key).unwrap();
  // nothing is visible before commit
  ds.put(&Key::new("/other"), "o").unwrap();
  assert_eq!(ds.has(&key), Ok(false));
  batch.commit().unwrap();
  assert_eq!(ds.has(&key), Ok(false));

  let mut batch = ds.batch().unwrap();
  batch.delete(&key).unwrap();
  batch.put(&key, "a").unwrap();
  batch.commit().unwrap();
  assert_eq!(ds.get(&key).unwrap(), Bytes::from("a"));

  let mut batch = ds.batch().unwrap();
  for i in 0..100 {
    batch.put(&get_test_key(i), get_test_value(i)).unwrap();
  }
  assert_eq!(batch.len(), 100);
  batch.commit().unwrap();
  assert_eq!(ds.metrics().live_keys, 102);
}

#[test]
fn test_batch_abort_writes_nothing() {
  let ds = Datastore::open(mem_options()).unwrap();
  let mut batch = ds
    .batch_with_options(WriteBatchOptions {
      max_batch_num: 1,
      sync_writes: false,
    })
    .unwrap();
  batch.put(&Key::new("/a"), "1").unwrap();
  let err = batch.delete(&Key::new("/b")).unwrap_err();
  assert!(matches!(err, Errors::BatchOp { op: "delete", .. }));
  assert!(err.to_string().contains("/b"));
  assert_eq!(batch.commit(), Err(Errors::BatchAborted));
  assert_eq!(ds.has(&Key::new("/a")), Ok(false));
}

#[tokio::test]
async fn test_close_waits_for_running_queries() {
  let engine = Arc::new(TrackingEngine::new());
  let events = engine.events.clone();
  let ds = Arc::new(Datastore::with_engine(
    engine.clone(),
    Options {
      result_buffer_size: 1,
      ..mem_options()
    },
  ));
  for i in 0..50 {
    ds.put(&get_test_key(i), get_test_value(i)).unwrap();
  }

  // nobody reads these, so their producers block on delivery
  let mut pending = Vec::new();
  for _ in 0..3 {
    pending.push(ds.query(Query::new("/flash-ds")).unwrap());
  }
  tokio::time::sleep(Duration::from_millis(10)).await;

  let closers: Vec<_> = (0..2)
    .map(|_| {
      let ds = ds.clone();
      tokio::spawn(async move { ds.close().await })
    })
    .collect();
  for closer in closers {
    closer.await.unwrap().unwrap();
  }
  assert_eq!(ds.lifecycle(), Lifecycle::Closed);
  ds.close().await.unwrap();

  let events = events.lock().clone();
  assert_eq!(events.iter().filter(|e| **e == "cursor opened").count(), 3);
  assert_eq!(events.iter().filter(|e| **e == "cursor closed").count(), 3);
  assert_eq!(events.iter().filter(|e| **e == "engine closed").count(), 1);
  assert_eq!(events.last(), Some(&"engine closed"));
  assert_eq!(engine.metrics().open_cursors, 0);

  for mut results in pending {
    while let Some(res) = results.next().await {
      if let Err(e) = res {
        assert_eq!(e, Errors::CloseRequested);
      }
    }
  }
}

#[tokio::test]
async fn test_early_cancel_releases_cursor() {
  let engine = Arc::new(TrackingEngine::new());
  let ds = Datastore::with_engine(
    engine.clone(),
    Options {
      result_buffer_size: 2,
      ..mem_options()
    },
  );
  for i in 0..100 {
    ds.put(&get_test_key(i), get_test_value(i)).unwrap();
  }

  let mut results = ds.query(Query::new("/flash-ds")).unwrap();
  let first = results.next().await.unwrap().unwrap();
  assert_eq!(first.key, get_test_key(0).to_string());
  results.close();
  assert!(results.next().await.is_none());

  let dropped = ds.query(Query::new("/flash-ds")).unwrap();
  drop(dropped);

  tokio::time::timeout(Duration::from_secs(5), ds.close())
    .await
    .expect("close blocked on a cancelled query")
    .unwrap();
  assert_eq!(engine.metrics().open_cursors, 0);
  let events = engine.events.lock();
  assert_eq!(events.iter().filter(|e| **e == "cursor closed").count(), 2);
}

#[tokio::test]
async fn test_empty_query_holds_no_cursor() {
  let engine = Arc::new(TrackingEngine::new());
  let ds = Datastore::with_engine(engine.clone(), mem_options());
  let results = ds.query(Query::new("/nothing/here")).unwrap();
  assert_eq!(engine.metrics().open_cursors, 0);
  assert!(results.rest().await.unwrap().is_empty());
  ds.close().await.unwrap();
}

#[tokio::test]
async fn test_operations_after_close() {
  let ds = example_dataset();
  ds.close().await.unwrap();

  let key = Key::new("/a/1");
  assert_eq!(ds.get(&key), Err(Errors::DatastoreClosed));
  assert_eq!(ds.has(&key), Err(Errors::DatastoreClosed));
  assert_eq!(ds.put(&key, "v"), Err(Errors::DatastoreClosed));
  assert_eq!(ds.delete(&key), Err(Errors::DatastoreClosed));
  assert_eq!(ds.sync(), Err(Errors::DatastoreClosed));
  assert!(matches!(ds.batch(), Err(Errors::DatastoreClosed)));
  assert!(matches!(
    ds.query(Query::new("/a")),
    Err(Errors::DatastoreClosed)
  ));
}

#[tokio::test]
async fn test_persistence_across_reopen() {
  let dir = tempfile::tempdir().unwrap();
  {
    let ds = Datastore::open(disk_options(dir.path())).unwrap();
    ds.put(&Key::new("/a/1"), "x").unwrap();
    ds.put(&Key::new("/a/2"), "y").unwrap();
    ds.delete(&Key::new("/a/1")).unwrap();
    let mut batch = ds.batch().unwrap();
    batch.put(&Key::new("/b/1"), "z").unwrap();
    batch.put(&Key::new("/b/2"), "w").unwrap();
    batch.commit().unwrap();
    ds.sync().unwrap();
    assert!(ds.disk_usage() > 0);

    // the directory is locked while open
    let second = Datastore::open(disk_options(dir.path()));
    assert!(matches!(second, Err(Errors::DatabaseIsUsing)));
    ds.close().await.unwrap();
  }

  let ds = Datastore::open(disk_options(dir.path())).unwrap();
  assert_eq!(ds.has(&Key::new("/a/1")), Ok(false));
  assert_eq!(ds.get(&Key::new("/a/2")).unwrap(), Bytes::from("y"));
  assert_eq!(
    run_keys(&ds, Query::new("/b")).await,
    vec!["/b/1", "/b/2"]
  );
  ds.close().await.unwrap();
}

#[tokio::test]
async fn test_sync_and_disk_usage_without_wal() {
  let sink = Arc::new(CaptureSink::default());
  let ds = Datastore::open(Options {
    logger: Logger::new(sink.clone()),
    ..mem_options()
  })
  .unwrap();
  ds.put(&Key::new("/a"), "1").unwrap();
  ds.sync().unwrap();
  let _ = ds.disk_usage();
  assert!(sink
    .lines
    .lock()
    .iter()
    .any(|(level, line)| *level == log::Level::Debug && line.contains("engine metrics")));
  ds.close().await.unwrap();
}
