use std::sync::Arc;

use bytes::Bytes;
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
  batch::Batch,
  engine::{Durability, Engine, Metrics, SkipListEngine},
  errors::{Errors, Result},
  key::Key,
  logging::Logger,
  option::{Options, WriteBatchOptions},
  query::{
    bounds::query_range,
    planner::{plan, Plan},
    Query, Results,
  },
  shutdown::{Lifecycle, ShutdownCoordinator},
  streamer::{ResultSender, ResultStreamer},
};

/// Hierarchical key/value datastore on top of a sorted engine.
///
/// Single-key operations go straight to the engine. Queries are served by a
/// producer task per query that streams entries back through [`Results`].
/// [`Datastore::close`] waits for every producer before closing the engine.
pub struct Datastore {
  engine: Arc<dyn Engine>,
  options: Options,
  shutdown: ShutdownCoordinator,
  logger: Logger,
}

impl Datastore {
  /// Opens a datastore backed by the bundled skip list engine.
  pub fn open(options: Options) -> Result<Self> {
    let engine = SkipListEngine::open(&options)?;
    Ok(Self::with_engine(Arc::new(engine), options))
  }

  /// Wraps an already opened engine. The datastore takes over closing it.
  pub fn with_engine(engine: Arc<dyn Engine>, options: Options) -> Self {
    let logger = options.logger.clone();
    Self {
      engine,
      options,
      shutdown: ShutdownCoordinator::new(),
      logger,
    }
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.shutdown.lifecycle()
  }

  fn check_open(&self) -> Result<()> {
    if self.shutdown.lifecycle() == Lifecycle::Closed {
      return Err(Errors::DatastoreClosed);
    }
    Ok(())
  }

  pub fn get(&self, key: &Key) -> Result<Bytes> {
    self.check_open()?;
    match self.engine.get(key.as_bytes()) {
      Ok(Some(value)) => Ok(value),
      Ok(None) => Err(Errors::KeyNotFound),
      Err(e) => Err(Errors::during("get", e)),
    }
  }

  pub fn has(&self, key: &Key) -> Result<bool> {
    match self.get(key) {
      Ok(_) => Ok(true),
      Err(Errors::KeyNotFound) => Ok(false),
      Err(e) => Err(e),
    }
  }

  pub fn get_size(&self, key: &Key) -> Result<usize> {
    self.get(key).map(|value| value.len())
  }

  pub fn put<V: Into<Bytes>>(&self, key: &Key, value: V) -> Result<()> {
    self.check_open()?;
    self
      .engine
      .set(
        Bytes::copy_from_slice(key.as_bytes()),
        value.into(),
        self.options.write_durability(),
      )
      .map_err(|e| Errors::during("put", e))
  }

  pub fn delete(&self, key: &Key) -> Result<()> {
    self.check_open()?;
    self
      .engine
      .delete(
        Bytes::copy_from_slice(key.as_bytes()),
        self.options.write_durability(),
      )
      .map_err(|e| Errors::during("delete", e))
  }

  /// Makes every write so far durable. A no-op without a write-ahead log.
  pub fn sync(&self) -> Result<()> {
    self.check_open()?;
    if self.engine.wal_disabled() {
      return Ok(());
    }
    self
      .engine
      .log_data(Durability::Sync)
      .map_err(|e| Errors::during("sync", e))
  }

  pub fn disk_usage(&self) -> u64 {
    let metrics = self.engine.metrics();
    self.logger.debug(format_args!("engine metrics: {}", metrics));
    metrics.disk_space_usage
  }

  pub fn metrics(&self) -> Metrics {
    self.engine.metrics()
  }

  pub fn batch(&self) -> Result<Batch> {
    self.batch_with_options(WriteBatchOptions {
      sync_writes: self.options.sync_writes,
      ..Default::default()
    })
  }

  pub fn batch_with_options(&self, options: WriteBatchOptions) -> Result<Batch> {
    self.check_open()?;
    Ok(Batch::new(self.engine.new_batch(), options))
  }

  /// Starts a query. Entries are produced on the current tokio runtime, so
  /// this must be called from within one.
  pub fn query(&self, query: Query) -> Result<Results> {
    let handle = Handle::try_current().map_err(|_| Errors::NoRuntime)?;

    let plan = match plan(&query.orders) {
      Ok(plan) => plan,
      Err(e) => {
        self.logger.warn(format_args!("rejected query on {}: {}", query.prefix, e));
        return Err(e);
      }
    };

    let token = self.shutdown.register()?;
    let cursor = self
      .engine
      .new_cursor(query_range(&query.prefix).into())
      .map_err(|e| Errors::during("new cursor", e))?;

    let mut streamer = match plan {
      Plan::Native(direction) => ResultStreamer::native(cursor, direction, &query),
      Plan::Fallback(base) => {
        self.logger.debug(format_args!(
          "query on {} sorts in memory, scanning {:?}",
          query.prefix, base
        ));
        ResultStreamer::naive(cursor, base, &query)
      }
    };
    if !streamer.position() && streamer.error().is_none() {
      streamer.close();
      return Ok(Results::with_entries(query, Vec::new()));
    }

    let (tx, rx) = mpsc::channel(self.options.result_buffer_size.max(1));
    let cancel = CancellationToken::new();
    let sender = ResultSender::new(tx, self.shutdown.closing_signal(), cancel.clone());
    let logger = self.logger.clone();
    let prefix = query.prefix.clone();
    handle.spawn(async move {
      let _token = token;
      let end = streamer.run(sender).await;
      logger.trace(format_args!("query on {} finished: {:?}", prefix, end));
    });

    Ok(Results::with_channel(query, rx, cancel))
  }

  /// Closes the datastore. Waits for every running query producer to stop,
  /// then flushes and closes the engine. Safe to call more than once.
  pub async fn close(&self) -> Result<()> {
    let engine = self.engine.clone();
    let logger = self.logger.clone();
    let outstanding = self.shutdown.outstanding();
    self
      .shutdown
      .close(move || {
        logger.info(format_args!(
          "closing datastore after {} running queries drained",
          outstanding
        ));
        engine.flush().map_err(|e| Errors::during("flush", e))?;
        engine.close().map_err(|e| Errors::during("close", e))
      })
      .await
  }
}
