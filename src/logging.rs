use std::{fmt, sync::Arc};

use log::{Level, Log, Metadata, Record};

pub const DEFAULT_LOG_TARGET: &str = "flash_ds";

/// Log sink handed to the datastore and its engine at construction.
///
/// The default forwards every record to the process-wide `log` facade, so
/// installing `env_logger` (or any other backend) is enough to see output.
#[derive(Clone)]
pub struct Logger {
  sink: Arc<dyn Log>,
  target: &'static str,
}

struct GlobalSink;

impl Log for GlobalSink {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level() && log::logger().enabled(metadata)
  }

  fn log(&self, record: &Record) {
    log::logger().log(record)
  }

  fn flush(&self) {
    log::logger().flush()
  }
}

impl Logger {
  pub fn new(sink: Arc<dyn Log>) -> Self {
    Self {
      sink,
      target: DEFAULT_LOG_TARGET,
    }
  }

  pub fn with_target(mut self, target: &'static str) -> Self {
    self.target = target;
    self
  }

  pub fn target(&self) -> &'static str {
    self.target
  }

  pub fn log(&self, level: Level, args: fmt::Arguments) {
    let metadata = Metadata::builder().level(level).target(self.target).build();
    if !self.sink.enabled(&metadata) {
      return;
    }
    self.sink.log(
      &Record::builder()
        .metadata(metadata)
        .args(args)
        .module_path_static(Some(module_path!()))
        .build(),
    );
  }

  pub fn error(&self, args: fmt::Arguments) {
    self.log(Level::Error, args)
  }

  pub fn warn(&self, args: fmt::Arguments) {
    self.log(Level::Warn, args)
  }

  pub fn info(&self, args: fmt::Arguments) {
    self.log(Level::Info, args)
  }

  pub fn debug(&self, args: fmt::Arguments) {
    self.log(Level::Debug, args)
  }

  pub fn trace(&self, args: fmt::Arguments) {
    self.log(Level::Trace, args)
  }
}

impl Default for Logger {
  fn default() -> Self {
    Self::new(Arc::new(GlobalSink))
  }
}

impl fmt::Debug for Logger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Logger").field("target", &self.target).finish()
  }
}
