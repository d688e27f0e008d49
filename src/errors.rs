use std::result;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key is not found in datastore")]
  KeyNotFound,

  #[error("{op} failed: {reason}")]
  Io { op: &'static str, reason: String },

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("invalid crc value, wal frame maybe corrupted")]
  InvalidWalFrameCrc,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("the engine is closed")]
  EngineClosed,

  #[error("the datastore is closed")]
  DatastoreClosed,

  #[error("exceed the max batch num")]
  ExceedMaxBatchNum,

  #[error("batch was aborted by an earlier failure")]
  BatchAborted,

  #[error("error during {op} within batch for key {key}: {reason}")]
  BatchOp {
    op: &'static str,
    key: String,
    reason: Box<Errors>,
  },

  #[error("stored key is not valid utf-8: {0}")]
  KeyNotUtf8(String),

  #[error("incompatible orders passed: {0}")]
  IncompatibleOrders(String),

  #[error("close requested")]
  CloseRequested,

  #[error("query must be issued from within a tokio runtime")]
  NoRuntime,
}

impl Errors {
  /// Wraps an engine failure with the name of the datastore operation.
  pub(crate) fn during(op: &'static str, err: Errors) -> Errors {
    match err {
      Errors::KeyNotFound | Errors::EngineClosed | Errors::DatastoreClosed => err,
      other => Errors::Io {
        op,
        reason: other.to_string(),
      },
    }
  }
}

pub type Result<T> = result::Result<T, Errors>;
