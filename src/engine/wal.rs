use std::{
  fs,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::{decode_length_delimiter, encode_length_delimiter, encoding};

use crate::{
  errors::{Errors, Result},
  fio::{file_io::FileIO, new_io_manager, IOManager},
  logging::Logger,
  option::IOManagerType,
};

use super::{memtable::WriteOp, Durability};

pub const WAL_FILE_NAME: &str = "flash-ds.wal";

const CRC_SIZE: usize = 4;
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// One committed write: a single put/delete, a whole batch, or an empty
/// durability marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
  pub seq: u64,
  pub ops: Vec<WriteOp>,
}

impl WalRecord {
  /// Frame layout:
  ///
  /// | crc (4, LE) | payload len (varint) | seq (varint) | op count (varint) | ops... |
  ///
  /// Each op is `type | key len | key` followed by `value len | value` for
  /// puts. The crc covers everything after itself.
  pub fn encode(&self) -> Vec<u8> {
    let mut payload = BytesMut::new();
    encoding::encode_varint(self.seq, &mut payload);
    encoding::encode_varint(self.ops.len() as u64, &mut payload);
    for op in &self.ops {
      match op {
        WriteOp::Put(key, value) => {
          payload.put_u8(OP_PUT);
          encoding::encode_varint(key.len() as u64, &mut payload);
          payload.extend_from_slice(key);
          encoding::encode_varint(value.len() as u64, &mut payload);
          payload.extend_from_slice(value);
        }
        WriteOp::Delete(key) => {
          payload.put_u8(OP_DELETE);
          encoding::encode_varint(key.len() as u64, &mut payload);
          payload.extend_from_slice(key);
        }
      }
    }

    let mut body = BytesMut::with_capacity(payload.len() + 10);
    // BytesMut grows on demand, so encoding the delimiter cannot run out of room.
    let _ = encode_length_delimiter(payload.len(), &mut body);
    body.extend_from_slice(&payload);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(CRC_SIZE + body.len());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&body);
    frame
  }
}

/// Decodes the frame at the start of `buf`, returning it with its encoded size.
pub fn decode_frame(buf: &[u8]) -> Result<(WalRecord, usize)> {
  if buf.len() < CRC_SIZE {
    return Err(Errors::ReadDataFileEOF);
  }
  let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
  let mut body = &buf[CRC_SIZE..];
  let payload_len = decode_length_delimiter(&mut body).map_err(|_| Errors::ReadDataFileEOF)?;
  let header_len = buf.len() - CRC_SIZE - body.len();
  if body.len() < payload_len {
    return Err(Errors::ReadDataFileEOF);
  }
  let frame_len = CRC_SIZE + header_len + payload_len;

  let mut hasher = crc32fast::Hasher::new();
  hasher.update(&buf[CRC_SIZE..frame_len]);
  if hasher.finalize() != crc {
    return Err(Errors::InvalidWalFrameCrc);
  }

  let mut payload = &body[..payload_len];
  let record = decode_payload(&mut payload).ok_or(Errors::InvalidWalFrameCrc)?;
  Ok((record, frame_len))
}

fn decode_payload(buf: &mut &[u8]) -> Option<WalRecord> {
  let seq = encoding::decode_varint(buf).ok()?;
  let count = encoding::decode_varint(buf).ok()? as usize;
  let mut ops = Vec::with_capacity(count.min(1024));
  for _ in 0..count {
    if !buf.has_remaining() {
      return None;
    }
    let op_type = buf.get_u8();
    let key = take_bytes(buf)?;
    match op_type {
      OP_PUT => ops.push(WriteOp::Put(key, take_bytes(buf)?)),
      OP_DELETE => ops.push(WriteOp::Delete(key)),
      _ => return None,
    }
  }
  Some(WalRecord { seq, ops })
}

fn take_bytes(buf: &mut &[u8]) -> Option<Bytes> {
  let len = encoding::decode_varint(buf).ok()? as usize;
  if buf.remaining() < len {
    return None;
  }
  Some(buf.copy_to_bytes(len))
}

pub struct Replay {
  pub records: Vec<WalRecord>,
  /// Bytes dropped from the end of the log because they did not decode.
  pub truncated: u64,
}

/// Append-only log of committed writes.
pub struct Wal {
  path: PathBuf,
  io: Box<dyn IOManager>,
  size: AtomicU64,
  logger: Logger,
}

impl Wal {
  /// Opens the log in `dir`, returning every intact record. A torn or
  /// corrupt tail is cut off so new frames are appended after the last good
  /// one.
  pub fn open<P>(dir: P, io_type: IOManagerType, logger: &Logger) -> Result<(Wal, Replay)>
  where
    P: AsRef<Path>,
  {
    let path = dir.as_ref().join(WAL_FILE_NAME);
    let replay = {
      let reader = new_io_manager(&path, io_type)?;
      read_records(reader.as_ref())?
    };

    let io = FileIO::new(&path)?;
    let wal = Wal::with_io(path, Box::new(io), logger);
    if replay.truncated > 0 {
      logger.warn(format_args!(
        "write-ahead log {} has a corrupt tail of {} bytes; truncating",
        wal.path.display(),
        replay.truncated
      ));
      let size = wal.size() - replay.truncated;
      wal.io.truncate(size)?;
      wal.size.store(size, Ordering::SeqCst);
    }
    Ok((wal, replay))
  }

  pub(crate) fn with_io(path: PathBuf, io: Box<dyn IOManager>, logger: &Logger) -> Wal {
    let size = io.size();
    Wal {
      path,
      io,
      size: AtomicU64::new(size),
      logger: logger.clone(),
    }
  }

  /// Appends one frame. On failure the file is cut back to the last good
  /// frame, so a failed write never hides later ones from replay.
  pub fn append(&self, record: &WalRecord, durability: Durability) -> Result<()> {
    let frame = record.encode();
    let base = self.size();
    let res = self.io.write(&frame).and_then(|written| {
      if durability == Durability::Sync {
        self.io.sync()?;
      }
      Ok(written)
    });
    match res {
      Ok(written) => {
        self.size.store(base + written as u64, Ordering::SeqCst);
        Ok(())
      }
      Err(e) => {
        if let Err(te) = self.io.truncate(base) {
          self.logger.error(format_args!(
            "failed to cut {} back to {} bytes after a failed append: {}",
            self.path.display(),
            base,
            te
          ));
        }
        Err(e)
      }
    }
  }

  /// Replaces the whole log with `record`. The new log is written next to
  /// the old one and renamed over it.
  pub fn rewrite(self, record: &WalRecord) -> Result<Wal> {
    let tmp_path = self.path.with_extension("wal.tmp");
    let frame = record.encode();
    {
      let _ = fs::remove_file(&tmp_path);
      let tmp = FileIO::new(&tmp_path)?;
      tmp.write(&frame)?;
      tmp.sync()?;
    }
    fs::rename(&tmp_path, &self.path).map_err(|e| Errors::Io {
      op: "rewrite wal",
      reason: e.to_string(),
    })?;

    let Wal { path, logger, .. } = self;
    let io = FileIO::new(&path)?;
    Ok(Wal::with_io(path, Box::new(io), &logger))
  }

  pub fn sync(&self) -> Result<()> {
    self.io.sync()
  }

  pub fn size(&self) -> u64 {
    self.size.load(Ordering::SeqCst)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

fn read_records(reader: &dyn IOManager) -> Result<Replay> {
  let total = reader.size();
  let mut buf = vec![0u8; total as usize];
  if total > 0 {
    reader.read(&mut buf, 0)?;
  }

  let mut records = Vec::new();
  let mut offset = 0usize;
  while offset < buf.len() {
    match decode_frame(&buf[offset..]) {
      Ok((record, size)) => {
        offset += size;
        if !record.ops.is_empty() {
          records.push(record);
        }
      }
      Err(Errors::ReadDataFileEOF) | Err(Errors::InvalidWalFrameCrc) => break,
      Err(e) => return Err(e),
    }
  }

  Ok(Replay {
    records,
    truncated: (buf.len() - offset) as u64,
  })
}
