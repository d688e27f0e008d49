pub mod file_io;
pub mod mmap;

use std::path::Path;

use crate::{errors::Result, option::IOManagerType};

use self::{file_io::FileIO, mmap::MMapIO};

/// Abstract I/O management interface for the write-ahead log file.
pub trait IOManager: Sync + Send {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

  fn write(&self, buf: &[u8]) -> Result<usize>;

  fn sync(&self) -> Result<()>;

  /// Cuts the file down to `len` bytes.
  fn truncate(&self, len: u64) -> Result<()>;

  fn size(&self) -> u64;
}

pub fn new_io_manager<P>(file_name: P, io_type: IOManagerType) -> Result<Box<dyn IOManager>>
where
  P: AsRef<Path>,
{
  Ok(match io_type {
    IOManagerType::StandardFileIO => Box::new(FileIO::new(file_name)?),
    IOManagerType::MemoryMap => Box::new(MMapIO::new(file_name)?),
  })
}
