use std::path::Path;

/// Total size in bytes of everything under `dir_path`; 0 if it cannot be read.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  fs_extra::dir::get_size(dir_path).unwrap_or(0)
}
