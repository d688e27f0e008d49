use bytes::Bytes;

use crate::{engine::CursorOptions, key::Key};

/// The `[lower, upper)` byte range holding every key under a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
  pub lower: Bytes,
  /// `None` when no finite exclusive bound exists.
  pub upper: Option<Bytes>,
}

impl KeyRange {
  pub fn contains(&self, key: &[u8]) -> bool {
    key >= self.lower.as_ref() && self.upper.as_ref().map_or(true, |u| key < u.as_ref())
  }
}

impl From<KeyRange> for CursorOptions {
  fn from(range: KeyRange) -> Self {
    CursorOptions {
      lower_bound: if range.lower.is_empty() {
        None
      } else {
        Some(range.lower)
      },
      upper_bound: range.upper,
    }
  }
}

/// Cleans a query prefix into key form. Anything but the root gets a
/// trailing separator so `/ab` does not match `/abc`.
pub fn normalize_prefix(prefix: &str) -> String {
  let key = Key::new(prefix);
  if key.is_root() {
    return key.into_string();
  }
  let mut prefix = key.into_string();
  prefix.push('/');
  prefix
}

/// Smallest byte string greater than every string starting with `prefix`:
/// bump the last byte that is not 0xff and drop what follows it.
/// `None` for an empty or all-0xff prefix.
pub fn upper_bound(prefix: &[u8]) -> Option<Bytes> {
  let idx = prefix.iter().rposition(|&b| b != 0xff)?;
  let mut upper = prefix[..=idx].to_vec();
  upper[idx] += 1;
  Some(Bytes::from(upper))
}

pub fn prefix_range(prefix: &[u8]) -> KeyRange {
  KeyRange {
    lower: Bytes::copy_from_slice(prefix),
    upper: upper_bound(prefix),
  }
}

/// Range scanned for a query's (raw, un-normalized) prefix.
pub fn query_range(prefix: &str) -> KeyRange {
  prefix_range(normalize_prefix(prefix).as_bytes())
}
