use bytes::Bytes;
use rand::{distr::Alphanumeric, Rng};

use crate::key::Key;

pub fn get_test_key(i: usize) -> Key {
  Key::new(format!("/flash-ds/key/{:09}", i))
}

pub fn get_test_value(i: usize) -> Bytes {
  let suffix: String = rand::rng()
    .sample_iter(&Alphanumeric)
    .take(16)
    .map(char::from)
    .collect();
  Bytes::from(format!("flash-ds-value-{:09}-{}", i, suffix))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_test_key_value() {
    for i in 0..10 {
      assert!(get_test_key(i).as_str().starts_with("/flash-ds/key/"));
      assert!(!get_test_value(i).is_empty());
    }
    assert!(get_test_key(9) < get_test_key(10));
  }
}
