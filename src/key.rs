use derive_more::Display;

/// A slash-delimited, hierarchical datastore key such as `/users/42/name`.
///
/// Keys built with [`Key::new`] are cleaned: they always start with `/`,
/// never end with one (except the root), and contain no empty, `.` or `..`
/// segments. Comparisons on the stored bytes are plain lexicographic.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
pub struct Key(String);

impl Key {
  pub fn new<S: AsRef<str>>(s: S) -> Self {
    Key(clean(s.as_ref()))
  }

  /// Wraps `s` verbatim. The caller is responsible for it being clean.
  pub fn raw<S: Into<String>>(s: S) -> Self {
    Key(s.into())
  }

  pub fn root() -> Self {
    Key("/".to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn as_bytes(&self) -> &[u8] {
    self.0.as_bytes()
  }

  pub fn into_string(self) -> String {
    self.0
  }

  pub fn is_root(&self) -> bool {
    self.0 == "/"
  }

  pub fn child<S: AsRef<str>>(&self, name: S) -> Key {
    Key::new(format!("{}/{}", self.0, name.as_ref()))
  }

  pub fn parent(&self) -> Key {
    match self.0.rfind('/') {
      Some(0) | None => Key::root(),
      Some(idx) => Key(self.0[..idx].to_string()),
    }
  }

  /// Last path segment; empty for the root key.
  pub fn name(&self) -> &str {
    match self.0.rfind('/') {
      Some(idx) => &self.0[idx + 1..],
      None => &self.0,
    }
  }

  pub fn is_ancestor_of(&self, other: &Key) -> bool {
    if self.is_root() {
      return !other.is_root();
    }
    other.0.len() > self.0.len()
      && other.0.starts_with(&self.0)
      && other.0.as_bytes()[self.0.len()] == b'/'
  }
}

impl From<&str> for Key {
  fn from(s: &str) -> Self {
    Key::new(s)
  }
}

impl From<String> for Key {
  fn from(s: String) -> Self {
    Key::new(s)
  }
}

impl AsRef<[u8]> for Key {
  fn as_ref(&self) -> &[u8] {
    self.as_bytes()
  }
}

fn clean(path: &str) -> String {
  let mut segments: Vec<&str> = Vec::new();
  for seg in path.split('/') {
    match seg {
      "" | "." => {}
      ".." => {
        segments.pop();
      }
      s => segments.push(s),
    }
  }
  let mut out = String::with_capacity(path.len() + 1);
  for seg in &segments {
    out.push('/');
    out.push_str(seg);
  }
  if out.is_empty() {
    out.push('/');
  }
  out
}
