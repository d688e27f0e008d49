use std::{
  future::poll_fn,
  pin::Pin,
  task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

use super::{Entry, Query, QueryResult};

enum Source {
  Channel(mpsc::Receiver<QueryResult>),
  Entries(std::vec::IntoIter<Entry>),
}

/// The consumer side of a query.
///
/// Entries arrive in cursor order. An `Err` item is terminal: nothing
/// follows it. Dropping or closing the results tells the producer to stop
/// and release its cursor.
pub struct Results {
  query: Query,
  source: Source,
  cancel: CancellationToken,
}

impl Results {
  pub(crate) fn with_channel(
    query: Query,
    rx: mpsc::Receiver<QueryResult>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      query,
      source: Source::Channel(rx),
      cancel,
    }
  }

  /// Results that are already fully known.
  pub fn with_entries(query: Query, entries: Vec<Entry>) -> Self {
    Self {
      query,
      source: Source::Entries(entries.into_iter()),
      cancel: CancellationToken::new(),
    }
  }

  pub fn query(&self) -> &Query {
    &self.query
  }

  pub async fn next(&mut self) -> Option<QueryResult> {
    poll_fn(|cx| self.poll_result(cx)).await
  }

  /// Collects every remaining entry, or returns the first error.
  pub async fn rest(mut self) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    while let Some(result) = self.next().await {
      entries.push(result?);
    }
    Ok(entries)
  }

  /// Stops the producer early. Later calls to `next` return `None`.
  pub fn close(&mut self) {
    self.cancel.cancel();
    self.source = Source::Entries(Vec::new().into_iter());
  }

  fn poll_result(&mut self, cx: &mut Context<'_>) -> Poll<Option<QueryResult>> {
    match &mut self.source {
      Source::Channel(rx) => rx.poll_recv(cx),
      Source::Entries(entries) => Poll::Ready(entries.next().map(Ok)),
    }
  }
}

impl Stream for Results {
  type Item = QueryResult;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.get_mut().poll_result(cx)
  }
}

impl Drop for Results {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::errors::Errors;
  use bytes::Bytes;
  use futures::StreamExt;

  #[tokio::test]
  async fn test_results_with_entries() {
    let entries = vec![
      Entry::new("/a", Bytes::from("1")),
      Entry::new("/b", Bytes::from("2")),
    ];
    let mut results = Results::with_entries(Query::new("/"), entries.clone());
    assert_eq!(results.query().prefix, "/");
    assert_eq!(results.next().await, Some(Ok(entries[0].clone())));
    assert_eq!(results.rest().await.unwrap(), vec![entries[1].clone()]);
  }

  #[tokio::test]
  async fn test_results_stop_at_error() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Ok(Entry::new("/a", Bytes::from("1")))).await.unwrap();
    tx.send(Err(Errors::CloseRequested)).await.unwrap();
    drop(tx);

    let results = Results::with_channel(Query::default(), rx, CancellationToken::new());
    assert_eq!(results.rest().await, Err(Errors::CloseRequested));
  }

  #[tokio::test]
  async fn test_results_close_and_drop_cancel() {
    let (_tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let mut results = Results::with_channel(Query::default(), rx, cancel.clone());
    results.close();
    assert!(cancel.is_cancelled());
    assert_eq!(results.next().await, None);

    let (_tx, rx) = mpsc::channel::<QueryResult>(1);
    let cancel = CancellationToken::new();
    let results = Results::with_channel(Query::default(), rx, cancel.clone());
    drop(results);
    assert!(cancel.is_cancelled());
  }

  #[tokio::test]
  async fn test_results_as_stream() {
    let entries = vec![Entry::new("/a", Bytes::from("1"))];
    let results = Results::with_entries(Query::default(), entries);
    let collected: Vec<QueryResult> = results.collect().await;
    assert_eq!(collected.len(), 1);
  }
}
