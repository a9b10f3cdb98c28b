//! Async query abstraction for widget-owned data fetching.
//!
//! Inspired by TanStack Query, a `Query<T>` encapsulates async data fetching,
//! loading states, and error handling for one consumer. Each query is bound to
//! a cancellation session in a [`RequestRegistry`]: starting a fetch cancels
//! the session's previous request, and a canceled fetch never touches state.
//!
//! # Example
//!
//! ```ignore
//! let cache = session.cache().clone();
//! let mut query = Query::new(session.registry().clone(), "readings-panel", move |cancel| {
//!     let cache = cache.clone();
//!     async move { cache.fetch_readings("s-1", None, None, &cancel).await }
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cancel::RequestRegistry;
use crate::error::{Result, SyncError};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future that returns a sync result
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn(CancellationToken) -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure receiving the request's cancel token)
/// - Loading/success/error states
/// - Async result handling via channels
/// - Optional stale time tracking for refetch decisions
pub struct Query<T> {
  state: QueryState<T>,
  /// State to restore if the in-flight fetch ends up canceled
  before_fetch: Option<QueryState<T>>,
  fetcher: FetcherFn<T>,
  registry: RequestRegistry,
  session: String,
  receiver: Option<mpsc::UnboundedReceiver<Result<T>>>,
  inflight: Option<CancellationToken>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query bound to `session`.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` is invoked and
  /// receives the token of the request it serves.
  pub fn new<F, Fut>(registry: RequestRegistry, session: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      before_fetch: None,
      fetcher: Box::new(move |token| Box::pin(fetcher(token))),
      registry,
      session: session.into(),
      receiver: None,
      inflight: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60), // Default 1 minute
    }
  }

  /// Set the stale time for this query.
  ///
  /// After this duration, the data is considered stale and `is_stale()` returns true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn session(&self) -> &str {
    &self.session
  }

  /// Check if the query is currently loading.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if the query succeeded.
  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  /// Check if the query failed.
  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the query failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, canceling any pending fetch.
  pub fn refetch(&mut self) {
    self.start_fetch();
  }

  /// Abandon the in-flight fetch and restore the state it replaced.
  pub fn cancel(&mut self) {
    if let Some(token) = self.inflight.take() {
      token.cancel();
    }
    self.receiver = None;
    self.restore();
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the fetch settled (data, error, or cancellation). A
  /// canceled fetch puts back the state it replaced instead of reporting an
  /// error. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    let outcome = match receiver.try_recv() {
      Ok(outcome) => outcome,
      Err(mpsc::error::TryRecvError::Empty) => return false,
      // Task ended without reporting; nothing to apply
      Err(mpsc::error::TryRecvError::Disconnected) => Err(SyncError::Canceled),
    };

    self.receiver = None;
    self.inflight = None;

    match outcome {
      Ok(data) => {
        self.state = QueryState::Success(data);
        self.before_fetch = None;
        self.fetched_at = Some(Instant::now());
      }
      Err(SyncError::Canceled) => self.restore(),
      Err(error) => {
        self.state = QueryState::Error(error.to_string());
        self.before_fetch = None;
      }
    }
    true
  }

  fn restore(&mut self) {
    if let Some(previous) = self.before_fetch.take() {
      self.state = previous;
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let handle = self.registry.begin(&self.session);
    self.inflight = Some(handle.token().clone());

    if !self.state.is_loading() {
      self.before_fetch = Some(std::mem::replace(&mut self.state, QueryState::Loading));
    }

    let future = (self.fetcher)(handle.token().clone());
    tokio::spawn(async move {
      let result = handle.run(future).await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(token) = self.inflight.take() {
      token.cancel();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("session", &self.session)
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::RemoteError;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn remote_failure() -> SyncError {
    SyncError::Remote(RemoteError::Api {
      status: 500,
      message: "Something went wrong".to_string(),
    })
  }

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(RequestRegistry::new(), "list", |_| async {
      Ok(vec![1, 2, 3])
    });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> =
      Query::new(RequestRegistry::new(), "list", |_| async { Err(remote_failure()) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some("API error (500): Something went wrong"));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(RequestRegistry::new(), "list", |_| async { Ok(42) })
      .with_stale_time(Duration::ZERO);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    // With zero stale time, should immediately be stale
    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut query = Query::new(RequestRegistry::new(), "list", move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(42)
      }
    });

    query.fetch();
    assert!(query.is_loading());

    // Second fetch should be no-op
    query.fetch();
    assert!(query.is_loading());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_refetch_applies_only_latest_result() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(RequestRegistry::new(), "chart", move |_| {
      let attempt = counter_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if attempt == 0 {
          tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(attempt)
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    assert_eq!(query.data(), Some(&1));

    // The first attempt's late completion must not show up either
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!query.poll());
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_newer_query_in_same_session_wins() {
    let registry = RequestRegistry::new();

    let mut old_widget = Query::new(registry.clone(), "chart", |_| async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok("old")
    });
    let mut new_widget = Query::new(registry.clone(), "chart", |_| async { Ok("new") });

    old_widget.fetch();
    new_widget.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(new_widget.poll());
    assert_eq!(new_widget.data(), Some(&"new"));

    // The superseded fetch resolves canceled and leaves its query untouched
    assert!(old_widget.poll());
    assert!(matches!(old_widget.state(), QueryState::Idle));
    assert!(!old_widget.is_error());
  }

  #[tokio::test]
  async fn test_cancel_restores_previous_data() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let mut query = Query::new(RequestRegistry::new(), "chart", move |_| {
      let attempt = counter_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if attempt > 0 {
          tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(attempt)
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&0));

    query.refetch();
    assert!(query.is_loading());
    query.cancel();

    assert_eq!(query.data(), Some(&0));
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_drop_cancels_inflight_request() {
    let registry = RequestRegistry::new();
    let seen = Arc::new(std::sync::Mutex::new(None::<CancellationToken>));
    let seen_clone = seen.clone();

    let mut query = Query::new(registry.clone(), "chart", move |token: CancellationToken| {
      *seen_clone.lock().unwrap() = Some(token);
      async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
      }
    });
    query.fetch();
    drop(query);

    let token = seen.lock().unwrap().clone().unwrap();
    assert!(token.is_cancelled());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.active_count(), 0);
  }
}
