//! Per-session request cancellation.
//!
//! A session is one logical consumer of data (a chart widget, a detail pane).
//! Starting a request for a session cancels whatever that session had in
//! flight, so a slow earlier response can never overwrite a newer one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SyncError};

#[derive(Debug)]
struct ActiveRequest {
  id: u64,
  token: CancellationToken,
}

#[derive(Debug, Default)]
struct Sessions {
  next_id: u64,
  active: HashMap<String, ActiveRequest>,
}

/// Registry of the single in-flight request per session.
#[derive(Debug, Clone, Default)]
pub struct RequestRegistry {
  sessions: Arc<Mutex<Sessions>>,
}

impl RequestRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a new request for `session`, canceling the previous one.
  pub fn begin(&self, session: &str) -> RequestHandle {
    let token = CancellationToken::new();
    let mut sessions = self.lock();
    sessions.next_id += 1;
    let id = sessions.next_id;

    let previous = sessions.active.insert(
      session.to_string(),
      ActiveRequest {
        id,
        token: token.clone(),
      },
    );
    if let Some(previous) = previous {
      debug!(session, superseded = previous.id, "Canceling superseded request");
      previous.token.cancel();
    }

    RequestHandle {
      registry: self.clone(),
      session: session.to_string(),
      id,
      token,
    }
  }

  /// Cancel the session's in-flight request, if any. Idempotent.
  pub fn cancel(&self, session: &str) {
    if let Some(active) = self.lock().active.remove(session) {
      debug!(session, request = active.id, "Canceling request");
      active.token.cancel();
    }
  }

  /// Cancel every in-flight request (logout, shutdown).
  pub fn cancel_all(&self) {
    let drained: Vec<ActiveRequest> = self.lock().active.drain().map(|(_, a)| a).collect();
    for active in drained {
      active.token.cancel();
    }
  }

  /// Whether `session` has a request in flight.
  pub fn is_active(&self, session: &str) -> bool {
    self.lock().active.contains_key(session)
  }

  pub fn active_count(&self) -> usize {
    self.lock().active.len()
  }

  fn is_current(&self, session: &str, id: u64) -> bool {
    self
      .lock()
      .active
      .get(session)
      .is_some_and(|active| active.id == id)
  }

  /// Release the slot, but only if it still belongs to request `id`.
  fn finish(&self, session: &str, id: u64) {
    let mut sessions = self.lock();
    if sessions.active.get(session).is_some_and(|a| a.id == id) {
      sessions.active.remove(session);
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Sessions> {
    // Nothing in here can be left half-updated by a panic
    self
      .sessions
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Handle to one request started through [`RequestRegistry::begin`].
#[derive(Debug)]
pub struct RequestHandle {
  registry: RequestRegistry,
  session: String,
  id: u64,
  token: CancellationToken,
}

impl RequestHandle {
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn session(&self) -> &str {
    &self.session
  }

  pub fn is_canceled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Drive `fut` to completion unless the request is canceled first.
  ///
  /// Resolves to [`SyncError::Canceled`] when the token fires or when a newer
  /// request for the same session started while `fut` was running, so the
  /// caller can tell an abandoned request from a failed one.
  pub async fn run<T, Fut>(self, fut: Fut) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
  {
    let outcome = tokio::select! {
      biased;
      _ = self.token.cancelled() => Err(SyncError::Canceled),
      result = fut => result,
    };

    let superseded = !self.registry.is_current(&self.session, self.id);
    self.registry.finish(&self.session, self.id);

    match outcome {
      Ok(_) if superseded || self.token.is_cancelled() => Err(SyncError::Canceled),
      other => other,
    }
  }
}
