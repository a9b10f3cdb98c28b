//! Error taxonomy for the sync cache.
//!
//! Only [`SyncError::Remote`] is meant to reach a user. Cache faults are
//! logged and downgraded to misses by the cache layer, and cancellation is
//! swallowed by whoever started the request.

use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The local store could not be opened; the session runs network-only.
  #[error("Local store unavailable: {0}")]
  StorageUnavailable(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("Cache read failed: {0}")]
  CacheRead(String),

  #[error("Cache write failed: {0}")]
  CacheWrite(String),

  /// The request was abandoned on purpose (superseded or torn down).
  #[error("Request canceled")]
  Canceled,

  #[error(transparent)]
  Remote(#[from] RemoteError),
}

impl SyncError {
  pub fn is_canceled(&self) -> bool {
    matches!(self, SyncError::Canceled)
  }

  /// Faults that the cache layer absorbs instead of propagating.
  pub fn is_cache_fault(&self) -> bool {
    matches!(
      self,
      SyncError::StorageUnavailable(_) | SyncError::CacheRead(_) | SyncError::CacheWrite(_)
    )
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;
