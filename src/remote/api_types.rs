//! Serde types matching the sensor API's response envelopes.
//!
//! Kept apart from the record types so the records stay focused on what the
//! cache stores.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

// ============================================================================
// Collection envelopes
// ============================================================================

/// List responses come either bare or wrapped in `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiList<T> {
  Bare(Vec<T>),
  Wrapped { data: Vec<T> },
}

impl<T> ApiList<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      ApiList::Bare(items) => items,
      ApiList::Wrapped { data } => data,
    }
  }
}

/// Single-object responses, same two shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiItem<T> {
  Wrapped { data: T },
  Bare(T),
}

impl<T> ApiItem<T> {
  pub fn into_inner(self) -> T {
    match self {
      ApiItem::Wrapped { data } => data,
      ApiItem::Bare(item) => item,
    }
  }
}

// ============================================================================
// Mutation responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiDeleteReadingsResponse {
  #[serde(alias = "count", alias = "deleted_count")]
  pub deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeleteJobResponse {
  pub success: bool,
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  #[serde(alias = "error", alias = "detail")]
  pub message: String,
}

// ============================================================================
// Query parameters
// ============================================================================

/// Build the query pairs for a readings request.
pub fn readings_query(
  sensor_id: &str,
  start: Option<DateTime<Utc>>,
  end: Option<DateTime<Utc>>,
) -> Vec<(&'static str, String)> {
  let mut pairs = vec![("sensor_id", sensor_id.to_string())];
  if let Some(start) = start {
    pairs.push(("start", start.to_rfc3339_opts(SecondsFormat::Millis, true)));
  }
  if let Some(end) = end {
    pairs.push(("end", end.to_rfc3339_opts(SecondsFormat::Millis, true)));
  }
  pairs
}
