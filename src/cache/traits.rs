//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

use crate::remote::types::{ReadingRecord, SensorRecord};

/// Trait for records that can be persisted by the cache.
///
/// Implementors provide their primary key and the checks applied at the store
/// boundary before a write.
pub trait Cacheable: Clone + Send + Sync {
  /// Primary key rendered as a string (composite keys are joined).
  fn cache_key(&self) -> String;

  /// Reject records that would violate the family's schema.
  fn validate(&self) -> Result<(), String>;

  /// Record family name (e.g., "sensors", "readings")
  fn family() -> &'static str;
}

impl Cacheable for SensorRecord {
  fn cache_key(&self) -> String {
    self.sensor_id.clone()
  }

  fn validate(&self) -> Result<(), String> {
    if self.sensor_id.trim().is_empty() {
      return Err("sensor_id is empty".to_string());
    }
    check_finite("battery_level", self.battery_level)
  }

  fn family() -> &'static str {
    "sensors"
  }
}

impl Cacheable for ReadingRecord {
  fn cache_key(&self) -> String {
    format!(
      "{}@{}",
      self.sensor_id.as_deref().unwrap_or("?"),
      self.timestamp.timestamp_millis()
    )
  }

  fn validate(&self) -> Result<(), String> {
    match self.sensor_id.as_deref() {
      Some(id) if !id.trim().is_empty() => {}
      _ => return Err("sensor_id is missing".to_string()),
    }
    check_finite("air_temperature", self.air_temperature)?;
    check_finite("air_humidity", self.air_humidity)?;
    check_finite("soil_moisture", self.soil_moisture)?;
    check_finite("brightness", self.brightness)?;
    check_finite("battery_level", self.battery_level)
  }

  fn family() -> &'static str {
    "readings"
  }
}

fn check_finite(field: &str, value: Option<f64>) -> Result<(), String> {
  match value {
    Some(v) if !v.is_finite() => Err(format!("{} is not a finite number", field)),
    _ => Ok(()),
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the oldest part of the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the store; a background refresh has been started
  Cache,
  /// Network unavailable, serving data the staleness policy had rejected
  Offline,
}
