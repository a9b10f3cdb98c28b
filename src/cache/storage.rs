//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::traits::Cacheable;
use crate::error::{Result, SyncError};
use crate::remote::types::{ReadingRecord, SensorRecord};

/// Bumping this wipes every existing cache on next open.
pub const SCHEMA_VERSION: i32 = 2;

const IDENTITY_KEY: &str = "identity_fingerprint";

/// Records read back from the store.
#[derive(Debug, Clone)]
pub struct Cached<T> {
  pub records: Vec<T>,
  /// Oldest write time among the returned records
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Cached<T> {
  pub fn empty() -> Self {
    Self {
      records: Vec::new(),
      cached_at: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

/// Per-item outcome of a batch upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
  pub written: usize,
  /// `(cache_key, reason)` for every record that was not written
  pub failed: Vec<(String, String)>,
}

impl WriteReport {
  fn record(&mut self, key: String, outcome: std::result::Result<(), String>) {
    match outcome {
      Ok(()) => self.written += 1,
      Err(reason) => self.failed.push((key, reason)),
    }
  }

  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// How ranged reading lookups are executed. Both return the same records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStrategy {
  /// Load every reading of the sensor through its index, then filter in memory
  #[default]
  FilterInMemory,
  /// Let SQLite range-scan the (sensor_id, ts_ms) key
  IndexScan,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// False for backends that persist nothing.
  fn is_available(&self) -> bool {
    true
  }

  /// Upsert sensors keyed by `sensor_id`.
  fn upsert_sensors(&self, records: &[SensorRecord]) -> Result<WriteReport>;

  /// Every stored sensor.
  fn get_all_sensors(&self) -> Result<Cached<SensorRecord>>;

  /// Upsert readings keyed by `(sensor_id, timestamp)`, stamping `sensor_id` where absent.
  fn upsert_readings(&self, sensor_id: &str, records: &[ReadingRecord]) -> Result<WriteReport>;

  /// Readings of one sensor with `start <= timestamp <= end`, oldest first.
  fn get_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Cached<ReadingRecord>>;

  /// Drop one sensor's readings, returning how many were removed.
  fn delete_readings(&self, sensor_id: &str) -> Result<usize>;

  /// Wipe both record families.
  fn clear_all(&self) -> Result<()>;

  /// Fingerprint of the identity whose data is currently stored.
  fn identity_fingerprint(&self) -> Result<Option<String>>;

  fn set_identity_fingerprint(&self, fingerprint: &str) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled or the store failed to open.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn is_available(&self) -> bool {
    false
  }

  fn upsert_sensors(&self, _records: &[SensorRecord]) -> Result<WriteReport> {
    Ok(WriteReport::default()) // Discard
  }

  fn get_all_sensors(&self) -> Result<Cached<SensorRecord>> {
    Ok(Cached::empty()) // Always miss
  }

  fn upsert_readings(&self, _sensor_id: &str, _records: &[ReadingRecord]) -> Result<WriteReport> {
    Ok(WriteReport::default())
  }

  fn get_readings(
    &self,
    _sensor_id: &str,
    _start: Option<DateTime<Utc>>,
    _end: Option<DateTime<Utc>>,
  ) -> Result<Cached<ReadingRecord>> {
    Ok(Cached::empty())
  }

  fn delete_readings(&self, _sensor_id: &str) -> Result<usize> {
    Ok(0)
  }

  fn clear_all(&self) -> Result<()> {
    Ok(())
  }

  fn identity_fingerprint(&self) -> Result<Option<String>> {
    Ok(None)
  }

  fn set_identity_fingerprint(&self, _fingerprint: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  range_strategy: RangeStrategy,
}

impl SqliteStorage {
  /// Open (or create) the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::StorageUnavailable(format!("Failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::StorageUnavailable(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::StorageUnavailable(format!("Failed to open in-memory cache: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    init_schema(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
      range_strategy: RangeStrategy::default(),
    })
  }

  pub fn with_range_strategy(mut self, strategy: RangeStrategy) -> Self {
    self.range_strategy = strategy;
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::StorageUnavailable("Could not determine data directory".into()))?;

    Ok(data_dir.join("fleetsync").join("cache.db"))
  }

  fn lock(&self, fault: fn(String) -> SyncError) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| fault(format!("Lock poisoned: {}", e)))
  }
}

/// Create the schema, wiping it first when the stored version differs.
fn init_schema(conn: &Connection) -> Result<()> {
  let unavailable = |e: rusqlite::Error| SyncError::StorageUnavailable(format!("Failed to prepare cache schema: {}", e));

  let stored: i32 = conn
    .pragma_query_value(None, "user_version", |row| row.get(0))
    .map_err(unavailable)?;

  if stored != SCHEMA_VERSION {
    if stored != 0 {
      info!(
        stored,
        current = SCHEMA_VERSION,
        "Cache schema version changed, recreating store"
      );
    }
    conn.execute_batch(DROP_SCHEMA).map_err(unavailable)?;
  }

  conn.execute_batch(CACHE_SCHEMA).map_err(unavailable)?;
  conn
    .pragma_update(None, "user_version", SCHEMA_VERSION)
    .map_err(unavailable)?;

  Ok(())
}

const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS sensors;
DROP TABLE IF EXISTS readings;
DROP TABLE IF EXISTS cache_meta;
"#;

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Sensor metadata (stores serialized JSON)
CREATE TABLE IF NOT EXISTS sensors (
    sensor_id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL -- unix time, milliseconds
);

CREATE INDEX IF NOT EXISTS idx_sensors_owner ON sensors(owner_id);

-- Time-series readings
CREATE TABLE IF NOT EXISTS readings (
    sensor_id TEXT NOT NULL,
    ts_ms INTEGER NOT NULL, -- unix time, milliseconds
    air_temperature REAL,
    air_humidity REAL,
    soil_moisture REAL,
    brightness REAL,
    battery_level REAL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (sensor_id, ts_ms)
);

CREATE INDEX IF NOT EXISTS idx_readings_sensor ON readings(sensor_id);
CREATE INDEX IF NOT EXISTS idx_readings_ts ON readings(ts_ms);

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

const READING_COLUMNS: &str =
  "sensor_id, ts_ms, air_temperature, air_humidity, soil_moisture, brightness, battery_level, cached_at";

impl CacheStorage for SqliteStorage {
  fn upsert_sensors(&self, records: &[SensorRecord]) -> Result<WriteReport> {
    let mut conn = self.lock(SyncError::CacheWrite)?;
    let tx = conn
      .transaction()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to begin transaction: {}", e)))?;
    let now = Utc::now().timestamp_millis();
    let mut report = WriteReport::default();

    {
      let mut stmt = tx
        .prepare_cached(
          "INSERT OR REPLACE INTO sensors (sensor_id, owner_id, data, cached_at)
           VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(|e| SyncError::CacheWrite(format!("Failed to prepare sensor upsert: {}", e)))?;

      for record in records {
        let outcome = record
          .validate()
          .and_then(|()| serde_json::to_vec(record).map_err(|e| e.to_string()))
          .and_then(|data| {
            stmt
              .execute(params![record.sensor_id, record.owner_id, data, now])
              .map(|_| ())
              .map_err(|e| e.to_string())
          });
        report.record(record.cache_key(), outcome);
      }
    }

    tx.commit()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to commit sensors: {}", e)))?;

    debug!(
      family = SensorRecord::family(),
      written = report.written,
      failed = report.failed.len(),
      "Upserted records"
    );
    Ok(report)
  }

  fn get_all_sensors(&self) -> Result<Cached<SensorRecord>> {
    let conn = self.lock(SyncError::CacheRead)?;
    let mut stmt = conn
      .prepare("SELECT sensor_id, data, cached_at FROM sensors ORDER BY sensor_id")
      .map_err(|e| SyncError::CacheRead(format!("Failed to prepare query: {}", e)))?;

    let rows: Vec<(String, Vec<u8>, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| SyncError::CacheRead(format!("Failed to query sensors: {}", e)))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| SyncError::CacheRead(format!("Failed to read sensor row: {}", e)))?;

    let mut cached = Cached::empty();
    for (sensor_id, data, cached_at) in rows {
      match serde_json::from_slice::<SensorRecord>(&data) {
        Ok(record) => {
          cached.records.push(record);
          cached.cached_at = oldest(cached.cached_at, cached_at);
        }
        Err(e) => warn!(%sensor_id, error = %e, "Skipping undecodable cached sensor"),
      }
    }

    Ok(cached)
  }

  fn upsert_readings(&self, sensor_id: &str, records: &[ReadingRecord]) -> Result<WriteReport> {
    let mut conn = self.lock(SyncError::CacheWrite)?;
    let tx = conn
      .transaction()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to begin transaction: {}", e)))?;
    let now = Utc::now().timestamp_millis();
    let mut report = WriteReport::default();

    {
      let mut stmt = tx
        .prepare_cached(&format!(
          "INSERT OR REPLACE INTO readings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          READING_COLUMNS
        ))
        .map_err(|e| SyncError::CacheWrite(format!("Failed to prepare reading upsert: {}", e)))?;

      for record in records {
        let mut stamped = record.clone();
        let outcome = match stamped.sensor_id.clone() {
          Some(own) if own != sensor_id => Err(format!("reading belongs to sensor {}", own)),
          _ => {
            stamped.sensor_id = Some(sensor_id.to_string());
            stamped.validate()
          }
        }
        .and_then(|()| {
          stmt
            .execute(params![
              sensor_id,
              stamped.timestamp.timestamp_millis(),
              stamped.air_temperature,
              stamped.air_humidity,
              stamped.soil_moisture,
              stamped.brightness,
              stamped.battery_level,
              now,
            ])
            .map(|_| ())
            .map_err(|e| e.to_string())
        });
        report.record(stamped.cache_key(), outcome);
      }
    }

    tx.commit()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to commit readings: {}", e)))?;

    debug!(
      family = ReadingRecord::family(),
      sensor_id,
      written = report.written,
      failed = report.failed.len(),
      "Upserted records"
    );
    Ok(report)
  }

  fn get_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Cached<ReadingRecord>> {
    let conn = self.lock(SyncError::CacheRead)?;

    let rows: Vec<(ReadingRecord, i64)> = match self.range_strategy {
      RangeStrategy::FilterInMemory => {
        let mut stmt = conn
          .prepare_cached(&format!(
            "SELECT {} FROM readings WHERE sensor_id = ?1 ORDER BY ts_ms",
            READING_COLUMNS
          ))
          .map_err(|e| SyncError::CacheRead(format!("Failed to prepare query: {}", e)))?;
        let all = stmt
          .query_map(params![sensor_id], reading_from_row)
          .map_err(|e| SyncError::CacheRead(format!("Failed to query readings: {}", e)))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| SyncError::CacheRead(format!("Failed to read reading row: {}", e)))?;
        all
          .into_iter()
          .filter(|(reading, _)| reading.in_window(start, end))
          .collect()
      }
      RangeStrategy::IndexScan => {
        let lower = start.map_or(i64::MIN, ceil_millis);
        let upper = end.map_or(i64::MAX, |e| e.timestamp_millis());
        let mut stmt = conn
          .prepare_cached(&format!(
            "SELECT {} FROM readings
             WHERE sensor_id = ?1 AND ts_ms >= ?2 AND ts_ms <= ?3
             ORDER BY ts_ms",
            READING_COLUMNS
          ))
          .map_err(|e| SyncError::CacheRead(format!("Failed to prepare query: {}", e)))?;
        let ranged = stmt
          .query_map(params![sensor_id, lower, upper], reading_from_row)
          .map_err(|e| SyncError::CacheRead(format!("Failed to query readings: {}", e)))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| SyncError::CacheRead(format!("Failed to read reading row: {}", e)))?;
        ranged
      }
    };

    let mut cached = Cached::empty();
    for (reading, cached_at) in rows {
      cached.cached_at = oldest(cached.cached_at, cached_at);
      cached.records.push(reading);
    }
    Ok(cached)
  }

  fn delete_readings(&self, sensor_id: &str) -> Result<usize> {
    let conn = self.lock(SyncError::CacheWrite)?;
    conn
      .execute("DELETE FROM readings WHERE sensor_id = ?1", params![sensor_id])
      .map_err(|e| SyncError::CacheWrite(format!("Failed to delete readings: {}", e)))
  }

  fn clear_all(&self) -> Result<()> {
    let mut conn = self.lock(SyncError::CacheWrite)?;
    let tx = conn
      .transaction()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to begin transaction: {}", e)))?;
    tx.execute_batch("DELETE FROM sensors; DELETE FROM readings;")
      .map_err(|e| SyncError::CacheWrite(format!("Failed to clear cache: {}", e)))?;
    tx.commit()
      .map_err(|e| SyncError::CacheWrite(format!("Failed to commit cache wipe: {}", e)))?;

    info!("Cleared local cache");
    Ok(())
  }

  fn identity_fingerprint(&self) -> Result<Option<String>> {
    let conn = self.lock(SyncError::CacheRead)?;
    conn
      .query_row(
        "SELECT value FROM cache_meta WHERE key = ?1",
        params![IDENTITY_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| SyncError::CacheRead(format!("Failed to read cache metadata: {}", e)))
  }

  fn set_identity_fingerprint(&self, fingerprint: &str) -> Result<()> {
    let conn = self.lock(SyncError::CacheWrite)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?1, ?2)",
        params![IDENTITY_KEY, fingerprint],
      )
      .map(|_| ())
      .map_err(|e| SyncError::CacheWrite(format!("Failed to write cache metadata: {}", e)))
  }
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<(ReadingRecord, i64)> {
  let ts_ms: i64 = row.get(1)?;
  let timestamp = DateTime::from_timestamp_millis(ts_ms).ok_or_else(|| {
    rusqlite::Error::IntegralValueOutOfRange(1, ts_ms)
  })?;

  let reading = ReadingRecord {
    sensor_id: Some(row.get(0)?),
    timestamp,
    air_temperature: row.get(2)?,
    air_humidity: row.get(3)?,
    soil_moisture: row.get(4)?,
    brightness: row.get(5)?,
    battery_level: row.get(6)?,
  };
  Ok((reading, row.get(7)?))
}

/// Smallest whole millisecond not earlier than `dt`.
fn ceil_millis(dt: DateTime<Utc>) -> i64 {
  let floor = dt.timestamp_millis();
  if dt.timestamp_subsec_nanos() % 1_000_000 == 0 {
    floor
  } else {
    floor + 1
  }
}

fn oldest(current: Option<DateTime<Utc>>, cached_at_ms: i64) -> Option<DateTime<Utc>> {
  let candidate = DateTime::from_timestamp_millis(cached_at_ms);
  match (current, candidate) {
    (Some(a), Some(b)) => Some(a.min(b)),
    (a, b) => a.or(b),
  }
}
