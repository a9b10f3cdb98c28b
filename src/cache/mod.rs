//! Local-first cache for sensor metadata and readings.
//!
//! This module provides:
//! - A SQLite store with one table per record family and a versioned schema
//! - A no-op store for network-only sessions
//! - A cache-aside layer that serves the store first and revalidates in the background

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, StalePolicy};
pub use storage::{
  CacheStorage, Cached, NoopStorage, RangeStrategy, SqliteStorage, WriteReport, SCHEMA_VERSION,
};
pub use traits::{CacheResult, CacheSource, Cacheable};
