//! Local-first sync cache for a sensor fleet.
//!
//! Sensor metadata and readings are served from a local SQLite store and
//! refreshed from the remote API behind the scenes. Requests are grouped into
//! cancelable sessions, and long-running analysis jobs are tracked by an
//! adaptive poller that reports status transitions.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod query;
pub mod remote;
pub mod session;

#[cfg(test)]
mod test_support;

pub use error::{Result, SyncError};
pub use session::SyncSession;
