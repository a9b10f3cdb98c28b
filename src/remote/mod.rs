//! Remote sensor API: record types, wire envelopes and the HTTP client.

pub mod api_types;
pub mod client;
pub mod types;

pub use client::{HttpRemote, RemoteError, RemoteService};
pub use types::{AnalysisJob, JobProgress, JobStatus, NewAnalysisJob, ReadingRecord, SensorRecord};
