use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor metadata as served by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
  pub sensor_id: String,
  pub owner_id: String,
  pub name: String,
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default)]
  pub device_type: Option<String>,
  /// Unique hardware identifier burned into the device
  #[serde(default)]
  pub hardware_id: Option<String>,
  #[serde(default)]
  pub battery_level: Option<f64>,
  #[serde(default)]
  pub firmware_version: Option<String>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

/// One time-series sample for a sensor.
///
/// `sensor_id` may be missing on the wire when the reading was requested for a
/// single sensor; the store stamps it before writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
  #[serde(default)]
  pub sensor_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub air_temperature: Option<f64>,
  #[serde(default)]
  pub air_humidity: Option<f64>,
  #[serde(default)]
  pub soil_moisture: Option<f64>,
  #[serde(default)]
  pub brightness: Option<f64>,
  #[serde(default)]
  pub battery_level: Option<f64>,
}

impl ReadingRecord {
  /// Whether the reading falls inside the inclusive `[start, end]` window.
  pub fn in_window(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| self.timestamp >= s) && end.map_or(true, |e| self.timestamp <= e)
  }
}

/// Lifecycle of a server-side analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl JobStatus {
  /// Pending and processing jobs still need watching.
  pub fn is_active(self) -> bool {
    matches!(self, JobStatus::Pending | JobStatus::Processing)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Processing => "processing",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
    }
  }
}

impl std::fmt::Display for JobStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.pad(self.as_str())
  }
}

/// Step progress reported by long-running jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
  pub current_step: u32,
  pub total_steps: u32,
  #[serde(default)]
  pub step_name: Option<String>,
}

/// Snapshot of an analysis job. Held in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
  pub analytics_id: String,
  pub status: JobStatus,
  pub analysis_type: String,
  pub sensor_id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub result: Option<serde_json::Value>,
  #[serde(default)]
  pub progress: Option<JobProgress>,
}

/// Request body for creating an analysis job
#[derive(Debug, Clone, Serialize)]
pub struct NewAnalysisJob {
  pub sensor_id: String,
  pub analysis_type: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parameters: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_window_is_inclusive() {
    let at = |s| Utc.timestamp_opt(s, 0).unwrap();
    let reading = ReadingRecord {
      sensor_id: None,
      timestamp: at(100),
      air_temperature: Some(21.5),
      air_humidity: None,
      soil_moisture: None,
      brightness: None,
      battery_level: None,
    };

    assert!(reading.in_window(Some(at(100)), Some(at(100))));
    assert!(reading.in_window(None, None));
    assert!(!reading.in_window(Some(at(101)), None));
    assert!(!reading.in_window(None, Some(at(99))));
  }

  #[test]
  fn test_job_status_wire_format() {
    let status: JobStatus = serde_json::from_str("\"processing\"").unwrap();
    assert_eq!(status, JobStatus::Processing);
    assert!(status.is_active());
    assert!(!JobStatus::Failed.is_active());
    assert_eq!(serde_json::to_string(&JobStatus::Completed).unwrap(), "\"completed\"");
  }
}
