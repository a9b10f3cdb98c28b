//! Scripted remote service and record builders shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::remote::{
  AnalysisJob, JobStatus, NewAnalysisJob, ReadingRecord, RemoteError, RemoteService, SensorRecord,
};

pub fn at(secs: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn sensor(id: &str) -> SensorRecord {
  SensorRecord {
    sensor_id: id.to_string(),
    owner_id: "owner-1".to_string(),
    name: format!("Sensor {}", id),
    location: None,
    device_type: Some("soil-probe".to_string()),
    hardware_id: None,
    battery_level: Some(90.0),
    firmware_version: None,
    created_at: Some(at(0)),
    updated_at: None,
  }
}

pub fn reading(secs: i64, temp: f64) -> ReadingRecord {
  ReadingRecord {
    sensor_id: None,
    timestamp: at(secs),
    air_temperature: Some(temp),
    air_humidity: None,
    soil_moisture: Some(0.31),
    brightness: None,
    battery_level: None,
  }
}

pub fn job(id: &str, status: JobStatus) -> AnalysisJob {
  AnalysisJob {
    analytics_id: id.to_string(),
    status,
    analysis_type: "anomaly".to_string(),
    sensor_id: "s-1".to_string(),
    created_at: at(0),
    updated_at: at(0),
    result: None,
    progress: None,
  }
}

fn unavailable() -> RemoteError {
  RemoteError::Api {
    status: 503,
    message: "service unavailable".to_string(),
  }
}

/// In-memory [`RemoteService`] with switchable outages and per-sensor latency.
#[derive(Default)]
pub struct MockRemote {
  sensors: Mutex<Vec<SensorRecord>>,
  readings: Mutex<HashMap<String, Vec<ReadingRecord>>>,
  reading_delays: Mutex<HashMap<String, Duration>>,
  /// Scripted `list_jobs` responses; the last one repeats
  job_script: Mutex<VecDeque<Option<Vec<AnalysisJob>>>>,
  offline: AtomicBool,
  pub sensor_calls: AtomicUsize,
  pub reading_calls: AtomicUsize,
  pub job_calls: AtomicUsize,
}

impl MockRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_sensors(self, sensors: Vec<SensorRecord>) -> Self {
    *self.sensors.lock().unwrap() = sensors;
    self
  }

  pub fn with_readings(self, sensor_id: &str, readings: Vec<ReadingRecord>) -> Self {
    self
      .readings
      .lock()
      .unwrap()
      .insert(sensor_id.to_string(), readings);
    self
  }

  pub fn with_reading_delay(self, sensor_id: &str, delay: Duration) -> Self {
    self
      .reading_delays
      .lock()
      .unwrap()
      .insert(sensor_id.to_string(), delay);
    self
  }

  pub fn set_sensors(&self, sensors: Vec<SensorRecord>) {
    *self.sensors.lock().unwrap() = sensors;
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Queue a successful `list_jobs` response.
  pub fn push_jobs(&self, jobs: Vec<AnalysisJob>) {
    self.job_script.lock().unwrap().push_back(Some(jobs));
  }

  /// Queue a failing `list_jobs` response.
  pub fn push_jobs_failure(&self) {
    self.job_script.lock().unwrap().push_back(None);
  }

  fn check_online(&self) -> Result<(), RemoteError> {
    if self.offline.load(Ordering::SeqCst) {
      Err(unavailable())
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl RemoteService for MockRemote {
  async fn list_sensors(&self) -> Result<Vec<SensorRecord>, RemoteError> {
    self.sensor_calls.fetch_add(1, Ordering::SeqCst);
    self.check_online()?;
    Ok(self.sensors.lock().unwrap().clone())
  }

  async fn get_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Vec<ReadingRecord>, RemoteError> {
    self.reading_calls.fetch_add(1, Ordering::SeqCst);
    let delay = self.reading_delays.lock().unwrap().get(sensor_id).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.check_online()?;

    let readings = self.readings.lock().unwrap();
    Ok(
      readings
        .get(sensor_id)
        .map(|all| {
          all
            .iter()
            .filter(|r| r.in_window(start, end))
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  async fn delete_readings(&self, sensor_id: &str) -> Result<u64, RemoteError> {
    self.check_online()?;
    let removed = self.readings.lock().unwrap().remove(sensor_id);
    Ok(removed.map_or(0, |r| r.len() as u64))
  }

  async fn list_jobs(&self) -> Result<Vec<AnalysisJob>, RemoteError> {
    self.job_calls.fetch_add(1, Ordering::SeqCst);
    self.check_online()?;

    let mut script = self.job_script.lock().unwrap();
    let next = if script.len() > 1 {
      script.pop_front()
    } else {
      script.front().cloned()
    };
    match next {
      Some(Some(jobs)) => Ok(jobs),
      Some(None) => Err(unavailable()),
      None => Ok(Vec::new()),
    }
  }

  async fn create_job(&self, new_job: &NewAnalysisJob) -> Result<AnalysisJob, RemoteError> {
    self.check_online()?;
    let mut created = job("created", JobStatus::Pending);
    created.sensor_id = new_job.sensor_id.clone();
    created.analysis_type = new_job.analysis_type.clone();
    Ok(created)
  }

  async fn delete_job(&self, _analytics_id: &str) -> Result<bool, RemoteError> {
    self.check_online()?;
    Ok(true)
  }
}
