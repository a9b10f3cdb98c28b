//! Owned sync context: one store, one remote, one request registry and an
//! optional job poller, with an explicit open/logout/close lifecycle.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage, NoopStorage, SqliteStorage, StalePolicy};
use crate::cancel::RequestRegistry;
use crate::config::{CacheConfig, Config};
use crate::error::{Result, SyncError};
use crate::poller::{JobPoller, PollerConfig};
use crate::remote::{AnalysisJob, HttpRemote, NewAnalysisJob, ReadingRecord, RemoteService, SensorRecord};

/// Request session used by [`SyncSession::warm_readings`].
const WARM_SESSION: &str = "warm-readings";

#[derive(Debug, Clone)]
pub struct SessionOptions {
  /// See [`identity_fingerprint`]
  pub identity_fingerprint: String,
  pub stale_policy: StalePolicy,
  pub poller: PollerConfig,
}

/// Outcome of a prefetch over several sensors.
#[derive(Debug, Default)]
pub struct WarmReport {
  pub warmed: usize,
  /// (sensor_id, error) for sensors that could not be loaded
  pub failed: Vec<(String, String)>,
}

/// Stable fingerprint of whose data the store holds.
pub fn identity_fingerprint(api_url: &str, identity: Option<&str>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(api_url.trim_end_matches('/').as_bytes());
  hasher.update(b"\n");
  hasher.update(identity.unwrap_or_default().as_bytes());
  hex::encode(hasher.finalize())
}

pub struct SyncSession {
  cache: CacheLayer,
  registry: RequestRegistry,
  poller_config: PollerConfig,
  poller: Option<JobPoller>,
}

impl SyncSession {
  /// Build a session from configuration, talking to the configured API.
  ///
  /// A store that cannot be opened degrades the session to network-only.
  pub fn open(config: &Config, token: Option<String>) -> Result<Self> {
    let remote: Arc<dyn RemoteService> = Arc::new(HttpRemote::new(&config.api, token)?);
    let options = SessionOptions {
      identity_fingerprint: identity_fingerprint(&config.api.url, config.api.identity.as_deref()),
      stale_policy: config
        .cache
        .stale_policy()
        .map_err(|e| SyncError::InvalidConfig(e.to_string()))?,
      poller: config.poller.to_poller_config(),
    };
    Ok(Self::new(open_storage(&config.cache), remote, options))
  }

  /// Build a session over explicit parts.
  ///
  /// If the store was filled for a different identity it is cleared first.
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    remote: Arc<dyn RemoteService>,
    options: SessionOptions,
  ) -> Self {
    reconcile_identity(storage.as_ref(), &options.identity_fingerprint);

    Self {
      cache: CacheLayer::new(storage, remote).with_stale_policy(options.stale_policy),
      registry: RequestRegistry::new(),
      poller_config: options.poller,
      poller: None,
    }
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn registry(&self) -> &RequestRegistry {
    &self.registry
  }

  pub fn is_network_only(&self) -> bool {
    !self.cache.storage().is_available()
  }

  pub async fn sensors(&self) -> Result<CacheResult<Vec<SensorRecord>>> {
    self.cache.fetch_sensor_list().await
  }

  pub async fn readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
  ) -> Result<CacheResult<Vec<ReadingRecord>>> {
    self.cache.fetch_readings(sensor_id, start, end, cancel).await
  }

  /// Fetch readings on behalf of a request session.
  ///
  /// Starting another request for the same session cancels this one, which
  /// then resolves to [`crate::error::SyncError::Canceled`].
  pub async fn readings_for(
    &self,
    request_session: &str,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<CacheResult<Vec<ReadingRecord>>> {
    let handle = self.registry.begin(request_session);
    let token = handle.token().clone();
    handle
      .run(self.cache.fetch_readings(sensor_id, start, end, &token))
      .await
  }

  /// Load the full reading history of several sensors with at most
  /// `concurrency` requests in flight.
  pub async fn warm_readings(&self, sensor_ids: &[String], concurrency: usize) -> WarmReport {
    let handle = self.registry.begin(WARM_SESSION);
    let token = handle.token().clone();

    let results: Vec<(String, Result<usize>)> = stream::iter(sensor_ids.iter().cloned())
      .map(|sensor_id| {
        let token = token.clone();
        async move {
          let outcome = self
            .cache
            .fetch_readings(&sensor_id, None, None, &token)
            .await
            .map(|result| result.data.len());
          (sensor_id, outcome)
        }
      })
      .buffer_unordered(concurrency.max(1))
      .collect()
      .await;

    // Release the slot
    let _ = handle.run(async { Ok(()) }).await;

    let mut report = WarmReport::default();
    for (sensor_id, outcome) in results {
      match outcome {
        Ok(_) => report.warmed += 1,
        Err(e) => report.failed.push((sensor_id, e.to_string())),
      }
    }
    info!(warmed = report.warmed, failed = report.failed.len(), "Prefetched readings");
    report
  }

  pub async fn delete_readings(&self, sensor_id: &str) -> Result<u64> {
    self.cache.delete_readings(sensor_id).await
  }

  pub async fn list_jobs(&self) -> Result<Vec<AnalysisJob>> {
    Ok(self.cache.remote().list_jobs().await?)
  }

  /// Submit a job and, if the poller runs, poll right away so it shows up.
  pub async fn create_job(&self, job: &NewAnalysisJob) -> Result<AnalysisJob> {
    let created = self.cache.remote().create_job(job).await?;
    info!(job = %created.analytics_id, sensor_id = %created.sensor_id, "Created analysis job");
    self.nudge_poller();
    Ok(created)
  }

  pub async fn delete_job(&self, analytics_id: &str) -> Result<bool> {
    let deleted = self.cache.remote().delete_job(analytics_id).await?;
    self.nudge_poller();
    Ok(deleted)
  }

  /// Start the job poller. A running poller is replaced by a fresh one.
  pub fn start_poller(&mut self) -> &mut JobPoller {
    if let Some(old) = self.poller.take() {
      old.stop();
    }
    self
      .poller
      .insert(JobPoller::start(Arc::clone(self.cache.remote()), self.poller_config))
  }

  pub fn poller(&self) -> Option<&JobPoller> {
    self.poller.as_ref()
  }

  pub fn stop_poller(&mut self) {
    if let Some(poller) = self.poller.take() {
      poller.stop();
    }
  }

  fn nudge_poller(&self) {
    if let Some(poller) = &self.poller {
      poller.poll_now();
    }
  }

  /// Tear down everything tied to the current user and wipe the store.
  ///
  /// Background refreshes still in flight are abandoned before the wipe, so
  /// none of them can write the previous user's data back.
  pub async fn logout(&mut self) {
    self.stop_poller();
    self.registry.cancel_all();
    match self.cache.clear().await {
      Ok(()) => info!("Cleared local store on logout"),
      Err(e) => warn!(error = %e, "Failed to clear local store on logout"),
    }
  }

  /// Let pending background refreshes land, then stop all other work and
  /// wait for the poller to exit.
  pub async fn close(mut self) {
    self.cache.wait_background().await;
    self.registry.cancel_all();
    if let Some(poller) = self.poller.take() {
      poller.shutdown().await;
    }
  }

  /// Clear the store without ending the session.
  pub async fn clear_cache(&self) -> Result<()> {
    self.cache.clear().await
  }
}

fn open_storage(cache: &CacheConfig) -> Arc<dyn CacheStorage> {
  if !cache.enabled {
    info!("Cache disabled, running network-only");
    return Arc::new(NoopStorage);
  }

  let opened = match &cache.path {
    Some(path) => SqliteStorage::open(path),
    None => SqliteStorage::open_default(),
  };

  match opened {
    Ok(storage) => Arc::new(storage.with_range_strategy(cache.range_strategy)),
    Err(e) => {
      warn!(error = %e, "Local store unavailable, running network-only");
      Arc::new(NoopStorage)
    }
  }
}

fn reconcile_identity(storage: &dyn CacheStorage, fingerprint: &str) {
  if !storage.is_available() {
    return;
  }

  match storage.identity_fingerprint() {
    Ok(Some(stored)) if stored == fingerprint => return,
    Ok(Some(_)) => info!("Identity changed, clearing local store"),
    Ok(None) => {}
    Err(e) => warn!(error = %e, "Could not read stored identity, clearing local store"),
  }

  let result = storage
    .clear_all()
    .and_then(|_| storage.set_identity_fingerprint(fingerprint));
  if let Err(e) = result {
    warn!(error = %e, "Failed to reset local store for identity");
  }
}

impl std::fmt::Debug for SyncSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncSession")
      .field("network_only", &self.is_network_only())
      .field("active_requests", &self.registry.active_count())
      .field("polling", &self.poller.is_some())
      .finish()
  }
}
