//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::storage::{CacheStorage, Cached, WriteReport};
use super::traits::CacheResult;
use crate::error::{Result, SyncError};
use crate::remote::{ReadingRecord, RemoteService, SensorRecord};

/// When stored data may be served without waiting on the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
  /// Serve anything stored, refresh in the background. Stored data never expires.
  #[default]
  StaleWhileRevalidate,
  /// Stored data older than this is a miss; it is only served if the network fails.
  MaxAge(Duration),
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the remote service. Store
/// faults are logged and treated as misses; the only errors it returns are
/// remote failures with nothing cached, and cancellation.
///
/// Every write happens inside a scope. [`cancel_background`](Self::cancel_background)
/// ends the current scope: refreshes still running in it are abandoned and
/// nothing fetched under it reaches the store afterwards.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  remote: Arc<dyn RemoteService>,
  policy: StalePolicy,
  /// Keys with a background refresh in flight
  refreshing: Arc<Mutex<HashSet<String>>>,
  /// Parent of every token handed to a write path; replaced when canceled
  scope: Arc<Mutex<CancellationToken>>,
  background: TaskTracker,
  /// Serializes close/wait/reopen cycles on `background`
  draining: Arc<tokio::sync::Mutex<()>>,
}

impl CacheLayer {
  /// Create a new cache layer over the given store and remote service.
  pub fn new(storage: Arc<dyn CacheStorage>, remote: Arc<dyn RemoteService>) -> Self {
    Self {
      storage,
      remote,
      policy: StalePolicy::default(),
      refreshing: Arc::new(Mutex::new(HashSet::new())),
      scope: Arc::new(Mutex::new(CancellationToken::new())),
      background: TaskTracker::new(),
      draining: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  pub fn remote(&self) -> &Arc<dyn RemoteService> {
    &self.remote
  }

  /// Abandon every background refresh of the current scope and wait until
  /// none of them is running. Later refreshes start in a fresh scope.
  pub async fn cancel_background(&self) {
    let ended = {
      let mut scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::replace(&mut *scope, CancellationToken::new())
    };
    ended.cancel();
    self.wait_background().await;
  }

  /// Wait for the background refreshes in flight to finish.
  pub async fn wait_background(&self) {
    let _draining = self.draining.lock().await;
    self.background.close();
    self.background.wait().await;
    self.background.reopen();
  }

  /// Wipe the store once no background refresh can write into it anymore.
  pub async fn clear(&self) -> Result<()> {
    self.cancel_background().await;
    self.storage.clear_all()
  }

  fn scope_token(&self) -> CancellationToken {
    self
      .scope
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .child_token()
  }

  fn is_stale(&self, cached_at: Option<DateTime<Utc>>) -> bool {
    match self.policy {
      StalePolicy::StaleWhileRevalidate => false,
      StalePolicy::MaxAge(max_age) => cached_at.map_or(true, |at| Utc::now() - at > max_age),
    }
  }

  /// Fetch the sensor list with a cache-first strategy.
  ///
  /// 1. No store - go straight to the network
  /// 2. Stored and acceptable - return it, refresh in the background
  /// 3. Stored but stale - fetch, falling back to the stale copy (offline mode)
  /// 4. Nothing stored - fetch, populate, return
  pub async fn fetch_sensor_list(&self) -> Result<CacheResult<Vec<SensorRecord>>> {
    if !self.storage.is_available() {
      let fresh = self.remote.list_sensors().await?;
      return Ok(CacheResult::from_network(fresh));
    }

    let scope = self.scope_token();
    let cached = self.read_or_miss("sensors", || self.storage.get_all_sensors());

    if cached.is_empty() {
      debug!("Sensor cache miss");
      let fresh = self.remote.list_sensors().await?;
      self.store_sensors(&fresh, &scope)?;
      return Ok(CacheResult::from_network(fresh));
    }

    if !self.is_stale(cached.cached_at) {
      debug!(count = cached.records.len(), "Sensor cache hit");
      self.spawn_sensor_refresh();
      return Ok(CacheResult::from_cache(cached.records, cached.cached_at));
    }

    match self.remote.list_sensors().await {
      Ok(fresh) => {
        self.store_sensors(&fresh, &scope)?;
        Ok(CacheResult::from_network(fresh))
      }
      Err(e) => {
        warn!(error = %e, "Sensor refresh failed, serving stale cache");
        Ok(CacheResult::offline(cached.records, cached.cached_at))
      }
    }
  }

  /// Fetch one sensor's readings, optionally bounded to `[start, end]`.
  ///
  /// Same strategy as [`fetch_sensor_list`](Self::fetch_sensor_list). Once
  /// `cancel` fires, or the layer's scope is canceled, the call resolves to
  /// [`SyncError::Canceled`] and nothing it fetched is written to the store.
  pub async fn fetch_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
  ) -> Result<CacheResult<Vec<ReadingRecord>>> {
    if cancel.is_cancelled() {
      return Err(SyncError::Canceled);
    }

    if !self.storage.is_available() {
      let fresh = self.remote_readings(sensor_id, start, end, cancel).await?;
      return Ok(CacheResult::from_network(fresh));
    }

    let scope = self.scope_token();
    let cached = self.read_or_miss("readings", || self.storage.get_readings(sensor_id, start, end));

    if cached.is_empty() {
      debug!(sensor_id, "Readings cache miss");
      let fresh = self.remote_readings(sensor_id, start, end, cancel).await?;
      self.store_readings(sensor_id, &fresh, cancel, &scope)?;
      return Ok(CacheResult::from_network(fresh));
    }

    if !self.is_stale(cached.cached_at) {
      debug!(sensor_id, count = cached.records.len(), "Readings cache hit");
      self.spawn_readings_refresh(sensor_id, start, end, cancel.clone());
      return Ok(CacheResult::from_cache(cached.records, cached.cached_at));
    }

    match self.remote_readings(sensor_id, start, end, cancel).await {
      Ok(fresh) => {
        self.store_readings(sensor_id, &fresh, cancel, &scope)?;
        Ok(CacheResult::from_network(fresh))
      }
      Err(SyncError::Canceled) => Err(SyncError::Canceled),
      Err(e) => {
        warn!(sensor_id, error = %e, "Readings refresh failed, serving stale cache");
        Ok(CacheResult::offline(cached.records, cached.cached_at))
      }
    }
  }

  /// Network-first sensor refresh that overwrites the store.
  pub async fn refresh_sensors(&self) -> Result<Vec<SensorRecord>> {
    self.refresh_sensors_in(&self.scope_token()).await
  }

  async fn refresh_sensors_in(&self, scope: &CancellationToken) -> Result<Vec<SensorRecord>> {
    let fresh = tokio::select! {
      biased;
      _ = scope.cancelled() => return Err(SyncError::Canceled),
      result = self.remote.list_sensors() => result?,
    };
    self.store_sensors(&fresh, scope)?;
    Ok(fresh)
  }

  /// Network-first readings refresh that overwrites the store.
  pub async fn refresh_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
  ) -> Result<Vec<ReadingRecord>> {
    self
      .refresh_readings_in(sensor_id, start, end, cancel, &self.scope_token())
      .await
  }

  async fn refresh_readings_in(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
    scope: &CancellationToken,
  ) -> Result<Vec<ReadingRecord>> {
    let fresh = tokio::select! {
      biased;
      _ = scope.cancelled() => return Err(SyncError::Canceled),
      result = self.remote_readings(sensor_id, start, end, cancel) => result?,
    };
    self.store_readings(sensor_id, &fresh, cancel, scope)?;
    Ok(fresh)
  }

  /// Delete a sensor's readings remotely, then drop the local copies.
  pub async fn delete_readings(&self, sensor_id: &str) -> Result<u64> {
    let deleted = self.remote.delete_readings(sensor_id).await?;
    if let Err(e) = self.storage.delete_readings(sensor_id) {
      warn!(sensor_id, error = %e, "Failed to drop cached readings");
    }
    Ok(deleted)
  }

  /// Race the remote call against cancellation.
  async fn remote_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
  ) -> Result<Vec<ReadingRecord>> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(SyncError::Canceled),
      result = self.remote.get_readings(sensor_id, start, end) => Ok(result?),
    }
  }

  fn read_or_miss<T>(&self, family: &str, read: impl FnOnce() -> Result<Cached<T>>) -> Cached<T> {
    match read() {
      Ok(cached) => cached,
      Err(e) => {
        warn!(family, error = %e, "Cache read failed, treating as miss");
        Cached::empty()
      }
    }
  }

  /// Write unless the scope ended in the meantime.
  fn store_sensors(&self, records: &[SensorRecord], scope: &CancellationToken) -> Result<()> {
    if scope.is_cancelled() {
      debug!("Scope ended, discarding fetched sensors");
      return Err(SyncError::Canceled);
    }
    log_write("sensors", self.storage.upsert_sensors(records));
    Ok(())
  }

  /// Write unless the request was canceled or the scope ended in the meantime.
  fn store_readings(
    &self,
    sensor_id: &str,
    records: &[ReadingRecord],
    cancel: &CancellationToken,
    scope: &CancellationToken,
  ) -> Result<()> {
    if cancel.is_cancelled() || scope.is_cancelled() {
      return Err(SyncError::Canceled);
    }
    log_write("readings", self.storage.upsert_readings(sensor_id, records));
    Ok(())
  }

  fn spawn_sensor_refresh(&self) {
    let Some(claim) = self.claim("sensors".to_string()) else {
      return;
    };
    let layer = self.clone();
    let scope = self.scope_token();
    self.background.spawn(async move {
      let _claim = claim;
      match layer.refresh_sensors_in(&scope).await {
        Ok(_) | Err(SyncError::Canceled) => {}
        Err(e) => warn!(error = %e, "Background sensor refresh failed"),
      }
    });
  }

  fn spawn_readings_refresh(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    cancel: CancellationToken,
  ) {
    let key = format!("readings:{}:{:?}:{:?}", sensor_id, start, end);
    let Some(claim) = self.claim(key) else {
      return;
    };
    let layer = self.clone();
    let sensor_id = sensor_id.to_string();
    let scope = self.scope_token();
    self.background.spawn(async move {
      let _claim = claim;
      match layer
        .refresh_readings_in(&sensor_id, start, end, &cancel, &scope)
        .await
      {
        Ok(_) | Err(SyncError::Canceled) => {}
        Err(e) => warn!(%sensor_id, error = %e, "Background readings refresh failed"),
      }
    });
  }

  /// Reserve a refresh slot; `None` if one is already running for `key`.
  fn claim(&self, key: String) -> Option<RefreshClaim> {
    let mut refreshing = self.refreshing.lock().ok()?;
    if !refreshing.insert(key.clone()) {
      debug!(%key, "Refresh already in flight");
      return None;
    }
    Some(RefreshClaim {
      refreshing: Arc::clone(&self.refreshing),
      key,
    })
  }
}

/// Releases a refresh slot when the refresh task ends.
struct RefreshClaim {
  refreshing: Arc<Mutex<HashSet<String>>>,
  key: String,
}

impl Drop for RefreshClaim {
  fn drop(&mut self) {
    if let Ok(mut refreshing) = self.refreshing.lock() {
      refreshing.remove(&self.key);
    }
  }
}

fn log_write(family: &str, outcome: Result<WriteReport>) {
  match outcome {
    Ok(report) if !report.is_complete() => {
      for (key, reason) in &report.failed {
        warn!(family, %key, %reason, "Record not cached");
      }
    }
    Ok(_) => {}
    Err(e) => warn!(family, error = %e, "Failed to populate cache"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, NoopStorage, SqliteStorage};
  use crate::test_support::{at, reading, sensor, MockRemote};
  use std::sync::atomic::Ordering;
  use std::time::Duration as StdDuration;

  /// Store whose every operation fails.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn upsert_sensors(&self, _records: &[SensorRecord]) -> Result<WriteReport> {
      Err(SyncError::CacheWrite("disk full".into()))
    }
    fn get_all_sensors(&self) -> Result<Cached<SensorRecord>> {
      Err(SyncError::CacheRead("corrupt page".into()))
    }
    fn upsert_readings(&self, _id: &str, _records: &[ReadingRecord]) -> Result<WriteReport> {
      Err(SyncError::CacheWrite("disk full".into()))
    }
    fn get_readings(
      &self,
      _id: &str,
      _start: Option<DateTime<Utc>>,
      _end: Option<DateTime<Utc>>,
    ) -> Result<Cached<ReadingRecord>> {
      Err(SyncError::CacheRead("corrupt page".into()))
    }
    fn delete_readings(&self, _id: &str) -> Result<usize> {
      Err(SyncError::CacheWrite("disk full".into()))
    }
    fn clear_all(&self) -> Result<()> {
      Err(SyncError::CacheWrite("disk full".into()))
    }
    fn identity_fingerprint(&self) -> Result<Option<String>> {
      Err(SyncError::CacheRead("corrupt page".into()))
    }
    fn set_identity_fingerprint(&self, _fingerprint: &str) -> Result<()> {
      Err(SyncError::CacheWrite("disk full".into()))
    }
  }

  fn layer_with(remote: Arc<MockRemote>) -> (CacheLayer, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let layer = CacheLayer::new(storage.clone(), remote);
    (layer, storage)
  }

  #[tokio::test]
  async fn test_readings_miss_populates_store_for_offline_reads() {
    let readings = vec![reading(100, 1.0), reading(200, 2.0), reading(300, 3.0)];
    let remote = Arc::new(MockRemote::new().with_readings("s-1", readings));
    let (layer, _storage) = layer_with(remote.clone());
    let token = CancellationToken::new();

    let first = layer.fetch_readings("s-1", None, None, &token).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.len(), 3);

    remote.set_offline(true);
    let second = layer.fetch_readings("s-1", None, None, &token).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.len(), 3);
    assert_eq!(second.data[0].sensor_id.as_deref(), Some("s-1"));
  }

  #[tokio::test]
  async fn test_ranged_readings_served_from_store() {
    let remote = Arc::new(MockRemote::new());
    let (layer, storage) = layer_with(remote.clone());
    storage
      .upsert_readings("s-1", &[reading(100, 1.0), reading(200, 2.0), reading(300, 3.0)])
      .unwrap();

    let result = layer
      .fetch_readings("s-1", Some(at(100)), Some(at(200)), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    let stamps: Vec<i64> = result.data.iter().map(|r| r.timestamp.timestamp()).collect();
    assert_eq!(stamps, vec![100, 200]);
  }

  #[tokio::test]
  async fn test_sensor_hit_returns_cached_then_refreshes() {
    let remote = Arc::new(MockRemote::new().with_sensors(vec![sensor("s-1")]));
    let (layer, storage) = layer_with(remote.clone());

    let mut old = sensor("s-1");
    old.name = "Before rename".to_string();
    storage.upsert_sensors(&[old]).unwrap();

    let result = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data[0].name, "Before rename");

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(remote.sensor_calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.get_all_sensors().unwrap().records[0].name, "Sensor s-1");
  }

  #[tokio::test]
  async fn test_sensor_miss_blocks_on_network() {
    let remote = Arc::new(MockRemote::new().with_sensors(vec![sensor("a"), sensor("b")]));
    let (layer, storage) = layer_with(remote);

    let result = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.len(), 2);
    assert_eq!(storage.get_all_sensors().unwrap().records.len(), 2);
  }

  #[tokio::test]
  async fn test_network_failure_with_empty_store_is_an_error() {
    let remote = Arc::new(MockRemote::new());
    remote.set_offline(true);
    let (layer, _storage) = layer_with(remote);

    let err = layer.fetch_sensor_list().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
  }

  #[tokio::test]
  async fn test_store_faults_never_fail_reads() {
    let remote = Arc::new(
      MockRemote::new()
        .with_sensors(vec![sensor("s-1")])
        .with_readings("s-1", vec![reading(1, 1.0)]),
    );
    let layer = CacheLayer::new(Arc::new(BrokenStorage), remote);

    let sensors = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(sensors.data.len(), 1);

    let readings = layer
      .fetch_readings("s-1", None, None, &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(readings.data.len(), 1);
  }

  #[tokio::test]
  async fn test_network_only_mode_skips_store() {
    let remote = Arc::new(MockRemote::new().with_sensors(vec![sensor("s-1")]));
    let layer = CacheLayer::new(Arc::new(NoopStorage), remote.clone());

    layer.fetch_sensor_list().await.unwrap();
    let second = layer.fetch_sensor_list().await.unwrap();

    assert_eq!(second.source, CacheSource::Network);
    assert_eq!(remote.sensor_calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_max_age_serves_stale_copy_when_offline() {
    let remote = Arc::new(MockRemote::new().with_sensors(vec![sensor("s-1")]));
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.upsert_sensors(&[sensor("cached")]).unwrap();
    let layer = CacheLayer::new(storage, remote.clone())
      .with_stale_policy(StalePolicy::MaxAge(Duration::zero()));

    tokio::time::sleep(StdDuration::from_millis(5)).await;

    remote.set_offline(true);
    let offline = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data[0].sensor_id, "cached");

    remote.set_offline(false);
    let online = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(online.source, CacheSource::Network);
    assert_eq!(online.data[0].sensor_id, "s-1");
  }

  #[tokio::test]
  async fn test_canceled_fetch_writes_nothing() {
    let remote = Arc::new(
      MockRemote::new()
        .with_readings("s-1", vec![reading(1, 1.0)])
        .with_reading_delay("s-1", StdDuration::from_millis(50)),
    );
    let (layer, storage) = layer_with(remote);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(StdDuration::from_millis(10)).await;
      canceller.cancel();
    });

    let err = layer
      .fetch_readings("s-1", None, None, &token)
      .await
      .unwrap_err();
    assert!(err.is_canceled());

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert!(storage.get_readings("s-1", None, None).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_precanceled_fetch_never_hits_network() {
    let remote = Arc::new(MockRemote::new());
    let (layer, _storage) = layer_with(remote.clone());
    let token = CancellationToken::new();
    token.cancel();

    let err = layer
      .fetch_readings("s-1", None, None, &token)
      .await
      .unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(remote.reading_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_delete_readings_clears_local_copy() {
    let remote = Arc::new(MockRemote::new().with_readings("s-1", vec![reading(1, 1.0)]));
    let (layer, storage) = layer_with(remote);
    storage.upsert_readings("s-1", &[reading(1, 1.0)]).unwrap();

    assert_eq!(layer.delete_readings("s-1").await.unwrap(), 1);
    assert!(storage.get_readings("s-1", None, None).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_hits_share_one_background_refresh() {
    let remote = Arc::new(
      MockRemote::new()
        .with_readings("s-1", vec![reading(1, 1.0)])
        .with_reading_delay("s-1", StdDuration::from_millis(30)),
    );
    let (layer, storage) = layer_with(remote.clone());
    storage.upsert_readings("s-1", &[reading(1, 0.5)]).unwrap();
    let token = CancellationToken::new();

    for _ in 0..3 {
      let hit = layer.fetch_readings("s-1", None, None, &token).await.unwrap();
      assert_eq!(hit.source, CacheSource::Cache);
    }

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert_eq!(remote.reading_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_wait_background_returns_after_refresh_lands() {
    let remote = Arc::new(MockRemote::new().with_sensors(vec![sensor("s-1")]));
    let (layer, storage) = layer_with(remote.clone());
    let mut old = sensor("s-1");
    old.name = "Before rename".to_string();
    storage.upsert_sensors(&[old]).unwrap();

    let hit = layer.fetch_sensor_list().await.unwrap();
    assert_eq!(hit.source, CacheSource::Cache);

    layer.wait_background().await;
    assert_eq!(remote.sensor_calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.get_all_sensors().unwrap().records[0].name, "Sensor s-1");
  }

  #[tokio::test]
  async fn test_clear_discards_refresh_in_flight() {
    let remote = Arc::new(
      MockRemote::new()
        .with_readings("s-1", vec![reading(2, 2.0)])
        .with_reading_delay("s-1", StdDuration::from_millis(30)),
    );
    let (layer, storage) = layer_with(remote.clone());
    storage.upsert_readings("s-1", &[reading(1, 0.5)]).unwrap();
    let token = CancellationToken::new();

    let hit = layer.fetch_readings("s-1", None, None, &token).await.unwrap();
    assert_eq!(hit.source, CacheSource::Cache);

    layer.clear().await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert!(storage.get_readings("s-1", None, None).unwrap().is_empty());
    assert!(!token.is_cancelled());

    // The next hit refreshes in a fresh scope
    storage.upsert_readings("s-1", &[reading(1, 0.5)]).unwrap();
    layer.fetch_readings("s-1", None, None, &token).await.unwrap();
    layer.wait_background().await;
    let stamps: Vec<i64> = storage
      .get_readings("s-1", None, None)
      .unwrap()
      .records
      .iter()
      .map(|r| r.timestamp.timestamp())
      .collect();
    assert_eq!(stamps, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_ended_scope_blocks_foreground_write() {
    let remote = Arc::new(
      MockRemote::new()
        .with_readings("s-1", vec![reading(1, 1.0)])
        .with_reading_delay("s-1", StdDuration::from_millis(30)),
    );
    let (layer, storage) = layer_with(remote);

    let canceller = layer.clone();
    tokio::spawn(async move {
      tokio::time::sleep(StdDuration::from_millis(10)).await;
      canceller.cancel_background().await;
    });

    let err = layer
      .fetch_readings("s-1", None, None, &CancellationToken::new())
      .await
      .unwrap_err();
    assert!(err.is_canceled());
    assert!(storage.get_readings("s-1", None, None).unwrap().is_empty());
  }
}
