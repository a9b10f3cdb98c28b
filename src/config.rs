use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{RangeStrategy, StalePolicy};
use crate::poller::PollerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub poller: PollerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the sensor API, e.g. "https://api.example.com/v1"
  pub url: String,
  /// Account the token belongs to. A different identity than the one the
  /// local cache was filled for clears the cache on startup.
  pub identity: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Set to false to always go to the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub range_strategy: RangeStrategy,
  /// Treat cached data older than this as expired. Unset means cached data
  /// is served immediately and refreshed in the background.
  pub max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      range_strategy: RangeStrategy::default(),
      max_age_secs: None,
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerSettings {
  #[serde(default = "default_active_secs")]
  pub active_interval_secs: u64,
  #[serde(default = "default_regular_secs")]
  pub regular_interval_secs: u64,
}

impl Default for PollerSettings {
  fn default() -> Self {
    Self {
      active_interval_secs: default_active_secs(),
      regular_interval_secs: default_regular_secs(),
    }
  }
}

fn default_active_secs() -> u64 {
  5
}

fn default_regular_secs() -> u64 {
  30
}

impl CacheConfig {
  pub fn stale_policy(&self) -> Result<StalePolicy> {
    let Some(secs) = self.max_age_secs else {
      return Ok(StalePolicy::StaleWhileRevalidate);
    };
    i64::try_from(secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .map(StalePolicy::MaxAge)
      .ok_or_else(|| eyre!("cache.max_age_secs is out of range: {}", secs))
  }
}

impl PollerSettings {
  pub fn to_poller_config(&self) -> PollerConfig {
    PollerConfig {
      active_interval: Duration::from_secs(self.active_interval_secs.max(1)),
      regular_interval: Duration::from_secs(self.regular_interval_secs.max(1)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fleetsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fleetsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => Self::find_config_file(),
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fleetsync/config.yaml\n\
         See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fleetsync.yaml");
    if local.exists() {
      return Some(local);
    }

    dirs::config_dir()
      .map(|dir| dir.join("fleetsync").join("config.yaml"))
      .filter(|path| path.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .cache
      .stale_policy()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks FLEETSYNC_API_TOKEN first, then SENSOR_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("FLEETSYNC_API_TOKEN")
      .or_else(|_| std::env::var("SENSOR_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set FLEETSYNC_API_TOKEN or SENSOR_API_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://sensors.example.com/v1\n").unwrap();

    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.api.identity.is_none());
    assert!(config.cache.enabled);
    assert_eq!(config.cache.range_strategy, RangeStrategy::FilterInMemory);
    assert_eq!(config.cache.stale_policy().unwrap(), StalePolicy::StaleWhileRevalidate);
    assert_eq!(config.poller.to_poller_config(), PollerConfig::default());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: https://sensors.example.com/v1
  identity: ops@example.com
  timeout_secs: 10
cache:
  enabled: false
  path: /tmp/fleet.db
  range_strategy: index_scan
  max_age_secs: 120
poller:
  active_interval_secs: 2
  regular_interval_secs: 60
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.api.identity.as_deref(), Some("ops@example.com"));
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/fleet.db")));
    assert_eq!(config.cache.range_strategy, RangeStrategy::IndexScan);
    assert_eq!(
      config.cache.stale_policy().unwrap(),
      StalePolicy::MaxAge(chrono::Duration::seconds(120))
    );
    assert_eq!(
      config.poller.to_poller_config().active_interval,
      Duration::from_secs(2)
    );
  }

  #[test]
  fn test_zero_interval_is_clamped() {
    let settings = PollerSettings {
      active_interval_secs: 0,
      regular_interval_secs: 0,
    };
    assert_eq!(
      settings.to_poller_config().regular_interval,
      Duration::from_secs(1)
    );
  }

  #[test]
  fn test_out_of_range_max_age_is_rejected() {
    for secs in [u64::MAX, 10_000_000_000_000_000] {
      let cache = CacheConfig {
        max_age_secs: Some(secs),
        ..CacheConfig::default()
      };
      let err = cache.stale_policy().unwrap_err();
      assert!(err.to_string().contains("max_age_secs"), "{}", err);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsync.yaml");
    std::fs::write(
      &path,
      "api:\n  url: http://localhost:8080\ncache:\n  max_age_secs: 18446744073709551615\n",
    )
    .unwrap();
    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Invalid config file"), "{}", err);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsync.yaml");
    std::fs::write(&path, "api:\n  url: http://localhost:8080\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.api.url, "http://localhost:8080");

    std::fs::write(&path, "api: [not, a, map]\n").unwrap();
    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }
}
