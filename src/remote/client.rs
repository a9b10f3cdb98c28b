use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::remote::api_types::{
  readings_query, ApiDeleteJobResponse, ApiDeleteReadingsResponse, ApiErrorBody, ApiItem, ApiList,
};
use crate::remote::types::{AnalysisJob, NewAnalysisJob, ReadingRecord, SensorRecord};

/// Error type for remote API operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  /// The service could not be reached at all.
  #[error("Service not reachable at {url}: {source}")]
  NotReachable {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// HTTP request failed after the connection was made.
  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  /// Base URL or path could not be turned into a URL.
  #[error("Invalid URL: {0}")]
  InvalidUrl(String),

  /// API returned an error response.
  #[error("API error ({status}): {message}")]
  Api { status: u16, message: String },

  /// Response body did not match the expected shape.
  #[error("Failed to decode response: {0}")]
  Decode(String),
}

/// Remote data service the cache sits in front of.
///
/// The HTTP implementation is [`HttpRemote`]; tests swap in an in-memory one.
#[async_trait]
pub trait RemoteService: Send + Sync {
  async fn list_sensors(&self) -> Result<Vec<SensorRecord>, RemoteError>;

  async fn get_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Vec<ReadingRecord>, RemoteError>;

  /// Returns the number of deleted readings.
  async fn delete_readings(&self, sensor_id: &str) -> Result<u64, RemoteError>;

  async fn list_jobs(&self) -> Result<Vec<AnalysisJob>, RemoteError>;

  async fn create_job(&self, job: &NewAnalysisJob) -> Result<AnalysisJob, RemoteError>;

  async fn delete_job(&self, analytics_id: &str) -> Result<bool, RemoteError>;
}

/// reqwest-backed client for the sensor API
#[derive(Debug, Clone)]
pub struct HttpRemote {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self, RemoteError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(RemoteError::Request)?;
    Self::with_client(&config.url, client, token)
  }

  /// Create a client with a custom reqwest Client.
  pub fn with_client(base_url: &str, client: Client, token: Option<String>) -> Result<Self, RemoteError> {
    // Trailing slash so that joins append instead of replacing the last segment
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized)
      .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", base_url, e)))?;

    if !matches!(base_url.scheme(), "http" | "https") {
      return Err(RemoteError::InvalidUrl(format!(
        "URL must use http or https, got: {}",
        base_url
      )));
    }

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base_url
      .join(path)
      .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", path, e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
    let response = builder.send().await.map_err(|e| {
      if e.is_connect() {
        RemoteError::NotReachable {
          url: self.base_url.to_string(),
          source: e,
        }
      } else {
        RemoteError::Request(e)
      }
    })?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
      .map(|b| b.message)
      .unwrap_or_else(|_| {
        if body.is_empty() {
          status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
          body
        }
      });

    Err(RemoteError::Api {
      status: status.as_u16(),
      message,
    })
  }

  async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
  }
}

#[async_trait]
impl RemoteService for HttpRemote {
  async fn list_sensors(&self) -> Result<Vec<SensorRecord>, RemoteError> {
    let url = self.endpoint("sensors")?;
    let response = self.send(self.request(Method::GET, url)).await?;
    let list: ApiList<SensorRecord> = Self::decode(response).await?;
    Ok(list.into_vec())
  }

  async fn get_readings(
    &self,
    sensor_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Vec<ReadingRecord>, RemoteError> {
    let url = self.endpoint("readings")?;
    let builder = self
      .request(Method::GET, url)
      .query(&readings_query(sensor_id, start, end));
    let response = self.send(builder).await?;
    let list: ApiList<ReadingRecord> = Self::decode(response).await?;
    Ok(list.into_vec())
  }

  async fn delete_readings(&self, sensor_id: &str) -> Result<u64, RemoteError> {
    let url = self.endpoint("readings")?;
    let builder = self
      .request(Method::DELETE, url)
      .query(&[("sensor_id", sensor_id)]);
    let response = self.send(builder).await?;
    let body: ApiDeleteReadingsResponse = Self::decode(response).await?;
    Ok(body.deleted)
  }

  async fn list_jobs(&self) -> Result<Vec<AnalysisJob>, RemoteError> {
    let url = self.endpoint("analytics")?;
    let response = self.send(self.request(Method::GET, url)).await?;
    let list: ApiList<AnalysisJob> = Self::decode(response).await?;
    Ok(list.into_vec())
  }

  async fn create_job(&self, job: &NewAnalysisJob) -> Result<AnalysisJob, RemoteError> {
    let url = self.endpoint("analytics")?;
    let response = self.send(self.request(Method::POST, url).json(job)).await?;
    let item: ApiItem<AnalysisJob> = Self::decode(response).await?;
    Ok(item.into_inner())
  }

  async fn delete_job(&self, analytics_id: &str) -> Result<bool, RemoteError> {
    let mut url = self.endpoint("analytics")?;
    url
      .path_segments_mut()
      .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
      .pop_if_empty()
      .push(analytics_id);
    let response = self.send(self.request(Method::DELETE, url)).await?;
    let body: ApiDeleteJobResponse = Self::decode(response).await?;
    Ok(body.success)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn remote(url: &str) -> Result<HttpRemote, RemoteError> {
    HttpRemote::with_client(url, Client::new(), None)
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let client = remote("https://api.example.com/v2").unwrap();
    assert_eq!(
      client.endpoint("sensors").unwrap().as_str(),
      "https://api.example.com/v2/sensors"
    );

    let client = remote("https://api.example.com/v2/").unwrap();
    assert_eq!(
      client.endpoint("analytics").unwrap().as_str(),
      "https://api.example.com/v2/analytics"
    );
  }

  #[test]
  fn test_rejects_non_http_urls() {
    assert!(matches!(
      remote("ftp://example.com"),
      Err(RemoteError::InvalidUrl(_))
    ));
    assert!(matches!(remote("not a url"), Err(RemoteError::InvalidUrl(_))));
  }
}
