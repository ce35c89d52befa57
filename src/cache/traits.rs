//! Core types and backend interfaces for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Header injected into every stored response carrying its expiry instant.
pub const EXPIRES_HEADER: &str = "x-tiercache-expires";

/// One cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  /// Bounded in-process store
  Memory,
  /// Persistent structured key-value store
  Durable,
  /// URL-keyed store of full response payloads
  Response,
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Tier::Memory => "memory",
      Tier::Durable => "durable",
      Tier::Response => "response",
    };
    f.write_str(name)
  }
}

/// A successful lookup, including which tier served it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
  /// The cached value
  pub value: T,
  /// The tier the value was found in
  pub source: Tier,
}

/// A record as held by a durable key-value backend.
#[derive(Debug, Clone, PartialEq)]
pub struct KvRecord {
  pub key: String,
  pub value: Value,
  pub expires_at: DateTime<Utc>,
}

/// A full response payload as held by the response tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  /// Header names are stored lowercase
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
    let headers = headers
      .into_iter()
      .map(|(name, value)| (name.to_ascii_lowercase(), value))
      .collect();
    Self {
      status,
      headers,
      body,
    }
  }

  /// Wrap a JSON value in a synthetic `200 OK` response.
  pub fn json(value: &Value) -> Result<Self> {
    let body =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize response body: {}", e))?;
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Ok(Self::new(200, headers, body))
  }

  /// Capture a network response, consuming its body.
  ///
  /// Fails if any header value is not valid UTF-8.
  pub async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      let value = value
        .to_str()
        .map_err(|e| eyre!("Malformed header {}: {}", name, e))?;
      headers.insert(name.as_str().to_string(), value.to_string());
    }
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?;
    Ok(Self::new(status, headers, body.to_vec()))
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Parse the body as JSON.
  pub fn payload(&self) -> Result<Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }

  /// The injected expiry marker, if present and well-formed.
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    let raw = self.header(EXPIRES_HEADER)?;
    DateTime::parse_from_rfc3339(raw)
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// Whether the response is past its expiry marker at `now`. A response
  /// without a readable marker is always expired.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at().map_or(true, |expires_at| now >= expires_at)
  }

  /// Copy of this response carrying an expiry marker.
  pub fn with_expiry(&self, expires_at: DateTime<Utc>) -> Self {
    let mut stored = self.clone();
    stored.headers.insert(
      EXPIRES_HEADER.to_string(),
      expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    stored
  }
}

/// Opens namespaced key-value handles.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn KeyValueStore>>;
}

/// A namespaced structured key-value store.
///
/// Implementations must make a single `put` atomic; no other coordination is expected.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<KvRecord>>;

  /// Insert or fully replace the record for `record.key`.
  async fn put(&self, record: KvRecord) -> Result<()>;

  async fn delete(&self, key: &str) -> Result<()>;

  /// Delete `key` only if its stored expiry is at or before `now`.
  ///
  /// Returns whether a record was removed.
  async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

  async fn clear(&self) -> Result<()>;

  /// Every record in the namespace.
  async fn scan_all(&self) -> Result<Vec<KvRecord>>;
}

/// Opens namespaced response caches.
#[async_trait]
pub trait ResponseBackend: Send + Sync {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn ResponseCache>>;
}

/// A namespaced store of responses keyed by URL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
  async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>>;

  async fn put(&self, url: &str, response: CachedResponse) -> Result<()>;

  async fn delete(&self, url: &str) -> Result<()>;

  /// Delete `url` only if the stored response is expired at `now` (see
  /// [`CachedResponse::is_expired_at`]). Returns whether a response was removed.
  async fn delete_expired(&self, url: &str, now: DateTime<Utc>) -> Result<bool>;

  async fn clear(&self) -> Result<()>;

  /// Every stored URL.
  async fn urls(&self) -> Result<Vec<String>>;
}

/// Whether `key` names a fetched network resource.
pub fn is_url_key(key: &str) -> bool {
  url::Url::parse(key)
    .map(|url| matches!(url.scheme(), "http" | "https"))
    .unwrap_or(false)
}
