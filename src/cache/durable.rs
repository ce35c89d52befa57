//! Persistent structured tier.
//!
//! Backend failures never escape this module: they are logged and the
//! operation degrades to a miss or a no-op. A backend that cannot be opened
//! turns the whole tier into a permanent no-op.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::clock::{expiry_after, Clock};
use super::traits::{KeyValueBackend, KeyValueStore, KvRecord};

pub struct DurableStore {
  backend: Arc<dyn KeyValueBackend>,
  namespace: String,
  enabled: bool,
  clock: Arc<dyn Clock>,
  /// Result of the single open attempt; `None` once the backend proved unavailable
  handle: OnceCell<Option<Arc<dyn KeyValueStore>>>,
}

impl DurableStore {
  pub fn new(
    backend: Arc<dyn KeyValueBackend>,
    namespace: impl Into<String>,
    enabled: bool,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      backend,
      namespace: namespace.into(),
      enabled,
      clock,
      handle: OnceCell::new(),
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Open the backend on first use. Concurrent callers wait on the same open.
  async fn handle(&self) -> Option<Arc<dyn KeyValueStore>> {
    if !self.enabled {
      return None;
    }
    self
      .handle
      .get_or_init(|| async {
        match self.backend.open(&self.namespace).await {
          Ok(handle) => Some(handle),
          Err(e) => {
            warn!(namespace = %self.namespace, "durable tier unavailable: {:#}", e);
            None
          }
        }
      })
      .await
      .clone()
  }

  /// Fetch a live record. An expired record is deleted (unless rewritten in
  /// the meantime) and reported as a miss.
  pub async fn get(&self, key: &str) -> Option<KvRecord> {
    let handle = self.handle().await?;
    let record = log_failure("get", key, handle.get(key).await)??;

    let now = self.clock.now();
    if now >= record.expires_at {
      debug!(key, "durable entry expired on read");
      log_failure("delete", key, handle.delete_expired(key, now).await);
      return None;
    }
    Some(record)
  }

  pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
    let Some(handle) = self.handle().await else {
      return;
    };
    let record = KvRecord {
      key: key.to_string(),
      value,
      expires_at: expiry_after(self.clock.now(), ttl),
    };
    log_failure("put", key, handle.put(record).await);
  }

  pub async fn delete(&self, key: &str) {
    if let Some(handle) = self.handle().await {
      log_failure("delete", key, handle.delete(key).await);
    }
  }

  pub async fn clear(&self) {
    if let Some(handle) = self.handle().await {
      log_failure("clear", &self.namespace, handle.clear().await);
    }
  }

  /// Scan every record and delete the expired ones. Returns how many were removed.
  ///
  /// Deletion re-checks expiry in the backend, so a record refreshed after
  /// the scan survives.
  pub async fn sweep(&self) -> usize {
    let Some(handle) = self.handle().await else {
      return 0;
    };
    let Some(records) = log_failure("scan", &self.namespace, handle.scan_all().await) else {
      return 0;
    };

    let now = self.clock.now();
    let mut removed = 0;
    for record in records.iter().filter(|r| now >= r.expires_at) {
      if let Some(true) = log_failure(
        "delete",
        &record.key,
        handle.delete_expired(&record.key, now).await,
      ) {
        removed += 1;
      }
    }
    removed
  }
}

fn log_failure<T>(op: &str, key: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(op, key, "durable tier operation failed: {:#}", e);
      None
    }
  }
}
