//! URL-keyed tier holding full response payloads.
//!
//! Every stored response carries an [`EXPIRES_HEADER`](super::traits::EXPIRES_HEADER) marker; a response
//! without a readable marker is treated as expired. Failure handling matches
//! the durable tier: errors are logged and degrade to misses.

use color_eyre::Result;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::clock::{expiry_after, Clock};
use super::intercept::ResponseInterceptor;
use super::traits::{CachedResponse, ResponseBackend, ResponseCache};

pub struct ResponseStore {
  backend: Arc<dyn ResponseBackend>,
  namespace: String,
  enabled: bool,
  clock: Arc<dyn Clock>,
  handle: OnceCell<Option<Arc<dyn ResponseCache>>>,
  interceptor: OnceLock<Arc<ResponseInterceptor>>,
}

impl ResponseStore {
  pub fn new(
    backend: Arc<dyn ResponseBackend>,
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
      interceptor: OnceLock::new(),
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  async fn handle(&self) -> Option<Arc<dyn ResponseCache>> {
    if !self.enabled {
      return None;
    }
    self
      .handle
      .get_or_init(|| async {
        match self.backend.open(&self.namespace).await {
          Ok(handle) => Some(handle),
          Err(e) => {
            warn!(namespace = %self.namespace, "response tier unavailable: {:#}", e);
            None
          }
        }
      })
      .await
      .clone()
  }

  /// Fetch a live response, exactly as stored (including the expiry marker).
  pub async fn get(&self, url: &str) -> Option<CachedResponse> {
    let handle = self.handle().await?;
    let response = log_failure("lookup", url, handle.lookup(url).await)??;

    let now = self.clock.now();
    if response.is_expired_at(now) {
      debug!(url, "cached response expired on read");
      log_failure("delete", url, handle.delete_expired(url, now).await);
      return None;
    }
    Some(response)
  }

  /// Store a copy of `response` with an expiry marker of `now + ttl`.
  /// The caller keeps the original.
  pub async fn set(&self, url: &str, response: &CachedResponse, ttl: Duration) {
    let Some(handle) = self.handle().await else {
      return;
    };
    let stored = response.with_expiry(expiry_after(self.clock.now(), ttl));
    log_failure("put", url, handle.put(url, stored).await);
  }

  pub async fn delete(&self, url: &str) {
    if let Some(handle) = self.handle().await {
      log_failure("delete", url, handle.delete(url).await);
    }
  }

  pub async fn clear(&self) {
    if let Some(handle) = self.handle().await {
      log_failure("clear", &self.namespace, handle.clear().await);
    }
  }

  /// Delete every expired or unmarked response. Returns how many were removed.
  ///
  /// Deletion re-checks expiry in the backend, so a response stored after
  /// the scan survives.
  pub async fn sweep(&self) -> usize {
    let Some(handle) = self.handle().await else {
      return 0;
    };
    let Some(urls) = log_failure("scan", &self.namespace, handle.urls().await) else {
      return 0;
    };

    let now = self.clock.now();
    let mut removed = 0;
    for url in urls {
      if let Some(true) = log_failure("delete", &url, handle.delete_expired(&url, now).await) {
        removed += 1;
      }
    }
    removed
  }

  /// Register the background intercept worker. Only the first call creates
  /// it; later calls return the same worker and ignore their arguments.
  pub fn register_interceptor(
    self: &Arc<Self>,
    client: reqwest::Client,
    ttl: Duration,
  ) -> Arc<ResponseInterceptor> {
    Arc::clone(self.interceptor.get_or_init(|| {
      info!(namespace = %self.namespace, "registered response interceptor");
      Arc::new(ResponseInterceptor::new(Arc::downgrade(self), client, ttl))
    }))
  }
}

fn log_failure<T>(op: &str, url: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(op, url, "response tier operation failed: {:#}", e);
      None
    }
  }
}
