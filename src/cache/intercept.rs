//! Background intercept worker: answers GET requests from the response tier
//! without going through the coordinator.

use color_eyre::{eyre::eyre, Result};
use std::sync::Weak;
use std::time::Duration;
use tracing::debug;

use super::response::ResponseStore;
use super::traits::{is_url_key, CachedResponse};

/// Serves fresh cached responses and fetches (then caches) everything else.
///
/// Created through [`ResponseStore::register_interceptor`]. Holds only a weak
/// reference to its store; once the store is gone every request goes to the
/// network.
pub struct ResponseInterceptor {
  store: Weak<ResponseStore>,
  client: reqwest::Client,
  ttl: Duration,
}

impl ResponseInterceptor {
  pub(super) fn new(store: Weak<ResponseStore>, client: reqwest::Client, ttl: Duration) -> Self {
    Self { store, client, ttl }
  }

  /// Whether this worker would answer a request for `url`.
  pub fn matches(&self, url: &str) -> bool {
    is_url_key(url)
  }

  /// GET `url`, preferring a live cached copy.
  pub async fn fetch(&self, url: &str) -> Result<CachedResponse> {
    if !self.matches(url) {
      return Err(eyre!("Not an http(s) URL: {}", url));
    }

    let store = self.store.upgrade();
    if let Some(store) = &store {
      if let Some(cached) = store.get(url).await {
        debug!(url, "served from response cache");
        return Ok(cached);
      }
    }

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
    let response = CachedResponse::from_reqwest(response).await?;

    if let Some(store) = &store {
      if response.is_success() {
        store.set(url, &response, self.ttl).await;
      }
    }
    Ok(response)
  }
}
