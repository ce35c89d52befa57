//! Cache coordinator: one read/write/evict API over the three tiers.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::{remaining, Clock, SystemClock};
use super::durable::DurableStore;
use super::memory::MemoryStore;
use super::response::ResponseStore;
use super::storage::{MemoryStorage, NoopStorage, SqliteStorage};
use super::sweep::Sweeper;
use super::traits::{
  is_url_key, CacheHit, CachedResponse, KeyValueBackend, ResponseBackend, Tier,
};
use crate::config::{BackendKind, Config};
use crate::db::Database;

/// Options for [`CacheCoordinator::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
  /// Start at the durable tier, as if the memory tier were unavailable
  pub skip_memory: bool,
}

impl GetOptions {
  pub fn skip_memory() -> Self {
    Self { skip_memory: true }
  }
}

/// Per-tier TTL overrides for [`CacheCoordinator::set`]. Unset values use the
/// tier's configured default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
  pub memory_ttl: Option<Duration>,
  pub durable_ttl: Option<Duration>,
  pub response_ttl: Option<Duration>,
}

impl SetOptions {
  /// Use the same TTL for every tier.
  pub fn ttl(ttl: Duration) -> Self {
    Self {
      memory_ttl: Some(ttl),
      durable_ttl: Some(ttl),
      response_ttl: Some(ttl),
    }
  }
}

struct Sweepers {
  memory: Sweeper,
  durable: Sweeper,
  response: Sweeper,
}

/// Coordinates the memory, durable and response tiers.
///
/// Reads try the tiers one at a time, fastest first, and stop at the first
/// hit; a hit in a slower tier is copied into the faster ones. Writes go to
/// every applicable tier independently. An unavailable tier behaves exactly
/// like an empty one.
pub struct CacheCoordinator {
  config: Config,
  clock: Arc<dyn Clock>,
  memory: Arc<MemoryStore>,
  durable: Arc<DurableStore>,
  response: Arc<ResponseStore>,
  sweepers: Sweepers,
}

impl CacheCoordinator {
  /// Build a coordinator with the backends named in `config` and wall-clock time.
  pub fn new(config: Config) -> Self {
    let (kv, responses) = backends_for(&config);
    Self::with_backends(config, kv, responses, Arc::new(SystemClock))
  }

  /// Build a coordinator over explicit backends and clock.
  pub fn with_backends(
    config: Config,
    kv: Arc<dyn KeyValueBackend>,
    responses: Arc<dyn ResponseBackend>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let memory = if config.memory.enabled {
      MemoryStore::new(config.memory.max_items, Arc::clone(&clock))
    } else {
      MemoryStore::disabled(Arc::clone(&clock))
    };
    let durable = DurableStore::new(
      kv,
      config.durable.store_namespace.clone(),
      config.durable.enabled,
      Arc::clone(&clock),
    );
    let response = ResponseStore::new(
      responses,
      config.response.cache_namespace.clone(),
      config.response.enabled,
      Arc::clone(&clock),
    );

    Self {
      config,
      clock,
      memory: Arc::new(memory),
      durable: Arc::new(durable),
      response: Arc::new(response),
      sweepers: Sweepers {
        memory: Sweeper::new(Tier::Memory),
        durable: Sweeper::new(Tier::Durable),
        response: Sweeper::new(Tier::Response),
      },
    }
  }

  /// The response tier, e.g. for registering its intercept worker.
  pub fn response_store(&self) -> &Arc<ResponseStore> {
    &self.response
  }

  /// Look `key` up and report which tier answered.
  ///
  /// 1. Memory tier, unless `skip_memory` - return on hit
  /// 2. Durable tier - on hit, backfill memory
  /// 3. Response tier, for URL keys only - on hit, backfill durable and memory
  pub async fn lookup(&self, key: &str, options: GetOptions) -> Option<CacheHit<Value>> {
    if !options.skip_memory {
      if let Some(value) = self.memory.get(key) {
        debug!(key, "memory hit");
        return Some(CacheHit {
          value,
          source: Tier::Memory,
        });
      }
    }

    if let Some(record) = self.durable.get(key).await {
      debug!(key, "durable hit");
      if let Some(ttl) = self.backfill_ttl(self.config.memory.ttl, record.expires_at) {
        self.memory.set(key, record.value.clone(), ttl);
      }
      return Some(CacheHit {
        value: record.value,
        source: Tier::Durable,
      });
    }

    if is_url_key(key) {
      if let Some(response) = self.response.get(key).await {
        let value = match response.payload() {
          Ok(value) => value,
          Err(e) => {
            warn!(key, "cached response has no usable payload: {:#}", e);
            return None;
          }
        };
        debug!(key, "response hit");
        if let Some(expires_at) = response.expires_at() {
          if let Some(ttl) = self.backfill_ttl(self.config.durable.ttl, expires_at) {
            self.durable.set(key, value.clone(), ttl).await;
          }
          if let Some(ttl) = self.backfill_ttl(self.config.memory.ttl, expires_at) {
            self.memory.set(key, value.clone(), ttl);
          }
        }
        return Some(CacheHit {
          value,
          source: Tier::Response,
        });
      }
    }

    debug!(key, "miss");
    None
  }

  /// Raw JSON value for `key`, if any tier holds a live copy.
  pub async fn get_value(&self, key: &str, options: GetOptions) -> Option<Value> {
    self.lookup(key, options).await.map(|hit| hit.value)
  }

  /// Typed value for `key`. A value that does not deserialize as `T` is a miss.
  pub async fn get<T: DeserializeOwned>(&self, key: &str, options: GetOptions) -> Option<T> {
    let value = self.get_value(key, options).await?;
    match serde_json::from_value(value) {
      Ok(value) => Some(value),
      Err(e) => {
        debug!(key, "cached value has unexpected shape: {}", e);
        None
      }
    }
  }

  /// Write `value` to every applicable tier.
  ///
  /// Fails only if `value` cannot be represented as JSON, in which case no
  /// tier is written.
  pub async fn set<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    options: SetOptions,
  ) -> Result<()> {
    let value = serde_json::to_value(value)
      .map_err(|e| eyre!("Failed to serialize value for {}: {}", key, e))?;
    self.set_value(key, value, options).await;
    Ok(())
  }

  /// Write a JSON value to every applicable tier. Each tier write is
  /// independent; a failing tier is logged and skipped.
  pub async fn set_value(&self, key: &str, value: Value, options: SetOptions) {
    self.memory.set(
      key,
      value.clone(),
      options.memory_ttl.unwrap_or(self.config.memory.ttl),
    );

    let response = if is_url_key(key) {
      match CachedResponse::json(&value) {
        Ok(response) => Some(response),
        Err(e) => {
          warn!(key, "skipping response tier: {:#}", e);
          None
        }
      }
    } else {
      None
    };

    self
      .durable
      .set(
        key,
        value,
        options.durable_ttl.unwrap_or(self.config.durable.ttl),
      )
      .await;

    if let Some(response) = response {
      self
        .response
        .set(
          key,
          &response,
          options.response_ttl.unwrap_or(self.config.response.ttl),
        )
        .await;
    }
  }

  pub async fn delete(&self, key: &str) {
    self.memory.delete(key);
    self.durable.delete(key).await;
    if is_url_key(key) {
      self.response.delete(key).await;
    }
  }

  /// Empty every tier.
  pub async fn clear(&self) {
    self.memory.clear();
    self.durable.clear().await;
    self.response.clear().await;
  }

  /// Empty one tier, leaving the others untouched.
  pub async fn clear_level(&self, tier: Tier) {
    match tier {
      Tier::Memory => self.memory.clear(),
      Tier::Durable => self.durable.clear().await,
      Tier::Response => self.response.clear().await,
    }
  }

  /// Run one sweep of every enabled tier now.
  pub async fn sweep(&self) -> Vec<(Tier, usize)> {
    let mut removed = Vec::new();
    if self.memory.is_enabled() {
      removed.push((Tier::Memory, self.memory.sweep()));
    }
    if self.durable.is_enabled() {
      removed.push((Tier::Durable, self.durable.sweep().await));
    }
    if self.response.is_enabled() {
      removed.push((Tier::Response, self.response.sweep().await));
    }
    removed
  }

  /// Start the periodic sweep of every enabled tier. Must be called from
  /// within a tokio runtime.
  pub fn start_sweeps(&self) {
    let interval = self.config.sweep_interval;

    if self.memory.is_enabled() {
      let memory = Arc::clone(&self.memory);
      self.sweepers.memory.start(
        interval,
        Box::new(move || {
          let memory = Arc::clone(&memory);
          async move { memory.sweep() }.boxed()
        }),
      );
    }

    if self.durable.is_enabled() {
      let durable = Arc::clone(&self.durable);
      self.sweepers.durable.start(
        interval,
        Box::new(move || {
          let durable = Arc::clone(&durable);
          async move { durable.sweep().await }.boxed()
        }),
      );
    }

    if self.response.is_enabled() {
      let response = Arc::clone(&self.response);
      self.sweepers.response.start(
        interval,
        Box::new(move || {
          let response = Arc::clone(&response);
          async move { response.sweep().await }.boxed()
        }),
      );
    }
  }

  pub fn stop_sweeps(&self) {
    self.sweepers.memory.stop();
    self.sweepers.durable.stop();
    self.sweepers.response.stop();
  }

  pub fn sweeps_running(&self) -> bool {
    self.sweepers.memory.is_running()
      || self.sweepers.durable.is_running()
      || self.sweepers.response.is_running()
  }

  /// TTL for a backfilled copy: what is left of the source entry's life,
  /// capped by the target tier's default.
  fn backfill_ttl(
    &self,
    tier_default: Duration,
    expires_at: chrono::DateTime<chrono::Utc>,
  ) -> Option<Duration> {
    remaining(self.clock.now(), expires_at).map(|left| left.min(tier_default))
  }
}

/// Build the backends named in `config`. Both tiers share one SQLite database.
fn backends_for(config: &Config) -> (Arc<dyn KeyValueBackend>, Arc<dyn ResponseBackend>) {
  let wants_sqlite = config.durable.backend == BackendKind::Sqlite
    || config.response.backend == BackendKind::Sqlite;
  let sqlite = if wants_sqlite {
    sqlite_storage(config)
  } else {
    None
  };

  let kv: Arc<dyn KeyValueBackend> = match (config.durable.backend, &sqlite) {
    (BackendKind::Sqlite, Some(sqlite)) => sqlite.clone(),
    (BackendKind::Memory, _) => Arc::new(MemoryStorage::new()),
    _ => Arc::new(NoopStorage),
  };
  let responses: Arc<dyn ResponseBackend> = match (config.response.backend, &sqlite) {
    (BackendKind::Sqlite, Some(sqlite)) => sqlite.clone(),
    (BackendKind::Memory, _) => Arc::new(MemoryStorage::new()),
    _ => Arc::new(NoopStorage),
  };
  (kv, responses)
}

fn sqlite_storage(config: &Config) -> Option<Arc<SqliteStorage>> {
  let path = match &config.durable.path {
    Some(path) => path.clone(),
    None => match Database::default_path() {
      Ok(path) => path,
      Err(e) => {
        warn!("no location for the cache database, persistent tiers disabled: {:#}", e);
        return None;
      }
    },
  };
  Some(Arc::new(SqliteStorage::at(path)))
}

/// Build an independent coordinator.
pub fn create_cache(config: Config) -> CacheCoordinator {
  CacheCoordinator::new(config)
}

static SHARED: OnceLock<CacheCoordinator> = OnceLock::new();

/// The process-wide coordinator.
///
/// Built on first use from the discovered configuration file (or defaults)
/// and kept for the lifetime of the process. Sweeps are not started
/// automatically; call [`CacheCoordinator::start_sweeps`] from inside a
/// runtime if they are wanted. Code that needs isolation should use
/// [`create_cache`] instead.
pub fn shared() -> &'static CacheCoordinator {
  SHARED.get_or_init(|| {
    let config = Config::load(None).unwrap_or_else(|e| {
      warn!("using default cache configuration: {:#}", e);
      Config::default()
    });
    CacheCoordinator::new(config)
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::traits::{KeyValueStore, KvRecord};
  use async_trait::async_trait;
  use chrono::{DateTime, Utc};
  use serde::Deserialize;
  use serde_json::json;
  use std::collections::BTreeMap;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const PRICE_URL: &str = "https://api.example.com/price";

  /// Key-value backend that counts reads and can refuse writes.
  #[derive(Default)]
  struct Instrumented {
    inner: MemoryStorage,
    gets: Arc<AtomicUsize>,
    fail_puts: bool,
  }

  struct InstrumentedKv {
    inner: Arc<dyn KeyValueStore>,
    gets: Arc<AtomicUsize>,
    fail_puts: bool,
  }

  #[async_trait]
  impl KeyValueBackend for Instrumented {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn KeyValueStore>> {
      Ok(Arc::new(InstrumentedKv {
        inner: KeyValueBackend::open(&self.inner, namespace).await?,
        gets: Arc::clone(&self.gets),
        fail_puts: self.fail_puts,
      }))
    }
  }

  #[async_trait]
  impl KeyValueStore for InstrumentedKv {
    async fn get(&self, key: &str) -> Result<Option<KvRecord>> {
      self.gets.fetch_add(1, Ordering::SeqCst);
      self.inner.get(key).await
    }

    async fn put(&self, record: KvRecord) -> Result<()> {
      if self.fail_puts {
        return Err(eyre!("quota exceeded"));
      }
      self.inner.put(record).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
      self.inner.delete(key).await
    }

    async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
      self.inner.delete_expired(key, now).await
    }

    async fn clear(&self) -> Result<()> {
      self.inner.clear().await
    }

    async fn scan_all(&self) -> Result<Vec<KvRecord>> {
      self.inner.scan_all().await
    }
  }

  struct Harness {
    cache: CacheCoordinator,
    clock: Arc<ManualClock>,
    durable_gets: Arc<AtomicUsize>,
    responses: Arc<MemoryStorage>,
  }

  fn harness_with(config: Config, fail_puts: bool) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let kv = Instrumented {
      fail_puts,
      ..Instrumented::default()
    };
    let durable_gets = Arc::clone(&kv.gets);
    let responses = Arc::new(MemoryStorage::new());
    let cache =
      CacheCoordinator::with_backends(config, Arc::new(kv), responses.clone(), clock.clone());
    Harness {
      cache,
      clock,
      durable_gets,
      responses,
    }
  }

  fn harness() -> Harness {
    harness_with(Config::default(), false)
  }

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct User {
    name: String,
  }

  #[tokio::test]
  async fn test_round_trip() {
    let h = harness();
    let ann = User {
      name: "Ann".to_string(),
    };
    h.cache
      .set("user:42", &ann, SetOptions::default())
      .await
      .unwrap();
    assert_eq!(
      h.cache.get::<User>("user:42", GetOptions::default()).await,
      Some(ann)
    );
  }

  #[tokio::test]
  async fn test_expires_after_ttl() {
    let h = harness();
    h.cache
      .set(
        "user:42",
        &json!({"name": "Ann"}),
        SetOptions::ttl(Duration::from_millis(5000)),
      )
      .await
      .unwrap();
    assert_eq!(
      h.cache.get_value("user:42", GetOptions::default()).await,
      Some(json!({"name": "Ann"}))
    );

    h.clock.advance(Duration::from_millis(6000));
    assert_eq!(h.cache.get_value("user:42", GetOptions::default()).await, None);
    assert_eq!(
      h.cache.get_value("user:42", GetOptions::skip_memory()).await,
      None
    );
  }

  #[tokio::test]
  async fn test_memory_capacity_evicts_least_recent() {
    let mut config = Config::default();
    config.memory.max_items = 2;
    config.durable.enabled = false;
    let h = harness_with(config, false);

    for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
      h.cache.set(key, &value, SetOptions::default()).await.unwrap();
    }

    assert_eq!(h.cache.get::<i32>("a", GetOptions::default()).await, None);
    assert_eq!(h.cache.get::<i32>("b", GetOptions::default()).await, Some(2));
    assert_eq!(h.cache.get::<i32>("c", GetOptions::default()).await, Some(3));
  }

  #[tokio::test]
  async fn test_durable_hit_backfills_memory() {
    let h = harness();
    h.cache
      .set(PRICE_URL, &json!({"p": 1.23}), SetOptions::default())
      .await
      .unwrap();

    let hit = h
      .cache
      .lookup(PRICE_URL, GetOptions::skip_memory())
      .await
      .unwrap();
    assert_eq!(hit.value, json!({"p": 1.23}));
    assert_eq!(hit.source, Tier::Durable);
    assert_eq!(h.durable_gets.load(Ordering::SeqCst), 1);

    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Memory);
    assert_eq!(hit.value, json!({"p": 1.23}));
    assert_eq!(h.durable_gets.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_response_hit_backfills_both_tiers() {
    let h = harness();
    let raw = ResponseBackend::open(h.responses.as_ref(), "tiercache-responses")
      .await
      .unwrap();
    let expires_at = h.clock.now() + chrono::Duration::seconds(30);
    raw
      .put(
        PRICE_URL,
        CachedResponse::json(&json!({"p": 2.5}))
          .unwrap()
          .with_expiry(expires_at),
      )
      .await
      .unwrap();

    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Response);
    assert_eq!(hit.value, json!({"p": 2.5}));

    let hit = h.cache.lookup(PRICE_URL, GetOptions::skip_memory()).await.unwrap();
    assert_eq!(hit.source, Tier::Durable);
    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Memory);

    // Backfilled copies never outlive the response they came from
    h.clock.advance(Duration::from_secs(31));
    assert_eq!(h.cache.get_value(PRICE_URL, GetOptions::default()).await, None);
  }

  #[tokio::test]
  async fn test_plain_keys_never_touch_response_tier() {
    let h = harness();
    h.cache
      .set("user:42", &json!(1), SetOptions::default())
      .await
      .unwrap();
    let raw = ResponseBackend::open(h.responses.as_ref(), "tiercache-responses")
      .await
      .unwrap();
    assert!(raw.urls().await.unwrap().is_empty());

    h.cache
      .set(PRICE_URL, &json!(1), SetOptions::default())
      .await
      .unwrap();
    assert_eq!(raw.urls().await.unwrap(), vec![PRICE_URL.to_string()]);
  }

  #[tokio::test]
  async fn test_scoped_clear() {
    let h = harness();
    h.cache
      .set(PRICE_URL, &json!({"p": 1}), SetOptions::default())
      .await
      .unwrap();

    h.cache.clear_level(Tier::Memory).await;
    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Durable);

    h.cache.clear_level(Tier::Memory).await;
    h.cache.clear_level(Tier::Durable).await;
    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Response);

    h.cache.clear().await;
    assert!(h.cache.lookup(PRICE_URL, GetOptions::default()).await.is_none());
    assert!(h.cache.lookup(PRICE_URL, GetOptions::skip_memory()).await.is_none());
  }

  #[tokio::test]
  async fn test_delete_propagates() {
    let h = harness();
    for key in ["user:42", PRICE_URL] {
      h.cache.set(key, &json!(1), SetOptions::default()).await.unwrap();
      h.cache.delete(key).await;
      assert!(h.cache.lookup(key, GetOptions::default()).await.is_none());
      assert!(h.cache.lookup(key, GetOptions::skip_memory()).await.is_none());
    }
  }

  #[tokio::test]
  async fn test_durable_disabled_memory_still_serves() {
    let mut config = Config::default();
    config.durable.enabled = false;
    let h = harness_with(config, false);

    h.cache
      .set("k", &json!("v"), SetOptions::default())
      .await
      .unwrap();
    assert_eq!(
      h.cache.get_value("k", GetOptions::default()).await,
      Some(json!("v"))
    );
    assert_eq!(h.durable_gets.load(Ordering::SeqCst), 0);
    h.cache.clear().await;
    assert_eq!(h.cache.get_value("k", GetOptions::default()).await, None);
  }

  #[tokio::test]
  async fn test_failing_durable_write_is_isolated() {
    let h = harness_with(Config::default(), true);
    h.cache
      .set(PRICE_URL, &json!({"p": 3}), SetOptions::default())
      .await
      .unwrap();

    let hit = h.cache.lookup(PRICE_URL, GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Memory);
    let hit = h.cache.lookup(PRICE_URL, GetOptions::skip_memory()).await.unwrap();
    assert_eq!(hit.source, Tier::Response);
  }

  #[tokio::test]
  async fn test_unserializable_value_is_rejected() {
    let h = harness();
    let mut bad = BTreeMap::new();
    bad.insert((1, 2), "tuple keys are not JSON");

    assert!(h.cache.set("k", &bad, SetOptions::default()).await.is_err());
    assert!(h.cache.lookup("k", GetOptions::default()).await.is_none());
  }

  #[tokio::test]
  async fn test_per_tier_ttls() {
    let h = harness();
    h.cache
      .set(
        "k",
        &json!(1),
        SetOptions {
          memory_ttl: Some(Duration::from_secs(1)),
          durable_ttl: Some(Duration::from_secs(10)),
          response_ttl: None,
        },
      )
      .await
      .unwrap();

    h.clock.advance(Duration::from_secs(2));
    let hit = h.cache.lookup("k", GetOptions::default()).await.unwrap();
    assert_eq!(hit.source, Tier::Durable);
  }

  #[tokio::test]
  async fn test_wrong_type_is_a_miss() {
    let h = harness();
    h.cache
      .set("k", &json!("text"), SetOptions::default())
      .await
      .unwrap();
    assert_eq!(h.cache.get::<u32>("k", GetOptions::default()).await, None);
  }

  #[tokio::test]
  async fn test_all_tiers_unavailable() {
    let cache = CacheCoordinator::with_backends(
      Config::default(),
      Arc::new(NoopStorage),
      Arc::new(NoopStorage),
      Arc::new(ManualClock::default()),
    );
    cache
      .set(PRICE_URL, &json!(1), SetOptions::default())
      .await
      .unwrap();
    assert!(cache.lookup(PRICE_URL, GetOptions::skip_memory()).await.is_none());
    cache.delete(PRICE_URL).await;
    cache.clear().await;
    cache.clear_level(Tier::Response).await;
  }

  #[tokio::test]
  async fn test_sweep_and_lifecycle() {
    let mut config = Config::default();
    config.sweep_interval = Duration::from_millis(10);
    let h = harness_with(config, false);

    h.cache
      .set(PRICE_URL, &json!(1), SetOptions::ttl(Duration::from_secs(1)))
      .await
      .unwrap();
    h.clock.advance(Duration::from_secs(2));

    let removed = h.cache.sweep().await;
    assert_eq!(
      removed,
      vec![(Tier::Memory, 1), (Tier::Durable, 1), (Tier::Response, 1)]
    );

    h.cache.start_sweeps();
    assert!(h.cache.sweeps_running());
    h.cache.stop_sweeps();
    assert!(!h.cache.sweeps_running());
  }

  #[tokio::test]
  async fn test_zero_sweep_interval_starts_nothing() {
    let mut config = Config::default();
    config.sweep_interval = Duration::ZERO;
    let h = harness_with(config, false);

    h.cache.start_sweeps();
    assert!(!h.cache.sweeps_running());
  }

  #[tokio::test]
  async fn test_background_sweep_drops_expired_memory() {
    let mut config = Config::default();
    config.sweep_interval = Duration::from_millis(10);
    config.durable.enabled = false;
    let h = harness_with(config, false);

    h.cache
      .set("k", &json!(1), SetOptions::ttl(Duration::from_secs(1)))
      .await
      .unwrap();
    h.clock.advance(Duration::from_secs(2));

    h.cache.start_sweeps();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.cache.stop_sweeps();
    assert!(h.cache.memory.is_empty());
  }

  #[tokio::test]
  async fn test_create_cache_is_independent() {
    let mut config = Config::default();
    config.durable.backend = BackendKind::Memory;
    config.response.backend = BackendKind::None;

    let a = create_cache(config.clone());
    let b = create_cache(config);
    a.set("k", &1, SetOptions::default()).await.unwrap();
    assert_eq!(a.get::<i32>("k", GetOptions::skip_memory()).await, Some(1));
    assert_eq!(b.get::<i32>("k", GetOptions::default()).await, None);
  }

  #[tokio::test]
  async fn test_shared_is_built_once_and_isolated() {
    assert!(std::ptr::eq(shared(), shared()));

    let key = format!("tiercache-test:shared:{}", std::process::id());
    shared().set(&key, &7, SetOptions::default()).await.unwrap();
    assert_eq!(shared().get::<i32>(&key, GetOptions::default()).await, Some(7));

    let mut config = Config::default();
    config.durable.backend = BackendKind::Memory;
    config.response.backend = BackendKind::None;
    let own = create_cache(config);
    assert_eq!(own.get::<i32>(&key, GetOptions::default()).await, None);

    shared().delete(&key).await;
    assert_eq!(shared().get::<i32>(&key, GetOptions::default()).await, None);
  }
}
