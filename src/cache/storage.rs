//! Storage backends for the durable and response tiers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::traits::{
  CachedResponse, KeyValueBackend, KeyValueStore, KvRecord, ResponseBackend, ResponseCache,
};
use crate::db::Database;

/// Storage for environments without the capability.
/// All operations are no-ops and every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

#[async_trait]
impl KeyValueBackend for NoopStorage {
  async fn open(&self, _namespace: &str) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(NoopStorage))
  }
}

#[async_trait]
impl KeyValueStore for NoopStorage {
  async fn get(&self, _key: &str) -> Result<Option<KvRecord>> {
    Ok(None) // Always miss
  }

  async fn put(&self, _record: KvRecord) -> Result<()> {
    Ok(()) // Discard
  }

  async fn delete(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  async fn delete_expired(&self, _key: &str, _now: DateTime<Utc>) -> Result<bool> {
    Ok(false)
  }

  async fn clear(&self) -> Result<()> {
    Ok(())
  }

  async fn scan_all(&self) -> Result<Vec<KvRecord>> {
    Ok(Vec::new())
  }
}

#[async_trait]
impl ResponseBackend for NoopStorage {
  async fn open(&self, _namespace: &str) -> Result<Arc<dyn ResponseCache>> {
    Ok(Arc::new(NoopStorage))
  }
}

#[async_trait]
impl ResponseCache for NoopStorage {
  async fn lookup(&self, _url: &str) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }

  async fn put(&self, _url: &str, _response: CachedResponse) -> Result<()> {
    Ok(()) // Discard
  }

  async fn delete(&self, _url: &str) -> Result<()> {
    Ok(())
  }

  async fn delete_expired(&self, _url: &str, _now: DateTime<Utc>) -> Result<bool> {
    Ok(false)
  }

  async fn clear(&self) -> Result<()> {
    Ok(())
  }

  async fn urls(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }
}

/// In-process stand-in for a persistent backend. Nothing survives a restart.
///
/// Opening the same namespace twice yields the same handle.
#[derive(Default)]
pub struct MemoryStorage {
  kv: Mutex<HashMap<String, Arc<MemoryKvStore>>>,
  responses: Mutex<HashMap<String, Arc<MemoryResponseCache>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl KeyValueBackend for MemoryStorage {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn KeyValueStore>> {
    let mut kv = self.kv.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let handle: Arc<dyn KeyValueStore> = kv.entry(namespace.to_string()).or_default().clone();
    Ok(handle)
  }
}

#[async_trait]
impl ResponseBackend for MemoryStorage {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn ResponseCache>> {
    let mut responses = self
      .responses
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let handle: Arc<dyn ResponseCache> = responses.entry(namespace.to_string()).or_default().clone();
    Ok(handle)
  }
}

#[derive(Default)]
pub struct MemoryKvStore {
  records: Mutex<BTreeMap<String, KvRecord>>,
}

impl MemoryKvStore {
  fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, KvRecord>>> {
    self.records.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
  async fn get(&self, key: &str) -> Result<Option<KvRecord>> {
    Ok(self.records()?.get(key).cloned())
  }

  async fn put(&self, record: KvRecord) -> Result<()> {
    self.records()?.insert(record.key.clone(), record);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.records()?.remove(key);
    Ok(())
  }

  async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut records = self.records()?;
    match records.get(key) {
      Some(record) if record.expires_at <= now => {
        records.remove(key);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn clear(&self) -> Result<()> {
    self.records()?.clear();
    Ok(())
  }

  async fn scan_all(&self) -> Result<Vec<KvRecord>> {
    Ok(self.records()?.values().cloned().collect())
  }
}

#[derive(Default)]
pub struct MemoryResponseCache {
  responses: Mutex<BTreeMap<String, CachedResponse>>,
}

impl MemoryResponseCache {
  fn responses(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CachedResponse>>> {
    self
      .responses
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
  async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>> {
    Ok(self.responses()?.get(url).cloned())
  }

  async fn put(&self, url: &str, response: CachedResponse) -> Result<()> {
    self.responses()?.insert(url.to_string(), response);
    Ok(())
  }

  async fn delete(&self, url: &str) -> Result<()> {
    self.responses()?.remove(url);
    Ok(())
  }

  async fn delete_expired(&self, url: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut responses = self.responses()?;
    match responses.get(url) {
      Some(response) if response.is_expired_at(now) => {
        responses.remove(url);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn clear(&self) -> Result<()> {
    self.responses()?.clear();
    Ok(())
  }

  async fn urls(&self) -> Result<Vec<String>> {
    Ok(self.responses()?.keys().cloned().collect())
  }
}

/// SQLite-based storage. The database is opened on first use and shared by
/// every namespace handed out.
pub struct SqliteStorage {
  /// `None` for a private in-memory database
  path: Option<PathBuf>,
  db: OnceCell<Arc<Database>>,
}

impl SqliteStorage {
  /// Storage backed by the database file at `path`.
  pub fn at(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      db: OnceCell::new(),
    }
  }

  /// Storage backed by a private in-memory database.
  pub fn in_memory() -> Self {
    Self {
      path: None,
      db: OnceCell::new(),
    }
  }

  async fn database(&self) -> Result<Arc<Database>> {
    let db = self
      .db
      .get_or_try_init(|| async {
        let db = match &self.path {
          Some(path) => Database::open(path)?,
          None => Database::open_in_memory()?,
        };
        Ok::<_, color_eyre::Report>(Arc::new(db))
      })
      .await?;
    Ok(Arc::clone(db))
  }
}

#[async_trait]
impl KeyValueBackend for SqliteStorage {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(SqliteKvStore {
      db: self.database().await?,
      namespace: namespace.to_string(),
    }))
  }
}

#[async_trait]
impl ResponseBackend for SqliteStorage {
  async fn open(&self, namespace: &str) -> Result<Arc<dyn ResponseCache>> {
    Ok(Arc::new(SqliteResponseCache {
      db: self.database().await?,
      namespace: namespace.to_string(),
    }))
  }
}

pub struct SqliteKvStore {
  db: Arc<Database>,
  namespace: String,
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
  async fn get(&self, key: &str) -> Result<Option<KvRecord>> {
    let conn = self.db.conn()?;

    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT value, expires_at FROM kv_records WHERE namespace = ? AND key = ?",
        params![self.namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query record: {}", e))?;

    row
      .map(|(value, expires_at)| decode_record(key.to_string(), &value, expires_at))
      .transpose()
  }

  async fn put(&self, record: KvRecord) -> Result<()> {
    let conn = self.db.conn()?;
    let value = serde_json::to_string(&record.value)
      .map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_records (namespace, key, value, expires_at)
         VALUES (?, ?, ?, ?)",
        params![
          self.namespace,
          record.key,
          value,
          record.expires_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store record: {}", e))?;

    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM kv_records WHERE namespace = ? AND key = ?",
        params![self.namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete record: {}", e))?;
    Ok(())
  }

  async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM kv_records WHERE namespace = ? AND key = ? AND expires_at <= ?",
        params![self.namespace, key, now.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to delete expired record: {}", e))?;
    Ok(removed > 0)
  }

  async fn clear(&self) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM kv_records WHERE namespace = ?",
        params![self.namespace],
      )
      .map_err(|e| eyre!("Failed to clear records: {}", e))?;
    Ok(())
  }

  async fn scan_all(&self) -> Result<Vec<KvRecord>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT key, value, expires_at FROM kv_records WHERE namespace = ?")
      .map_err(|e| eyre!("Failed to prepare scan: {}", e))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map(params![self.namespace], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to scan records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // Undecodable rows are skipped rather than failing the whole scan
    Ok(
      rows
        .into_iter()
        .filter_map(|(key, value, expires_at)| decode_record(key, &value, expires_at).ok())
        .collect(),
    )
  }
}

fn decode_record(key: String, value: &str, expires_at: i64) -> Result<KvRecord> {
  let value =
    serde_json::from_str(value).map_err(|e| eyre!("Failed to deserialize record: {}", e))?;
  let expires_at = DateTime::from_timestamp_millis(expires_at)
    .ok_or_else(|| eyre!("Invalid expiry timestamp {}", expires_at))?;
  Ok(KvRecord {
    key,
    value,
    expires_at,
  })
}

pub struct SqliteResponseCache {
  db: Arc<Database>,
  namespace: String,
}

#[async_trait]
impl ResponseCache for SqliteResponseCache {
  async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM response_cache WHERE namespace = ? AND url = ?",
        params![self.namespace, url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query response: {}", e))?;

    match row {
      Some((status, headers, body)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse::new(status, headers, body)))
      }
      None => Ok(None),
    }
  }

  async fn put(&self, url: &str, response: CachedResponse) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let expires_at = response.expires_at().map(|at| at.timestamp_millis());

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (namespace, url, status, headers, body, expires_at, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          self.namespace,
          url,
          response.status,
          headers,
          response.body,
          expires_at
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  async fn delete(&self, url: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM response_cache WHERE namespace = ? AND url = ?",
        params![self.namespace, url],
      )
      .map_err(|e| eyre!("Failed to delete response: {}", e))?;
    Ok(())
  }

  async fn delete_expired(&self, url: &str, now: DateTime<Utc>) -> Result<bool> {
    // Unmarked responses have a NULL expiry and always count as expired
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM response_cache
         WHERE namespace = ? AND url = ? AND (expires_at IS NULL OR expires_at <= ?)",
        params![self.namespace, url, now.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to delete expired response: {}", e))?;
    Ok(removed > 0)
  }

  async fn clear(&self) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM response_cache WHERE namespace = ?",
        params![self.namespace],
      )
      .map_err(|e| eyre!("Failed to clear responses: {}", e))?;
    Ok(())
  }

  async fn urls(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT url FROM response_cache WHERE namespace = ?")
      .map_err(|e| eyre!("Failed to prepare scan: {}", e))?;

    let urls: Vec<String> = stmt
      .query_map(params![self.namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to scan responses: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(urls)
  }
}
