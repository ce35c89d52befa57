//! Bounded in-process tier with per-entry TTL and approximate LRU eviction.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::clock::{expiry_after, Clock};

#[derive(Debug, Clone)]
struct MemoryEntry {
  value: Value,
  expires_at: DateTime<Utc>,
  last_access: DateTime<Utc>,
  /// Logical access order; breaks ties between equal `last_access` stamps
  access_seq: u64,
}

#[derive(Debug, Default)]
struct Entries {
  map: HashMap<String, MemoryEntry>,
  next_seq: u64,
}

impl Entries {
  fn next_seq(&mut self) -> u64 {
    self.next_seq += 1;
    self.next_seq
  }
}

/// The volatile tier. All operations are synchronous and infallible.
pub struct MemoryStore {
  entries: Mutex<Entries>,
  max_items: usize,
  enabled: bool,
  clock: Arc<dyn Clock>,
}

impl MemoryStore {
  pub fn new(max_items: usize, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(Entries::default()),
      max_items,
      enabled: true,
      clock,
    }
  }

  /// A store that holds nothing.
  pub fn disabled(clock: Arc<dyn Clock>) -> Self {
    Self {
      enabled: false,
      ..Self::new(0, clock)
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  // A panic while holding the lock cannot leave the map half-updated, so
  // poisoning is ignored.
  fn entries(&self) -> MutexGuard<'_, Entries> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    if !self.enabled {
      return None;
    }
    let now = self.clock.now();
    let mut entries = self.entries();

    let expired = now >= entries.map.get(key)?.expires_at;
    if expired {
      entries.map.remove(key);
      debug!(key, "memory entry expired on read");
      return None;
    }

    let seq = entries.next_seq();
    let entry = entries.map.get_mut(key)?;
    entry.last_access = now;
    entry.access_seq = seq;
    Some(entry.value.clone())
  }

  pub fn set(&self, key: &str, value: Value, ttl: Duration) {
    if !self.enabled || self.max_items == 0 {
      return;
    }
    let now = self.clock.now();
    let mut entries = self.entries();

    if !entries.map.contains_key(key) && entries.map.len() >= self.max_items {
      evict_least_recent(&mut entries.map);
    }

    let access_seq = entries.next_seq();
    entries.map.insert(
      key.to_string(),
      MemoryEntry {
        value,
        expires_at: expiry_after(now, ttl),
        last_access: now,
        access_seq,
      },
    );
  }

  pub fn delete(&self, key: &str) {
    self.entries().map.remove(key);
  }

  pub fn clear(&self) {
    self.entries().map.clear();
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn sweep(&self) -> usize {
    let now = self.clock.now();
    let mut entries = self.entries();
    let before = entries.map.len();
    entries.map.retain(|_, entry| now < entry.expires_at);
    before - entries.map.len()
  }

  /// Number of physically present entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    self.entries().map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn evict_least_recent(map: &mut HashMap<String, MemoryEntry>) {
  let victim = map
    .iter()
    .min_by_key(|(_, entry)| (entry.last_access, entry.access_seq))
    .map(|(key, _)| key.clone());

  if let Some(key) = victim {
    debug!(key = %key, "evicting least recently used memory entry");
    map.remove(&key);
  }
}
