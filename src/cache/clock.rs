//! Time source shared by every tier of a cache.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Used to simulate TTLs elapsing.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now = expiry_after(*now, by);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// 9999-12-31T23:59:59.999Z, the last instant an RFC 3339 timestamp can carry.
const LATEST_EXPIRY_MILLIS: i64 = 253_402_300_799_999;

/// The latest expiry any tier stores. Response markers are RFC 3339 text, so
/// every tier stops at the same four-digit-year bound.
pub fn latest_expiry() -> DateTime<Utc> {
  DateTime::from_timestamp_millis(LATEST_EXPIRY_MILLIS).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Compute `now + ttl`, saturating at [`latest_expiry`].
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  let latest = latest_expiry();
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|ttl| now.checked_add_signed(ttl))
    .map_or(latest, |at| at.min(latest))
}

/// Time left until `expires_at`, or `None` if it has already passed.
pub fn remaining(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Option<Duration> {
  if now >= expires_at {
    return None;
  }
  (expires_at - now).to_std().ok()
}
