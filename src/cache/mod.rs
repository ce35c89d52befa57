//! Tiered client-side cache.
//!
//! One logical cache over three stores:
//! - a bounded in-process memory tier
//! - a durable structured tier (SQLite by default)
//! - a response tier holding full responses for http(s) URL keys
//!
//! Reads fall through the tiers fastest first and backfill on a hit; writes
//! go to every applicable tier. Each tier has its own TTL policy, expires
//! entries lazily on read, and can be swept periodically in the background.

mod clock;
mod coordinator;
mod durable;
mod intercept;
mod memory;
mod response;
mod storage;
mod sweep;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{create_cache, shared, CacheCoordinator, GetOptions, SetOptions};
pub use durable::DurableStore;
pub use intercept::ResponseInterceptor;
pub use memory::MemoryStore;
pub use response::ResponseStore;
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage};
pub use sweep::{SweepFn, Sweeper};
pub use traits::{
  is_url_key, CacheHit, CachedResponse, KeyValueBackend, KeyValueStore, KvRecord,
  ResponseBackend, ResponseCache, Tier, EXPIRES_HEADER,
};
