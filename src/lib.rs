pub mod cache;
pub mod config;
pub mod db;

pub use cache::{create_cache, shared, CacheCoordinator, GetOptions, SetOptions, Tier};
pub use config::Config;
