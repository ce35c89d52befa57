/// Schema for the durable and response tiers.
///
/// Expiry instants are stored as milliseconds since the Unix epoch.
pub const SCHEMA: &str = r#"
-- Durable tier: one JSON value per key
CREATE TABLE IF NOT EXISTS kv_records (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_records_expires
    ON kv_records(namespace, expires_at);

-- Response tier: full responses keyed by URL
CREATE TABLE IF NOT EXISTS response_cache (
    namespace TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    -- Mirrors the expiry marker header; NULL when the response has none
    expires_at INTEGER,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, url)
);
"#;
