//! Cross-job page cache and incremental change detection
//!
//! Entries are keyed by normalized URL and outlive any single clone job, so a
//! second clone of the same site can skip rendering pages it already has. The
//! cache is never authoritative: a disabled or empty cache yields the same
//! crawl result, only slower.

mod change;
mod schema;
mod sqlite;

pub use change::{ChangeDetector, ChangeReason, ChangeReport, HttpChangeDetector};
pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteCache;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp in cache row: {0}")]
    Timestamp(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// A cached rendering of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Normalized (fragment-stripped) URL
    pub url: String,
    /// Rendered HTML
    pub content: String,
    /// Asset URLs referenced by the page
    pub asset_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Validators captured from the response, used by the change probe
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Hex SHA-256 of `content`
    pub content_hash: String,
}

impl CacheEntry {
    /// Builds an entry stamped with the current time
    pub fn new(url: impl Into<String>, content: impl Into<String>, ttl: Duration) -> Self {
        let content = content.into();
        Self {
            url: url.into(),
            content_hash: content_hash(content.as_bytes()),
            content,
            asset_urls: Vec::new(),
            created_at: Utc::now(),
            ttl,
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_assets(mut self, asset_urls: Vec<String>) -> Self {
        self.asset_urls = asset_urls;
        self
    }

    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persisted URL -> rendered content store
///
/// Implementations must be safe to share between concurrent page tasks.
pub trait PageCache: Send + Sync {
    /// Returns the entry for `url` if present and unexpired
    fn get(&self, url: &str) -> CacheResult<Option<CacheEntry>>;

    /// Returns the entry for `url` even if it has expired
    fn peek(&self, url: &str) -> CacheResult<Option<CacheEntry>>;

    /// Inserts or replaces the entry for `entry.url`
    fn put(&self, entry: &CacheEntry) -> CacheResult<()>;

    /// Restarts the TTL of an existing entry; returns false if there is none
    fn refresh(&self, url: &str, ttl: Duration) -> CacheResult<bool>;

    fn remove(&self, url: &str) -> CacheResult<()>;

    /// Deletes every expired entry, returning how many were removed
    fn purge_expired(&self) -> CacheResult<usize>;

    fn len(&self) -> CacheResult<usize>;

    fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}
