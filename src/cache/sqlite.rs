//! SQLite page cache implementation

use crate::cache::schema::initialize_schema;
use crate::cache::{CacheEntry, CacheError, CacheResult, PageCache};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite cache backend
///
/// A single connection guarded by a mutex; every operation is a short
/// statement so contention between page tasks stays low.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Opens (or creates) the cache database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCache)` - Successfully opened/created database
    /// * `Err(CacheError)` - Failed to open database
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory cache (for testing and throwaway runs)
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn select(&self, url: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url, content, asset_urls, created_at, ttl_ms, etag, last_modified, content_hash
             FROM page_cache WHERE url = ?1",
        )?;
        let raw = stmt.query_row(params![url], RawRow::from_row).optional()?;
        raw.map(RawRow::into_entry).transpose()
    }
}

/// Column values before timestamp and JSON decoding
struct RawRow {
    url: String,
    content: String,
    asset_urls: String,
    created_at: String,
    ttl_ms: i64,
    etag: Option<String>,
    last_modified: Option<String>,
    content_hash: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            content: row.get(1)?,
            asset_urls: row.get(2)?,
            created_at: row.get(3)?,
            ttl_ms: row.get(4)?,
            etag: row.get(5)?,
            last_modified: row.get(6)?,
            content_hash: row.get(7)?,
        })
    }

    fn into_entry(self) -> CacheResult<CacheEntry> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| CacheError::Timestamp(format!("{}: {}", self.created_at, e)))?
            .with_timezone(&Utc);

        Ok(CacheEntry {
            url: self.url,
            content: self.content,
            asset_urls: serde_json::from_str(&self.asset_urls)?,
            created_at,
            ttl: Duration::from_millis(self.ttl_ms.max(0) as u64),
            etag: self.etag,
            last_modified: self.last_modified,
            content_hash: self.content_hash,
        })
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl PageCache for SqliteCache {
    fn get(&self, url: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.select(url)?.filter(|entry| !entry.is_expired()))
    }

    fn peek(&self, url: &str) -> CacheResult<Option<CacheEntry>> {
        self.select(url)
    }

    fn put(&self, entry: &CacheEntry) -> CacheResult<()> {
        let asset_urls = serde_json::to_string(&entry.asset_urls)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO page_cache
             (url, content, asset_urls, created_at, expires_at, ttl_ms, etag, last_modified, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.url,
                entry.content,
                asset_urls,
                entry.created_at.to_rfc3339(),
                entry.expires_at().timestamp_millis(),
                ttl_millis(entry.ttl),
                entry.etag,
                entry.last_modified,
                entry.content_hash,
            ],
        )?;
        Ok(())
    }

    fn refresh(&self, url: &str, ttl: Duration) -> CacheResult<bool> {
        let Some(mut entry) = self.select(url)? else {
            return Ok(false);
        };
        entry.created_at = Utc::now();
        entry.ttl = ttl;

        let changed = self.conn().execute(
            "UPDATE page_cache SET created_at = ?2, expires_at = ?3, ttl_ms = ?4 WHERE url = ?1",
            params![
                url,
                entry.created_at.to_rfc3339(),
                entry.expires_at().timestamp_millis(),
                ttl_millis(ttl),
            ],
        )?;
        Ok(changed > 0)
    }

    fn remove(&self, url: &str) -> CacheResult<()> {
        self.conn()
            .execute("DELETE FROM page_cache WHERE url = ?1", params![url])?;
        Ok(())
    }

    fn purge_expired(&self) -> CacheResult<usize> {
        let now = Utc::now().timestamp_millis();
        let removed = self
            .conn()
            .execute("DELETE FROM page_cache WHERE expires_at <= ?1", params![now])?;
        Ok(removed)
    }

    fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM page_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
