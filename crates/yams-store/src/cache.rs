use crate::db::Database;
use crate::StoreError;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Image name to last-known MD5, with expiry.
///
/// A fresh entry is a hint that the remote already holds these bytes. A
/// missing entry is not an error.
pub trait ChecksumCache: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, name: &str, md5: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Cache rows in the shared SQLite database. Expired rows read as missing and
/// are purged on access.
pub struct SqliteChecksumCache {
    db: Arc<Database>,
    prefix: String,
}

impl SqliteChecksumCache {
    pub fn new(db: Arc<Database>, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl ChecksumCache for SqliteChecksumCache {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(name);
        let now = unix_now();
        self.db.with(|conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT md5, expires_at FROM checksum_cache WHERE cache_key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((md5, expires_at)) if expires_at > now => Ok(Some(md5)),
                Some(_) => {
                    conn.execute(
                        "DELETE FROM checksum_cache WHERE cache_key = ?1",
                        params![key],
                    )?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set(&self, name: &str, md5: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = self.key(name);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = unix_now().saturating_add(ttl_secs);
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO checksum_cache (cache_key, md5, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(cache_key) DO UPDATE SET md5 = excluded.md5, expires_at = excluded.expires_at",
                params![key, md5, expires_at],
            )
        })?;
        Ok(())
    }
}

/// Process-local cache, for runs without a persistent cache and for tests.
pub struct MemoryChecksumCache {
    prefix: String,
    /// Expiry of `None` means the TTL overflowed `Instant` and never lapses.
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryChecksumCache {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChecksumCache for MemoryChecksumCache {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let key = format!("{}{name}", self.prefix);
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        match entries.get(&key) {
            Some((md5, expires)) if expires.map_or(true, |at| at > Instant::now()) => {
                Ok(Some(md5.clone()))
            }
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, name: &str, md5: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = format!("{}{name}", self.prefix);
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key, (md5.to_owned(), Instant::now().checked_add(ttl)));
        Ok(())
    }
}
