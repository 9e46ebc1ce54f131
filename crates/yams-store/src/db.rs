//! SQLite database shared by the error log, watermark and checksum cache.
//!
//! The schema is versioned through `PRAGMA user_version`. Opening a database
//! created by a newer build fails with [`StoreError::VersionMismatch`] instead
//! of silently writing rows in a layout it does not understand.

use crate::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version. Incremented on incompatible table changes.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS sync_error (
    sync_error_id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_path    TEXT NOT NULL UNIQUE,
    error_counter INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS last_sync (
    last_sync_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    last_sync_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS checksum_cache (
    cache_key  TEXT PRIMARY KEY,
    md5        TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// A single serialized connection.
///
/// Workers share one `Arc<Database>`; the mutex serializes statements the same
/// way a pooled server-side database would serialize row updates.
pub struct Database {
    conn: Mutex<Option<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("opened database {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` against the connection while holding the lock.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(f(conn)?)
    }

    /// Close the connection. Later calls fail with [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Database(e))?;
            debug!("database closed");
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        self.with(|conn| conn.pragma_query_value(None, "user_version", |row| row.get(0)))
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found == SCHEMA_VERSION {
        return Ok(());
    }
    if found > SCHEMA_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    conn.execute_batch(SCHEMA_V1)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!("migrated database schema from v{found} to v{SCHEMA_VERSION}");
    Ok(())
}
