use crate::db::Database;
use crate::StoreError;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Durable, paginated queue of per-image failure counters.
///
/// At most one entry exists per image name. Only entries whose counter is at
/// or below the caller's tolerance are surfaced by the paginator.
pub trait ErrorLog: Send + Sync {
    /// Number of pages of entries with `error_counter <= max_tolerance`.
    fn pages_count(&self, max_tolerance: u32) -> Result<u32, StoreError>;

    /// Page `n` (1-based) of eligible names, oldest entry first.
    fn page(&self, n: u32, max_tolerance: u32) -> Result<Vec<String>, StoreError>;

    /// Record a failure: insert at 0 or increment an existing counter.
    fn add(&self, name: &str) -> Result<(), StoreError>;

    /// Insert or overwrite the counter for `name`.
    fn set_counter(&self, name: &str, value: u32) -> Result<(), StoreError>;

    /// Clear the error mark for `name`.
    fn remove(&self, name: &str) -> Result<(), StoreError>;

    /// Current counter for `name`, if marked.
    fn counter(&self, name: &str) -> Result<Option<u32>, StoreError>;
}

pub struct SqliteErrorLog {
    db: Arc<Database>,
    page_size: u32,
}

impl SqliteErrorLog {
    pub fn new(db: Arc<Database>, page_size: u32) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }
}

impl ErrorLog for SqliteErrorLog {
    fn pages_count(&self, max_tolerance: u32) -> Result<u32, StoreError> {
        let count: i64 = self.db.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sync_error WHERE error_counter <= ?1",
                params![i64::from(max_tolerance)],
                |row| row.get(0),
            )
        })?;
        let count = count as u64;
        Ok(count.div_ceil(u64::from(self.page_size)) as u32)
    }

    fn page(&self, n: u32, max_tolerance: u32) -> Result<Vec<String>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::from(self.page_size);
        let offset = limit * i64::from(n - 1);
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT image_path FROM sync_error
                 WHERE error_counter <= ?1
                 ORDER BY sync_error_id ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let names = stmt
                .query_map(params![i64::from(max_tolerance), limit, offset], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    fn add(&self, name: &str) -> Result<(), StoreError> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO sync_error (image_path, error_counter) VALUES (?1, 0)
                 ON CONFLICT(image_path) DO UPDATE SET error_counter = error_counter + 1",
                params![name],
            )
        })?;
        Ok(())
    }

    fn set_counter(&self, name: &str, value: u32) -> Result<(), StoreError> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO sync_error (image_path, error_counter) VALUES (?1, ?2)
                 ON CONFLICT(image_path) DO UPDATE SET error_counter = excluded.error_counter",
                params![name, i64::from(value)],
            )
        })?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.db.with(|conn| {
            conn.execute("DELETE FROM sync_error WHERE image_path = ?1", params![name])
        })?;
        Ok(())
    }

    fn counter(&self, name: &str) -> Result<Option<u32>, StoreError> {
        let value: Option<i64> = self.db.with(|conn| {
            conn.query_row(
                "SELECT error_counter FROM sync_error WHERE image_path = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(value.map(|v| v as u32))
    }
}
