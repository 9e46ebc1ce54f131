use crate::db::Database;
use crate::{format_timestamp, StoreError};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

const SQL_DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only history of sync timestamps.
///
/// The current value is the most recently appended entry, or the configured
/// default when the history is empty.
pub trait Watermark: Send + Sync {
    fn current(&self) -> Result<NaiveDateTime, StoreError>;
    fn append(&self, ts: &NaiveDateTime) -> Result<(), StoreError>;
    /// Delete only the newest entry. A no-op on an empty history.
    fn reset(&self) -> Result<(), StoreError>;
    /// Formatted entries, newest first.
    fn history(&self) -> Result<Vec<String>, StoreError>;
}

pub struct SqliteWatermark {
    db: Arc<Database>,
    default: NaiveDateTime,
}

impl SqliteWatermark {
    pub fn new(db: Arc<Database>, default: NaiveDateTime) -> Self {
        Self { db, default }
    }

    pub fn default_value(&self) -> NaiveDateTime {
        self.default
    }
}

fn parse_sql_date(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, SQL_DATE_LAYOUT)
        .map_err(|_| StoreError::InvalidTimestamp(value.to_owned()))
}

impl Watermark for SqliteWatermark {
    fn current(&self) -> Result<NaiveDateTime, StoreError> {
        let latest: Option<String> = self.db.with(|conn| {
            conn.query_row(
                "SELECT last_sync_date FROM last_sync ORDER BY last_sync_id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
        })?;
        match latest {
            Some(value) => parse_sql_date(&value),
            None => Ok(self.default),
        }
    }

    fn append(&self, ts: &NaiveDateTime) -> Result<(), StoreError> {
        let value = ts.format(SQL_DATE_LAYOUT).to_string();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO last_sync (last_sync_date) VALUES (?1)",
                params![value],
            )
        })?;
        Ok(())
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.db.with(|conn| {
            conn.execute(
                "DELETE FROM last_sync
                 WHERE last_sync_id = (SELECT MAX(last_sync_id) FROM last_sync)",
                [],
            )
        })?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<String>, StoreError> {
        let raw = self.db.with(|conn| {
            let mut stmt =
                conn.prepare("SELECT last_sync_date FROM last_sync ORDER BY last_sync_id DESC")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        raw.iter()
            .map(|value| parse_sql_date(value).map(|ts| format_timestamp(&ts)))
            .collect()
    }
}
