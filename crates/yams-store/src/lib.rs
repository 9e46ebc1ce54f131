//! Local state for yams-sync.
//!
//! This crate provides everything the sync engine reads or persists on the local
//! side: the `LocalImageStore` over the two-char prefix image tree, the
//! `ImageListScanner` over the pre-built image list, and the SQLite-backed
//! `ErrorLog`, `Watermark` and `ChecksumCache` that make runs resumable.

pub mod cache;
pub mod db;
pub mod error_log;
pub mod images;
pub mod layout;
pub mod scanner;
pub mod watermark;

pub use cache::{ChecksumCache, MemoryChecksumCache, SqliteChecksumCache};
pub use db::{Database, SCHEMA_VERSION};
pub use error_log::{ErrorLog, SqliteErrorLog, DEFAULT_PAGE_SIZE};
pub use images::{Image, ImageMetadata, ImageOpener, LocalImageStore};
pub use layout::ImageLayout;
pub use scanner::{parse_list_line, ImageListScanner, ListEntry};
pub use watermark::{SqliteWatermark, Watermark};

use chrono::NaiveDateTime;
use thiserror::Error;

/// Timestamp layout used by the image list and the watermark history.
pub const TIMESTAMP_LAYOUT: &str = "%Y%m%dT%H%M%S";

/// Parse a `YYYYMMDDTHHMMSS` timestamp.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_LAYOUT)
        .map_err(|_| StoreError::InvalidTimestamp(value.to_owned()))
}

/// Format a timestamp with [`TIMESTAMP_LAYOUT`].
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_LAYOUT).to_string()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image name '{0}' is shorter than the two-char directory prefix")]
    ShortName(String),
    #[error("failed to open image '{name}': {source}")]
    ImageOpen {
        name: String,
        source: std::io::Error,
    },
    #[error("failed to stat image '{name}': {source}")]
    ImageStat {
        name: String,
        source: std::io::Error,
    },
    #[error("failed to read image '{name}': {source}")]
    ImageRead {
        name: String,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: i64, found: i64 },
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("database is closed")]
    Closed,
}

impl StoreError {
    /// Whether the error means the local image does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::ShortName(_) => true,
            StoreError::ImageOpen { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
