//! Local settings read from `SYNC_*` environment variables.
//!
//! Remote settings (`YAMS_*`) are loaded separately, and only by the commands
//! that talk to the bucket.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use yams_remote::config::{lookup_var, parse_var, Lookup};
use yams_remote::RemoteError;
use yams_store::{parse_timestamp, DEFAULT_PAGE_SIZE};

pub const DEFAULT_DB_PATH: &str = "yams-sync.db";
pub const DEFAULT_CACHE_PREFIX: &str = "yams:md5:";
pub const DEFAULT_WATERMARK: &str = "19700101T000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Sqlite,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub images_root: PathBuf,
    pub cache_backend: CacheBackend,
    pub cache_prefix: String,
    pub cache_ttl: Duration,
    pub page_size: u32,
    pub max_retry_pages: u32,
    pub default_watermark: NaiveDateTime,
}

impl Settings {
    pub fn from_env() -> Result<Self, RemoteError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, RemoteError> {
        let text = |name: &str, default: &str| -> Result<String, RemoteError> {
            Ok(lookup_var(lookup, name)?
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_owned()))
        };

        let watermark = text("SYNC_DEFAULT_WATERMARK", DEFAULT_WATERMARK)?;
        let default_watermark = parse_timestamp(&watermark).map_err(|_| {
            RemoteError::Config(format!(
                "SYNC_DEFAULT_WATERMARK: invalid value '{watermark}', expected YYYYMMDDTHHMMSS"
            ))
        })?;

        Ok(Self {
            db_path: PathBuf::from(text("SYNC_DB_PATH", DEFAULT_DB_PATH)?),
            images_root: PathBuf::from(text("SYNC_IMAGES_ROOT", ".")?),
            cache_backend: parse_var(lookup, "SYNC_CACHE_BACKEND", CacheBackend::Sqlite)?,
            cache_prefix: text("SYNC_CACHE_PREFIX", DEFAULT_CACHE_PREFIX)?,
            cache_ttl: Duration::from_secs(parse_var(
                lookup,
                "SYNC_CACHE_TTL",
                yams_core::engine::DEFAULT_CACHE_TTL.as_secs(),
            )?),
            page_size: parse_var(lookup, "SYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE)?.max(1),
            max_retry_pages: parse_var(
                lookup,
                "SYNC_MAX_RETRY_PAGES",
                yams_core::engine::DEFAULT_MAX_RETRY_PAGES,
            )?,
            default_watermark,
        })
    }
}
