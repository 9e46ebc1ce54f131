pub mod completions;
pub mod delete;
pub mod delete_all;
pub mod list;
pub mod reset_watermark;
pub mod sync;
pub mod watermark;

use crate::settings::{CacheBackend, Settings};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use yams_core::{CoreError, ShutdownStack};
use yams_remote::{ErrorKind, RemoteConfig, RemoteError, YamsClient};
use yams_store::{
    ChecksumCache, Database, LocalImageStore, MemoryChecksumCache, SqliteChecksumCache,
    SqliteErrorLog, SqliteWatermark, StoreError,
};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_REMOTE_ERROR: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Render a count, dimmed when zero and red when it counts failures.
pub fn colorize_count(count: u64, failure: bool) -> String {
    use console::Style;
    let text = count.to_string();
    if count == 0 {
        Style::new().dim().apply_to(text).to_string()
    } else if failure {
        Style::new().red().bold().apply_to(text).to_string()
    } else {
        Style::new().green().apply_to(text).to_string()
    }
}

// Error messages carry a prefix that `main` maps to an exit code.

pub fn remote_error(e: &RemoteError) -> String {
    if e.kind() == ErrorKind::Config {
        format!("config error: {e}")
    } else {
        format!("remote error: {e}")
    }
}

pub fn store_error(e: &StoreError) -> String {
    format!("store error: {e}")
}

pub fn core_error(e: &CoreError) -> String {
    match e {
        CoreError::Remote(r) => remote_error(r),
        CoreError::Store(s) => store_error(s),
        CoreError::Shutdown(_) => e.to_string(),
        CoreError::Io(_)
        | CoreError::ImageList { .. }
        | CoreError::Scan(_)
        | CoreError::Locked(_) => format!("store error: {e}"),
    }
}

pub fn load_settings() -> Result<Settings, String> {
    Settings::from_env().map_err(|e| remote_error(&e))
}

pub fn load_remote_config() -> Result<RemoteConfig, String> {
    RemoteConfig::from_env().map_err(|e| remote_error(&e))
}

/// Client for the configured bucket, reading images below `SYNC_IMAGES_ROOT`.
pub fn remote_client(
    settings: &Settings,
    config: RemoteConfig,
) -> Result<(YamsClient, Arc<LocalImageStore>), String> {
    let images = Arc::new(LocalImageStore::new(&settings.images_root));
    let client = YamsClient::new(config, Arc::clone(&images) as _).map_err(|e| remote_error(&e))?;
    Ok((client, images))
}

/// The SQLite-backed local state of a run.
pub struct LocalState {
    pub db: Arc<Database>,
    pub error_log: Arc<SqliteErrorLog>,
    pub watermark: Arc<SqliteWatermark>,
}

impl LocalState {
    /// Open the database and register its closer on `stack`.
    pub fn open(settings: &Settings, stack: &mut ShutdownStack) -> Result<Self, String> {
        let db = Arc::new(Database::open(&settings.db_path).map_err(|e| store_error(&e))?);
        let closer = Arc::clone(&db);
        stack.push("database", move || closer.close().map_err(CoreError::from));
        Ok(Self {
            error_log: Arc::new(SqliteErrorLog::new(Arc::clone(&db), settings.page_size)),
            watermark: Arc::new(SqliteWatermark::new(
                Arc::clone(&db),
                settings.default_watermark,
            )),
            db,
        })
    }

    pub fn cache(&self, settings: &Settings) -> Arc<dyn ChecksumCache> {
        match settings.cache_backend {
            CacheBackend::Sqlite => Arc::new(SqliteChecksumCache::new(
                Arc::clone(&self.db),
                settings.cache_prefix.clone(),
            )),
            CacheBackend::Memory => Arc::new(MemoryChecksumCache::new(settings.cache_prefix.clone())),
        }
    }
}
