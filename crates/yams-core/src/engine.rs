use crate::pool::dispatch;
use crate::stats::{Outcome, StatsSnapshot, SyncStats};
use crate::worker::Worker;
use crate::CoreError;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use yams_remote::RemoteStore;
use yams_store::{
    format_timestamp, parse_list_line, ChecksumCache, ErrorLog, Image, LocalImageStore,
    StoreError, Watermark,
};

pub const DEFAULT_LIMIT: usize = 10_000;
pub const DEFAULT_TOLERANCE: u32 = 3;
pub const DEFAULT_MAX_RETRY_PAGES: u32 = 10;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Most images the forward pass dispatches.
    pub limit: usize,
    pub threads: usize,
    /// Error-log entries with a counter above this are not retried.
    pub tolerance: u32,
    pub max_retry_pages: u32,
    pub cache_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            threads: yams_remote::config::DEFAULT_MAX_CONCURRENCY,
            tolerance: DEFAULT_TOLERANCE,
            max_retry_pages: DEFAULT_MAX_RETRY_PAGES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub dispatched: usize,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub retry: PassReport,
    pub forward: PassReport,
    pub watermark_before: String,
    pub watermark_after: String,
}

type StopSignal = Box<dyn Fn() -> bool + Send + Sync>;

/// One-way synchronizer from the local image tree to a remote bucket.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    images: Arc<LocalImageStore>,
    error_log: Arc<dyn ErrorLog>,
    watermark: Arc<dyn Watermark>,
    cache: Arc<dyn ChecksumCache>,
    options: SyncOptions,
    stop: StopSignal,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        images: Arc<LocalImageStore>,
        error_log: Arc<dyn ErrorLog>,
        watermark: Arc<dyn Watermark>,
        cache: Arc<dyn ChecksumCache>,
        options: SyncOptions,
    ) -> Self {
        Self {
            remote,
            images,
            error_log,
            watermark,
            cache,
            options,
            stop: Box::new(crate::shutdown_requested),
        }
    }

    /// Replace the process-wide SIGINT flag as the signal to stop dispatching.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.stop = Box::new(stop);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Worker count: bounded by the request, the limit and the remote.
    pub fn threads(&self) -> usize {
        self.options
            .threads
            .min(self.options.limit)
            .min(self.remote.max_concurrency())
            .max(1)
    }

    fn worker<'a>(&'a self, stats: &'a SyncStats) -> Worker<'a> {
        Worker {
            remote: self.remote.as_ref(),
            error_log: self.error_log.as_ref(),
            cache: self.cache.as_ref(),
            cache_ttl: self.options.cache_ttl,
            stats,
        }
    }

    /// Retry pass, then forward pass, then commit the watermark.
    pub fn run(&self, image_list: &Path) -> Result<SyncReport, CoreError> {
        let watermark_before = format_timestamp(&self.watermark.current()?);
        info!(
            "sync starting: watermark {watermark_before}, {} threads",
            self.threads()
        );

        let retry = self.retry_pass()?;
        let forward = self.forward_pass(image_list)?;
        let watermark_after = format_timestamp(&self.watermark.current()?);

        info!(
            "sync finished: {} retried, {} dispatched, watermark {watermark_before} -> {watermark_after}",
            retry.dispatched, forward.dispatched
        );
        Ok(SyncReport {
            retry,
            forward,
            watermark_before,
            watermark_after,
        })
    }

    /// Re-attempt every image in the error log still within tolerance.
    ///
    /// Names are read up front so that workers removing entries cannot shift
    /// later pages.
    pub fn retry_pass(&self) -> Result<PassReport, CoreError> {
        let tolerance = self.options.tolerance;
        let pages = self
            .error_log
            .pages_count(tolerance)?
            .min(self.options.max_retry_pages);
        let mut names = Vec::new();
        for page in 1..=pages {
            names.extend(self.error_log.page(page, tolerance)?);
        }
        debug!("retry pass: {pages} page(s), {} image(s)", names.len());

        let stats = SyncStats::new();
        let worker = self.worker(&stats);
        let dispatched = dispatch(
            self.threads(),
            |d| {
                for name in &names {
                    if (self.stop)() {
                        warn!("shutdown requested, stopping retry pass");
                        break;
                    }
                    if let Some(image) = self.fetch(name, &stats) {
                        if !d.send(image) {
                            break;
                        }
                    }
                }
                d.dispatched()
            },
            |image: Image| {
                worker.process_one(&image, true);
            },
        );

        let report = PassReport {
            dispatched,
            stats: stats.snapshot(),
        };
        log_pass("retry", &report);
        Ok(report)
    }

    /// Stream the image list, upload entries newer than the watermark and
    /// advance it to the newest dispatched timestamp.
    pub fn forward_pass(&self, image_list: &Path) -> Result<PassReport, CoreError> {
        let mut scanner =
            LocalImageStore::open_list(image_list).map_err(|source| CoreError::ImageList {
                path: image_list.to_path_buf(),
                source,
            })?;
        let watermark = self.watermark.current()?;
        let limit = self.options.limit;

        let stats = SyncStats::new();
        let worker = self.worker(&stats);
        let (dispatched, latest) = dispatch(
            self.threads(),
            |d| {
                let mut latest: Option<NaiveDateTime> = None;
                while d.dispatched() < limit && scanner.scan() {
                    if (self.stop)() {
                        warn!("shutdown requested, stopping forward pass");
                        break;
                    }
                    let Some(entry) = parse_list_line(scanner.text()) else {
                        continue;
                    };
                    if entry.timestamp <= watermark {
                        continue;
                    }
                    let Some(image) = self.fetch(&entry.image_name, &stats) else {
                        continue;
                    };
                    if !d.send(image) {
                        break;
                    }
                    latest = latest.max(Some(entry.timestamp));
                }
                (d.dispatched(), latest)
            },
            |image: Image| {
                worker.process_one(&image, false);
            },
        );

        if let Some(e) = scanner.take_err() {
            return Err(CoreError::Scan(e));
        }

        if let Some(latest) = latest.filter(|ts| *ts > watermark) {
            self.watermark.append(&latest)?;
            info!("watermark advanced to {}", format_timestamp(&latest));
        }

        let report = PassReport {
            dispatched,
            stats: stats.snapshot(),
        };
        log_pass("forward", &report);
        Ok(report)
    }

    fn fetch(&self, name: &str, stats: &SyncStats) -> Option<Image> {
        match self.images.get(name) {
            Ok(image) => Some(image),
            Err(e) => {
                let outcome = local_failure(&e);
                stats.record(outcome);
                warn!(image = name, outcome = outcome.as_str(), "{e}");
                None
            }
        }
    }
}

fn local_failure(e: &StoreError) -> Outcome {
    if e.is_not_found() {
        Outcome::NotFound
    } else {
        Outcome::ReadFailed
    }
}

fn log_pass(pass: &str, report: &PassReport) {
    let s = &report.stats;
    info!(
        pass,
        dispatched = report.dispatched,
        sent = s.sent,
        recovered = s.recovered,
        skipped = s.skipped,
        duplicated = s.duplicated,
        reupload_scheduled = s.reupload_scheduled,
        failed_upload = s.failed_upload,
        not_found = s.not_found,
        read_failed = s.read_failed,
        "pass complete"
    );
}
