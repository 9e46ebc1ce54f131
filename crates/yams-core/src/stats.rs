use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Uploaded by the forward pass.
    Sent,
    /// Uploaded by the retry pass; its error mark was cleared.
    Recovered,
    /// Checksum cache says the remote already has these bytes.
    Skipped,
    /// Remote already had an identical object.
    Duplicated,
    /// Remote had different bytes; they were deleted and the image is queued
    /// for the next run.
    ReuploadScheduled,
    FailedUpload,
    NotFound,
    ReadFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Sent => "sent",
            Outcome::Recovered => "recovered",
            Outcome::Skipped => "skipped",
            Outcome::Duplicated => "duplicated",
            Outcome::ReuploadScheduled => "reupload_scheduled",
            Outcome::FailedUpload => "failed_upload",
            Outcome::NotFound => "not_found",
            Outcome::ReadFailed => "read_failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-pass counters, incremented concurrently by workers.
#[derive(Debug, Default)]
pub struct SyncStats {
    sent: AtomicU64,
    recovered: AtomicU64,
    skipped: AtomicU64,
    duplicated: AtomicU64,
    reupload_scheduled: AtomicU64,
    failed_upload: AtomicU64,
    not_found: AtomicU64,
    read_failed: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Sent => &self.sent,
            Outcome::Recovered => &self.recovered,
            Outcome::Skipped => &self.skipped,
            Outcome::Duplicated => &self.duplicated,
            Outcome::ReuploadScheduled => &self.reupload_scheduled,
            Outcome::FailedUpload => &self.failed_upload,
            Outcome::NotFound => &self.not_found,
            Outcome::ReadFailed => &self.read_failed,
        }
    }

    pub fn record(&self, outcome: Outcome) {
        self.counter(outcome).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counter(outcome).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.get(Outcome::Sent),
            recovered: self.get(Outcome::Recovered),
            skipped: self.get(Outcome::Skipped),
            duplicated: self.get(Outcome::Duplicated),
            reupload_scheduled: self.get(Outcome::ReuploadScheduled),
            failed_upload: self.get(Outcome::FailedUpload),
            not_found: self.get(Outcome::NotFound),
            read_failed: self.get(Outcome::ReadFailed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub recovered: u64,
    pub skipped: u64,
    pub duplicated: u64,
    pub reupload_scheduled: u64,
    pub failed_upload: u64,
    pub not_found: u64,
    pub read_failed: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.sent
            + self.recovered
            + self.skipped
            + self.duplicated
            + self.reupload_scheduled
            + self.failed_upload
            + self.not_found
            + self.read_failed
    }

    /// Images whose failure left an error-log mark.
    pub fn failures(&self) -> u64 {
        self.failed_upload + self.reupload_scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_records_are_not_lost() {
        let stats = Arc::new(SyncStats::new());
        std::thread::scope(|s| {
            for _ in 0..8 {
                let stats = Arc::clone(&stats);
                s.spawn(move || {
                    for _ in 0..1000 {
                        stats.record(Outcome::Sent);
                    }
                });
            }
        });
        assert_eq!(stats.get(Outcome::Sent), 8000);
    }

    #[test]
    fn snapshot_reflects_each_counter() {
        let stats = SyncStats::new();
        stats.record(Outcome::Skipped);
        stats.record(Outcome::Duplicated);
        stats.record(Outcome::Duplicated);
        stats.record(Outcome::NotFound);
        let snap = stats.snapshot();
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.duplicated, 2);
        assert_eq!(snap.not_found, 1);
        assert_eq!(snap.total(), 4);
        assert_eq!(snap.failures(), 0);
    }

    #[test]
    fn snapshot_serializes_snake_case() {
        let stats = SyncStats::new();
        stats.record(Outcome::ReuploadScheduled);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["reupload_scheduled"], 1);
        assert_eq!(Outcome::FailedUpload.to_string(), "failed_upload");
    }
}
