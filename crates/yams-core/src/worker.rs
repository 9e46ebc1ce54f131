use crate::stats::{Outcome, SyncStats};
use std::time::Duration;
use tracing::{info, warn};
use yams_remote::{ErrorKind, RemoteStore};
use yams_store::{ChecksumCache, ErrorLog, Image};

/// Everything one image upload touches.
///
/// Borrowed by every worker thread of a pass; nothing here is mutated except
/// through the stores' own synchronization and the atomic stats.
pub struct Worker<'a> {
    pub remote: &'a dyn RemoteStore,
    pub error_log: &'a dyn ErrorLog,
    pub cache: &'a dyn ChecksumCache,
    pub cache_ttl: Duration,
    pub stats: &'a SyncStats,
}

impl Worker<'_> {
    /// Upload one image and reconcile its error mark and cache entry.
    ///
    /// `retry` is set for images coming from the error log; a successful
    /// upload then counts as recovered rather than sent.
    pub fn process_one(&self, image: &Image, retry: bool) -> Outcome {
        let outcome = self.upload(image, retry);
        self.stats.record(outcome);
        info!(
            image = image.name(),
            outcome = outcome.as_str(),
            retry,
            "processed"
        );
        outcome
    }

    fn upload(&self, image: &Image, retry: bool) -> Outcome {
        let name = image.name();

        match self.cache.get(name) {
            Ok(Some(cached)) if cached == image.checksum() => return Outcome::Skipped,
            Ok(_) => {}
            Err(e) => warn!("{name}: checksum cache lookup failed: {e}"),
        }

        match self.remote.put(image) {
            Ok(()) => {
                self.clear_mark(name);
                self.remember(image);
                if retry {
                    Outcome::Recovered
                } else {
                    Outcome::Sent
                }
            }
            Err(e) if e.kind() == ErrorKind::Duplicate => self.reconcile(image),
            Err(e) => {
                warn!("{name}: upload failed: {e}");
                self.mark(name);
                Outcome::FailedUpload
            }
        }
    }

    /// The remote refused the upload as a duplicate: compare checksums.
    fn reconcile(&self, image: &Image) -> Outcome {
        let name = image.name();
        let remote_md5 = match self.remote.head(name) {
            Ok(md5) => md5,
            Err(e) => {
                warn!("{name}: duplicate but HEAD failed: {e}");
                self.mark(name);
                return Outcome::FailedUpload;
            }
        };

        if remote_md5.is_empty() {
            self.clear_mark(name);
            return Outcome::Duplicated;
        }

        if !remote_md5.eq_ignore_ascii_case(image.checksum()) {
            warn!(
                "{name}: remote checksum {remote_md5} differs from local {}, deleting remote copy",
                image.checksum()
            );
            return match self.remote.delete(name, true) {
                Ok(()) => {
                    if let Err(e) = self.error_log.set_counter(name, 0) {
                        warn!("{name}: failed to schedule re-upload: {e}");
                    }
                    Outcome::ReuploadScheduled
                }
                Err(e) => {
                    warn!("{name}: failed to delete mismatched remote copy: {e}");
                    self.mark(name);
                    Outcome::FailedUpload
                }
            };
        }

        self.clear_mark(name);
        self.remember(image);
        Outcome::Duplicated
    }

    fn mark(&self, name: &str) {
        if let Err(e) = self.error_log.add(name) {
            warn!("{name}: failed to record error: {e}");
        }
    }

    fn clear_mark(&self, name: &str) {
        if let Err(e) = self.error_log.remove(name) {
            warn!("{name}: failed to clear error mark: {e}");
        }
    }

    fn remember(&self, image: &Image) {
        if let Err(e) = self
            .cache
            .set(image.name(), image.checksum(), self.cache_ttl)
        {
            warn!("{}: failed to cache checksum: {e}", image.name());
        }
    }
}
