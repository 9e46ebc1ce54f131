//! Operator actions on the remote bucket.

use crate::pool::dispatch;
use crate::CoreError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use yams_remote::{RemoteObject, RemoteStore};

pub fn list_remote(remote: &dyn RemoteStore) -> Result<Vec<RemoteObject>, CoreError> {
    Ok(remote.list()?)
}

pub fn delete_object(remote: &dyn RemoteStore, name: &str, force: bool) -> Result<(), CoreError> {
    remote.delete(name, force)?;
    info!("deleted {name} (force={force})");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteAllReport {
    pub deleted: usize,
    /// Names whose deletion failed.
    pub failed: Vec<String>,
}

/// Force-delete every object the bucket lists, `threads` at a time.
pub fn delete_all(remote: &dyn RemoteStore, threads: usize) -> Result<DeleteAllReport, CoreError> {
    let objects = remote.list()?;
    info!("deleting {} remote object(s)", objects.len());

    let deleted = AtomicUsize::new(0);
    let failed = Mutex::new(Vec::new());
    dispatch(
        threads.min(remote.max_concurrency()),
        |d| {
            for object in objects {
                if !d.send(object.id) {
                    break;
                }
            }
        },
        |name: String| match remote.delete(&name, true) {
            Ok(()) => {
                deleted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("failed to delete {name}: {e}");
                if let Ok(mut failed) = failed.lock() {
                    failed.push(name);
                }
            }
        },
    );

    let mut failed = failed.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
    failed.sort();
    Ok(DeleteAllReport {
        deleted: deleted.into_inner(),
        failed,
    })
}
