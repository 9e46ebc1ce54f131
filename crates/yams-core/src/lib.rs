//! Sync orchestration for yams-sync.
//!
//! This crate ties the local side (`yams-store`) to the remote bucket
//! (`yams-remote`) through the `SyncEngine`: a retry pass over the error log,
//! then a forward pass over the image list, both fanned out to a bounded worker
//! pool. It also provides the run lock, SIGINT handling, the LIFO shutdown
//! stack and the remote maintenance operations used by the CLI.

pub mod concurrency;
pub mod engine;
pub mod maintenance;
pub mod pool;
pub mod stats;
pub mod worker;

pub use concurrency::{install_signal_handler, shutdown_requested, RunLock, ShutdownStack};
pub use engine::{PassReport, SyncEngine, SyncOptions, SyncReport};
pub use maintenance::{delete_all, delete_object, list_remote, DeleteAllReport};
pub use pool::{dispatch, Dispatcher};
pub use stats::{Outcome, StatsSnapshot, SyncStats};
pub use worker::Worker;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] yams_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] yams_remote::RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot open image list {}: {source}", path.display())]
    ImageList {
        path: PathBuf,
        source: yams_store::StoreError,
    },
    #[error("failed reading image list: {0}")]
    Scan(std::io::Error),
    #[error("another sync holds the lock at {}", .0.display())]
    Locked(PathBuf),
    #[error("{0}")]
    Shutdown(String),
}
