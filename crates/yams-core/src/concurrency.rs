use crate::CoreError;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Exclusive advisory lock held for the duration of a run.
pub struct RunLock {
    lock_file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file guarding the database at `db_path`: `<db path>.lock`.
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = OsString::from(db_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            })),
            Err(_) => Ok(None),
        }
    }

    /// Take the lock for `db_path` or fail fast if another run holds it.
    pub fn for_database(db_path: &Path) -> Result<Self, CoreError> {
        let path = Self::path_for(db_path);
        Self::try_acquire(&path)?.ok_or(CoreError::Locked(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing in-flight images...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

type Closer = Box<dyn FnOnce() -> Result<(), CoreError> + Send>;

/// Resources to release when a command finishes, closed newest first.
#[derive(Default)]
pub struct ShutdownStack {
    closers: Vec<(String, Closer)>,
}

impl ShutdownStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        closer: impl FnOnce() -> Result<(), CoreError> + Send + 'static,
    ) {
        self.closers.push((name.into(), Box::new(closer)));
    }

    pub fn len(&self) -> usize {
        self.closers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closers.is_empty()
    }

    /// Run every closer in LIFO order. All closers run even when one fails;
    /// the first failure is returned.
    pub fn close_all(&mut self) -> Result<(), CoreError> {
        let mut first_err = None;
        while let Some((name, closer)) = self.closers.pop() {
            debug!("closing {name}");
            if let Err(e) = closer() {
                warn!("failed to close {name}: {e}");
                first_err.get_or_insert(CoreError::Shutdown(format!("{name}: {e}")));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for ShutdownStack {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
