//! In-process doubles shared by the engine and maintenance tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use yams_core::{SyncEngine, SyncOptions};
use yams_remote::{ErrorKind, RemoteError, RemoteObject, RemoteStore};
use yams_store::{
    parse_timestamp, Database, Image, LocalImageStore, MemoryChecksumCache, SqliteErrorLog,
    SqliteWatermark,
};

pub const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

pub fn error_of(kind: ErrorKind, name: &str) -> RemoteError {
    let name = name.to_owned();
    match kind {
        ErrorKind::Duplicate => RemoteError::Duplicate(name),
        ErrorKind::Internal => RemoteError::Internal(name),
        ErrorKind::ImageRead => RemoteError::ImageRead(name),
        ErrorKind::Connection => RemoteError::Connection(name),
        ErrorKind::Unauthorized => RemoteError::Unauthorized(name),
        ErrorKind::BucketNotFound => RemoteError::BucketNotFound(name),
        ErrorKind::ObjectNotFound => RemoteError::ObjectNotFound(name),
        ErrorKind::Signing => RemoteError::Signing(name),
        ErrorKind::Config => RemoteError::Config(name),
    }
}

/// Bucket double: behaves like the object API and journals every call.
pub struct FakeRemote {
    objects: Mutex<BTreeMap<String, String>>,
    put_failures: Mutex<HashMap<String, ErrorKind>>,
    head_failure: Mutex<Option<ErrorKind>>,
    delete_failures: Mutex<HashMap<String, ErrorKind>>,
    calls: Mutex<Vec<String>>,
    max_concurrency: usize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::with_concurrency(8)
    }

    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            put_failures: Mutex::new(HashMap::new()),
            head_failure: Mutex::new(None),
            delete_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            max_concurrency,
        }
    }

    /// Pretend the bucket already stores `name` with checksum `md5`.
    pub fn preload(&self, name: &str, md5: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_owned(), md5.to_owned());
    }

    pub fn fail_put(&self, name: &str, kind: ErrorKind) {
        self.put_failures
            .lock()
            .unwrap()
            .insert(name.to_owned(), kind);
    }

    pub fn fail_head(&self, kind: ErrorKind) {
        *self.head_failure.lock().unwrap() = Some(kind);
    }

    pub fn fail_delete(&self, name: &str, kind: ErrorKind) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(name.to_owned(), kind);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn stored(&self, name: &str) -> Option<String> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    fn journal(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RemoteStore for FakeRemote {
    fn put(&self, image: &Image) -> Result<(), RemoteError> {
        let name = image.name();
        self.journal(format!("PUT {name}"));
        if let Some(kind) = self.put_failures.lock().unwrap().get(name) {
            return Err(error_of(*kind, name));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(name) {
            return Err(RemoteError::Duplicate(name.to_owned()));
        }
        objects.insert(name.to_owned(), image.checksum().to_owned());
        Ok(())
    }

    fn delete(&self, name: &str, force: bool) -> Result<(), RemoteError> {
        self.journal(format!("DELETE {name} force={force}"));
        if let Some(kind) = self.delete_failures.lock().unwrap().get(name) {
            return Err(error_of(*kind, name));
        }
        match self.objects.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(RemoteError::ObjectNotFound(name.to_owned())),
        }
    }

    fn head(&self, name: &str) -> Result<String, RemoteError> {
        self.journal(format!("HEAD {name}"));
        if let Some(kind) = *self.head_failure.lock().unwrap() {
            return Err(error_of(kind, name));
        }
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::ObjectNotFound(name.to_owned()))
    }

    fn list(&self) -> Result<Vec<RemoteObject>, RemoteError> {
        self.journal("LIST".to_owned());
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, md5)| RemoteObject {
                id: name.clone(),
                md5: md5.clone(),
                size: 0,
                last_modified: 0,
            })
            .collect())
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

/// Temp image tree, in-memory database and a fake bucket.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: Arc<Database>,
    pub remote: Arc<FakeRemote>,
    pub images: Arc<LocalImageStore>,
    pub error_log: Arc<SqliteErrorLog>,
    pub watermark: Arc<SqliteWatermark>,
    pub cache: Arc<MemoryChecksumCache>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let epoch = parse_timestamp("19700101T000000").unwrap();
        Self {
            images: Arc::new(LocalImageStore::new(dir.path().join("images"))),
            error_log: Arc::new(SqliteErrorLog::new(Arc::clone(&db), page_size)),
            watermark: Arc::new(SqliteWatermark::new(Arc::clone(&db), epoch)),
            cache: Arc::new(MemoryChecksumCache::new("yams:md5:")),
            remote: Arc::new(FakeRemote::new()),
            db,
            dir,
        }
    }

    /// Write `bytes` at `<root>/<first two chars>/<name>`.
    pub fn write_image(&self, name: &str, bytes: &[u8]) {
        let path = self.images.layout().image_path(name).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn write_list(&self, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join("images.lst");
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        path
    }

    pub fn engine(&self, options: SyncOptions) -> SyncEngine {
        SyncEngine::new(
            Arc::clone(&self.remote) as Arc<dyn RemoteStore>,
            Arc::clone(&self.images),
            Arc::clone(&self.error_log) as _,
            Arc::clone(&self.watermark) as _,
            Arc::clone(&self.cache) as _,
            options,
        )
        .with_stop_signal(|| false)
    }
}

pub fn options(threads: usize) -> SyncOptions {
    SyncOptions {
        threads,
        ..SyncOptions::default()
    }
}
