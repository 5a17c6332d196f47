#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use davcache_offline::{
    CacheEntry, EntryId, FetchOutcome, OfflineCache, RemoteError, RemoteStore, TransferProgress,
};
use davcache_persistence::{CacheCatalog, RedbCatalog, StorageError};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// In-memory remote. Writes the first half of `body`, optionally parks on
/// `gate`, then writes the rest.
pub struct MockStore {
    body: Vec<u8>,
    calls: AtomicUsize,
    started: Arc<Notify>,
    gate: Option<Arc<Notify>>,
    honor_cancel: bool,
    fail_status: Option<u16>,
}

impl MockStore {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            calls: AtomicUsize::new(0),
            started: Arc::new(Notify::new()),
            gate: None,
            honor_cancel: false,
            fail_status: None,
        }
    }

    /// Parks each fetch after the first half until `release` is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn honoring_cancel(mut self) -> Self {
        self.honor_cancel = true;
        self
    }

    pub fn failing(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MockStore {
    async fn fetch(
        &self,
        remote_path: &str,
        dest: &Utf8Path,
        on_progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = Some(self.body.len() as u64);
        let io = |source| RemoteError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let half = self.body.len() / 2;
        tokio::fs::write(dest, &self.body[..half]).await.map_err(io)?;
        on_progress(TransferProgress::new(half as u64, total));
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            if self.honor_cancel {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                    _ = gate.notified() => {}
                }
            } else {
                gate.notified().await;
            }
        }

        if let Some(status) = self.fail_status {
            return Err(RemoteError::Status {
                status,
                url: remote_path.to_string(),
            });
        }

        tokio::fs::write(dest, &self.body).await.map_err(io)?;
        on_progress(TransferProgress::new(self.body.len() as u64, total));
        Ok(FetchOutcome {
            bytes_written: self.body.len() as u64,
            content_type: None,
        })
    }
}

pub fn temp_root() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("offline")).unwrap();
    (dir, root)
}

pub fn open_cache() -> (TempDir, OfflineCache) {
    let (dir, root) = temp_root();
    let cache = OfflineCache::open(&root).unwrap();
    (dir, cache)
}

/// Blocks the calling thread until `cond` holds, failing after five seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Redb catalog that runs a one-shot hook after taking the `list_all`
/// snapshot and before handing it back.
pub struct HookedCatalog {
    inner: RedbCatalog,
    after_list: Mutex<Option<Hook>>,
}

impl HookedCatalog {
    pub fn open(root: &Utf8Path) -> Self {
        Self {
            inner: RedbCatalog::open(root).unwrap(),
            after_list: Mutex::new(None),
        }
    }

    pub fn after_next_list(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_list.lock().unwrap() = Some(Box::new(hook));
    }
}

impl CacheCatalog for HookedCatalog {
    fn get_by_path(
        &self,
        collection_id: &str,
        remote_path: &str,
    ) -> Result<Option<CacheEntry>, StorageError> {
        self.inner.get_by_path(collection_id, remote_path)
    }

    fn get_by_id(&self, id: &EntryId) -> Result<Option<CacheEntry>, StorageError> {
        self.inner.get_by_id(id)
    }

    fn insert(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.inner.insert(entry)
    }

    fn delete_by_id(&self, id: &EntryId) -> Result<bool, StorageError> {
        self.inner.delete_by_id(id)
    }

    fn delete_by_collection(&self, collection_id: &str) -> Result<usize, StorageError> {
        self.inner.delete_by_collection(collection_id)
    }

    fn delete_all(&self) -> Result<usize, StorageError> {
        self.inner.delete_all()
    }

    fn list_all(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let rows = self.inner.list_all()?;
        let hook = self.after_list.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(rows)
    }

    fn list_by_collection(&self, collection_id: &str) -> Result<Vec<CacheEntry>, StorageError> {
        self.inner.list_by_collection(collection_id)
    }
}
