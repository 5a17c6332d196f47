use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use davcache_core::{CacheEntry, DavPath, RemoteFile, TransferProgress, DEFAULT_CONTENT_TYPE};
use davcache_infra::{FetchOutcome, RemoteStore};
use davcache_persistence::CacheCatalog;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consistency::ConsistencyChecker;
use crate::planner::LocalPathPlanner;
use crate::task::{DownloadStatus, DownloadTaskSnapshot, TaskGuard, TaskKey, TaskRegistry};
use crate::OfflineError;

/// Runs downloads into the cache, at most one per `(collection, path)`.
pub struct DownloadOrchestrator {
    catalog: Arc<dyn CacheCatalog>,
    planner: LocalPathPlanner,
    checker: ConsistencyChecker,
    registry: TaskRegistry,
}

impl DownloadOrchestrator {
    pub fn new(catalog: Arc<dyn CacheCatalog>, planner: LocalPathPlanner) -> Self {
        Self {
            checker: ConsistencyChecker::new(catalog.clone()),
            catalog,
            planner,
            registry: TaskRegistry::default(),
        }
    }

    /// Makes `file` available offline and returns its local path.
    ///
    /// Returns immediately when a valid copy already exists. A partially
    /// written file never outlives a failed or cancelled call, and the catalog
    /// only ever sees fully written files.
    pub async fn download<F>(
        &self,
        file: &RemoteFile,
        collection_id: &str,
        store: &dyn RemoteStore,
        on_progress: F,
    ) -> Result<Utf8PathBuf, OfflineError>
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        DavPath::validate_collection_id(collection_id)?;
        let remote_path = DavPath::canonicalize(&file.remote_path)?;
        let key = TaskKey::new(collection_id, &remote_path);

        let cancel = CancellationToken::new();
        if !self.registry.try_register(key.clone(), cancel.clone()) {
            return Err(OfflineError::AlreadyInProgress {
                collection_id: collection_id.to_string(),
                remote_path,
            });
        }
        let mut guard = TaskGuard::new(&self.registry, key.clone());

        if let Some(existing) = self.checker.check_and_reconcile(collection_id, &remote_path) {
            debug!("{}:{} already cached", collection_id, remote_path);
            guard.finish(DownloadStatus::Completed);
            return Ok(existing.local_path);
        }

        // Claim the destination before creating anything on disk so the
        // orphan sweep leaves it and its directories alone.
        let dest = self.planner.local_path(collection_id, &remote_path)?;
        self.registry.start(&key, dest.clone());
        if let Err(e) = self.planner.plan(collection_id, &remote_path) {
            guard.finish(DownloadStatus::Failed);
            return Err(failed(&remote_path, e));
        }
        guard.track_partial(dest.clone());
        info!("downloading {}:{} -> {}", collection_id, remote_path, dest);

        let report = |p: TransferProgress| {
            self.registry.record_progress(&key, p);
            on_progress(p);
        };
        let fetched = store.fetch(&remote_path, &dest, &report, &cancel).await;

        // Stores are free to ignore the token, so a completed stream still
        // counts as cancelled once a cancel was requested.
        if cancel.is_cancelled() {
            guard.finish(DownloadStatus::Cancelled);
            info!("download of {}:{} cancelled", collection_id, remote_path);
            return Err(OfflineError::DownloadCancelled { remote_path });
        }

        let outcome = match fetched {
            Ok(outcome) => outcome,
            Err(e) => {
                guard.finish(DownloadStatus::Failed);
                warn!("download of {}:{} failed: {}", collection_id, remote_path, e);
                return Err(failed(&remote_path, e));
            }
        };

        let size = match tokio::fs::metadata(dest.as_std_path()).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => {
                guard.finish(DownloadStatus::Failed);
                return Err(failed(&remote_path, "downloaded file is empty"));
            }
            Err(e) => {
                guard.finish(DownloadStatus::Failed);
                return Err(failed(&remote_path, e));
            }
        };
        if size != outcome.bytes_written {
            warn!(
                "{} reported {} bytes but {} are on disk",
                remote_path, outcome.bytes_written, size
            );
        }

        let entry = CacheEntry::new(
            collection_id,
            remote_path.as_str(),
            dest.clone(),
            size,
            content_type_for(file, &outcome),
        );
        if let Err(e) = self.commit(&entry) {
            guard.finish(DownloadStatus::Failed);
            return Err(failed(&remote_path, format!("catalog commit failed: {e}")));
        }

        guard.finish(DownloadStatus::Completed);
        info!("cached {}:{} ({} bytes)", collection_id, remote_path, size);
        Ok(dest)
    }

    /// Replaces whatever row exists for the entry's key. An older file at a
    /// different location is removed with it.
    fn commit(&self, entry: &CacheEntry) -> Result<(), OfflineError> {
        if let Some(old) = self
            .catalog
            .get_by_path(&entry.collection_id, &entry.remote_path)?
        {
            self.catalog.delete_by_id(&old.id)?;
            if old.local_path != entry.local_path {
                match std::fs::remove_file(old.local_path.as_std_path()) {
                    Ok(()) => self
                        .planner
                        .cleanup_in_collection(&old.local_path, &old.collection_id),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to remove replaced file {}: {}", old.local_path, e),
                }
            }
        }
        self.catalog.insert(entry)?;
        Ok(())
    }

    /// Requests cancellation of `remote_path` in every collection.
    pub fn cancel(&self, remote_path: &str) -> bool {
        let Ok(canonical) = DavPath::canonicalize(remote_path) else {
            return false;
        };
        self.registry.cancel_where(|k| k.remote_path == canonical) > 0
    }

    pub fn cancel_in(&self, collection_id: &str, remote_path: &str) -> bool {
        let Ok(canonical) = DavPath::canonicalize(remote_path) else {
            return false;
        };
        self.registry
            .cancel_where(|k| k.collection_id == collection_id && k.remote_path == canonical)
            > 0
    }

    pub fn cancel_collection(&self, collection_id: &str) -> usize {
        self.registry.cancel_where(|k| k.collection_id == collection_id)
    }

    pub fn cancel_all(&self) -> usize {
        let n = self.registry.cancel_where(|_| true);
        if n > 0 {
            info!("cancelling {} active downloads", n);
        }
        n
    }

    pub fn active_tasks(&self) -> Vec<DownloadTaskSnapshot> {
        self.registry.snapshots()
    }

    pub fn is_active(&self, collection_id: &str, remote_path: &str) -> bool {
        DavPath::canonicalize(remote_path)
            .map(|p| self.registry.contains(&TaskKey::new(collection_id, &p)))
            .unwrap_or(false)
    }

    pub(crate) fn active_local_paths(&self) -> Vec<Utf8PathBuf> {
        self.registry.local_paths()
    }

    /// See [`TaskRegistry::with_unclaimed`].
    pub(crate) fn with_unclaimed<T>(
        &self,
        path: &Utf8Path,
        f: impl FnOnce(&[&Utf8Path]) -> T,
    ) -> Option<T> {
        self.registry.with_unclaimed(path, f)
    }
}

fn failed(remote_path: &str, reason: impl std::fmt::Display) -> OfflineError {
    OfflineError::DownloadFailed {
        remote_path: remote_path.to_string(),
        reason: reason.to_string(),
    }
}

/// Listing type first, then the server header without parameters, then the
/// generic default.
fn content_type_for(file: &RemoteFile, outcome: &FetchOutcome) -> String {
    file.content_type
        .as_deref()
        .or(outcome.content_type.as_deref())
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
