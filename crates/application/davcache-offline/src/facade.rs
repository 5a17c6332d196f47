use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use davcache_core::{
    CacheEntry, CollectionUsage, DavPath, EntryId, OfflineFile, RemoteFile, TransferProgress,
};
use davcache_infra::RemoteStore;
use davcache_persistence::{CacheCatalog, RedbCatalog, StorageErrorKind};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consistency::ConsistencyChecker;
use crate::orchestrator::DownloadOrchestrator;
use crate::planner::LocalPathPlanner;
use crate::task::DownloadTaskSnapshot;
use crate::OfflineError;

/// Entry point for everything offline: availability queries, downloads,
/// deletion and maintenance.
pub struct OfflineCache {
    catalog: Arc<dyn CacheCatalog>,
    planner: LocalPathPlanner,
    checker: ConsistencyChecker,
    orchestrator: DownloadOrchestrator,
}

impl OfflineCache {
    pub fn new(catalog: Arc<dyn CacheCatalog>, storage_root: impl Into<Utf8PathBuf>) -> Self {
        let planner = LocalPathPlanner::new(storage_root);
        Self {
            checker: ConsistencyChecker::new(catalog.clone()),
            orchestrator: DownloadOrchestrator::new(catalog.clone(), planner.clone()),
            catalog,
            planner,
        }
    }

    /// Opens (or creates) the catalog inside `storage_root`.
    pub fn open(storage_root: &Utf8Path) -> Result<Self, OfflineError> {
        std::fs::create_dir_all(storage_root)
            .map_err(|e| OfflineError::io(storage_root, e))?;
        let catalog = RedbCatalog::open(storage_root)?;
        Ok(Self::new(Arc::new(catalog), storage_root))
    }

    pub fn storage_root(&self) -> &Utf8Path {
        self.planner.root()
    }

    pub fn planner(&self) -> &LocalPathPlanner {
        &self.planner
    }

    pub fn is_available(&self, collection_id: &str, remote_path: &str) -> bool {
        self.checker
            .check_and_reconcile(collection_id, remote_path)
            .is_some()
    }

    pub fn local_path_for(&self, collection_id: &str, remote_path: &str) -> Option<Utf8PathBuf> {
        self.checker
            .check_and_reconcile(collection_id, remote_path)
            .map(|e| e.local_path)
    }

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
        self.orchestrator
            .download(file, collection_id, store, on_progress)
            .await
    }

    pub fn cancel(&self, remote_path: &str) -> bool {
        self.orchestrator.cancel(remote_path)
    }

    pub fn cancel_in(&self, collection_id: &str, remote_path: &str) -> bool {
        self.orchestrator.cancel_in(collection_id, remote_path)
    }

    pub fn cancel_all(&self) -> usize {
        self.orchestrator.cancel_all()
    }

    pub fn active_downloads(&self) -> Vec<DownloadTaskSnapshot> {
        self.orchestrator.active_tasks()
    }

    pub fn entry(&self, id: &EntryId) -> Result<CacheEntry, OfflineError> {
        self.catalog
            .get_by_id(id)?
            .ok_or(OfflineError::EntryNotFound(*id))
    }

    /// Catalog rows as recorded, without validating files.
    pub fn entries(&self, collection_id: Option<&str>) -> Result<Vec<CacheEntry>, OfflineError> {
        Ok(match collection_id {
            Some(id) => self.catalog.list_by_collection(id)?,
            None => self.catalog.list_all()?,
        })
    }

    /// Deletes one entry and its file. Returns false when no such entry.
    ///
    /// The file goes first; if it cannot be removed the row is kept.
    pub fn delete_entry(&self, id: &EntryId) -> Result<bool, OfflineError> {
        let Some(entry) = self.catalog.get_by_id(id)? else {
            return Ok(false);
        };
        match std::fs::remove_file(entry.local_path.as_std_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(OfflineError::io(&entry.local_path, e)),
        }
        self.planner
            .cleanup_in_collection(&entry.local_path, &entry.collection_id);
        let removed = self.catalog.delete_by_id(id)?;
        if removed {
            info!("deleted {}:{}", entry.collection_id, entry.remote_path);
        }
        Ok(removed)
    }

    /// Deletes every entry of a collection with its files, then the
    /// collection directory. Returns the number of rows removed.
    pub fn delete_all_for_collection(&self, collection_id: &str) -> Result<usize, OfflineError> {
        DavPath::validate_collection_id(collection_id)?;
        self.orchestrator.cancel_collection(collection_id);
        for entry in self.catalog.list_by_collection(collection_id)? {
            remove_file_logged(&entry.local_path);
        }
        self.planner.remove_collection_tree(collection_id);
        let removed = self.catalog.delete_by_collection(collection_id)?;
        info!("deleted {} entries of {}", removed, collection_id);
        Ok(removed)
    }

    /// Empties the cache. The catalog file itself stays.
    pub fn delete_all(&self) -> Result<usize, OfflineError> {
        self.orchestrator.cancel_all();
        for entry in self.catalog.list_all()? {
            remove_file_logged(&entry.local_path);
        }
        self.planner.remove_all();
        let removed = self.catalog.delete_all()?;
        info!("deleted all {} cache entries", removed);
        Ok(removed)
    }

    /// Sum of recorded sizes. Files are not re-measured.
    pub fn total_size(&self) -> Result<u64, OfflineError> {
        Ok(self.catalog.list_all()?.iter().map(|e| e.size_bytes).sum())
    }

    pub fn size_for_collection(&self, collection_id: &str) -> Result<u64, OfflineError> {
        Ok(self
            .catalog
            .list_by_collection(collection_id)?
            .iter()
            .map(|e| e.size_bytes)
            .sum())
    }

    pub fn usage(&self) -> Result<Vec<CollectionUsage>, OfflineError> {
        let mut by_collection: BTreeMap<String, CollectionUsage> = BTreeMap::new();
        for entry in self.catalog.list_all()? {
            let usage = by_collection
                .entry(entry.collection_id.clone())
                .or_insert_with(|| CollectionUsage {
                    collection_id: entry.collection_id.clone(),
                    ..Default::default()
                });
            usage.entries += 1;
            usage.bytes += entry.size_bytes;
        }
        Ok(by_collection.into_values().collect())
    }

    /// Drops every row whose file is missing or empty. Returns how many.
    pub fn reconcile_all(&self) -> Result<usize, OfflineError> {
        let mut removed = 0;
        for entry in self.catalog.list_all()? {
            if ConsistencyChecker::is_valid(&entry) {
                continue;
            }
            if self.checker.discard(&entry) {
                self.planner
                    .cleanup_in_collection(&entry.local_path, &entry.collection_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!("reconcile dropped {} stale entries", removed);
        }
        Ok(removed)
    }

    /// Annotates a remote listing with offline availability.
    ///
    /// Uses one catalog read for the whole listing. Stale rows found along the
    /// way are dropped off the calling thread when a tokio runtime is present.
    pub fn enrich(&self, files: Vec<RemoteFile>, collection_id: &str) -> Vec<OfflineFile> {
        let entries = match self.catalog.list_by_collection(collection_id) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read catalog for {}: {}", collection_id, e);
                Vec::new()
            }
        };
        let by_path: HashMap<String, CacheEntry> = entries
            .into_iter()
            .map(|e| (e.remote_path.clone(), e))
            .collect();

        let mut stale = Vec::new();
        let enriched = files
            .into_iter()
            .map(|file| {
                let hit = DavPath::canonicalize(&file.remote_path)
                    .ok()
                    .and_then(|p| by_path.get(&p));
                let local_path = match hit {
                    Some(entry) if ConsistencyChecker::is_valid(entry) => {
                        Some(entry.local_path.clone())
                    }
                    Some(entry) => {
                        stale.push(entry.clone());
                        None
                    }
                    None => None,
                };
                OfflineFile {
                    file,
                    offline: local_path.is_some(),
                    local_path,
                }
            })
            .collect();

        self.repair_later(stale);
        enriched
    }

    fn repair_later(&self, stale: Vec<CacheEntry>) {
        if stale.is_empty() {
            return;
        }
        let checker = self.checker.clone();
        let job = move || {
            for entry in &stale {
                checker.discard(entry);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    /// Removes files under collection directories that no entry or running
    /// download accounts for. Returns the number of files removed.
    pub fn remove_orphan_files(&self) -> Result<usize, OfflineError> {
        // Active first: a download that finishes after this read has its row
        // in the catalog snapshot below.
        let active: HashSet<Utf8PathBuf> =
            self.orchestrator.active_local_paths().into_iter().collect();
        let known: HashSet<Utf8PathBuf> = self
            .catalog
            .list_all()?
            .into_iter()
            .map(|e| e.local_path)
            .collect();

        let root = self.planner.root();
        let collections = match std::fs::read_dir(root.as_std_path()) {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(OfflineError::io(root, e)),
        };

        let mut removed = 0;
        for dir in collections.flatten() {
            let Ok(collection_root) = Utf8PathBuf::from_path_buf(dir.path()) else {
                continue;
            };
            if !collection_root.is_dir() {
                continue;
            }
            for item in WalkDir::new(&collection_root).into_iter().flatten() {
                if !item.file_type().is_file() {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::from_path_buf(item.into_path()) else {
                    continue;
                };
                if known.contains(&path) || active.contains(&path) {
                    continue;
                }
                if self.remove_orphan(&path, &collection_root) {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("removed {} orphaned files", removed);
        }
        Ok(removed)
    }

    /// Deletes `path` unless a download claims it or the catalog has gained a
    /// row for it since the sweep started.
    fn remove_orphan(&self, path: &Utf8Path, collection_root: &Utf8Path) -> bool {
        let outcome = self.orchestrator.with_unclaimed(path, |claimed| {
            if self.is_recorded(path) {
                return None;
            }
            let result = std::fs::remove_file(path);
            if result.is_ok() {
                self.planner
                    .cleanup_empty_ancestors_except(path, collection_root, |dir| {
                        claimed.iter().any(|c| c.starts_with(dir))
                    });
            }
            Some(result)
        });
        match outcome.flatten() {
            Some(Ok(())) => {
                debug!("removed orphan {}", path);
                true
            }
            Some(Err(e)) => {
                warn!("failed to remove orphan {}: {}", path, e);
                false
            }
            None => {
                debug!("keeping {}, it is in use", path);
                false
            }
        }
    }

    fn is_recorded(&self, path: &Utf8Path) -> bool {
        let Some((collection_id, remote_path)) = self.planner.locate(path) else {
            return false;
        };
        match self.catalog.get_by_path(&collection_id, &remote_path) {
            Ok(Some(entry)) => entry.local_path == path,
            Ok(None) => false,
            Err(e) if e.kind() == StorageErrorKind::InvalidPath => false,
            Err(e) => {
                warn!("cannot check {} against the catalog: {}", path, e);
                true
            }
        }
    }
}

fn remove_file_logged(path: &Utf8Path) {
    match std::fs::remove_file(path.as_std_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove cached file {}: {}", path, e),
    }
}
