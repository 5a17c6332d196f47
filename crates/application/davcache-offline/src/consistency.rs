use std::sync::Arc;

use davcache_core::CacheEntry;
use davcache_persistence::CacheCatalog;
use tracing::{info, warn};

/// Read-repair between the catalog and the files on disk.
///
/// An entry is only trusted when its file still exists, is a regular file and
/// is non-empty. Anything else is stale and its row gets dropped on sight.
#[derive(Clone)]
pub struct ConsistencyChecker {
    catalog: Arc<dyn CacheCatalog>,
}

impl ConsistencyChecker {
    pub fn new(catalog: Arc<dyn CacheCatalog>) -> Self {
        Self { catalog }
    }

    pub fn is_valid(entry: &CacheEntry) -> bool {
        match std::fs::metadata(entry.local_path.as_std_path()) {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// The entry for `(collection_id, remote_path)` if its file is usable.
    ///
    /// A stale row is deleted before returning `None`. Catalog failures are
    /// logged and reported as "not cached".
    pub fn check_and_reconcile(&self, collection_id: &str, remote_path: &str) -> Option<CacheEntry> {
        let entry = match self.catalog.get_by_path(collection_id, remote_path) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(
                    "catalog lookup for {}:{} failed: {}",
                    collection_id, remote_path, e
                );
                return None;
            }
        };
        if Self::is_valid(&entry) {
            return Some(entry);
        }
        self.discard(&entry);
        None
    }

    /// Drops the row of a stale entry. Best-effort.
    pub(crate) fn discard(&self, entry: &CacheEntry) -> bool {
        match self.catalog.delete_by_id(&entry.id) {
            Ok(removed) => {
                if removed {
                    info!(
                        "dropped stale cache entry {}:{} ({})",
                        entry.collection_id, entry.remote_path, entry.local_path
                    );
                }
                removed
            }
            Err(e) => {
                warn!("failed to drop stale entry {}: {}", entry.id, e);
                false
            }
        }
    }
}
