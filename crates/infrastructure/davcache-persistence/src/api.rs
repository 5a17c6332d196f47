use davcache_core::{CacheEntry, EntryId};

pub const CATALOG_REDB_FILENAME: &str = davcache_core::CATALOG_FILE_NAME;
pub const CURRENT_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Missing,
    Valid,
    Busy,
    Corrupt,
    NewerSchema { found: u32, supported: u32 },
}

/// Durable mapping from `(collection_id, remote_path)` to a [`CacheEntry`].
///
/// Implementations serialize their own writes and must not return from
/// `insert` before the row is durable. Remote paths are canonicalized by the
/// implementation, so callers may pass them as received.
pub trait CacheCatalog: Send + Sync {
    fn get_by_path(
        &self,
        collection_id: &str,
        remote_path: &str,
    ) -> Result<Option<CacheEntry>, crate::StorageError>;

    fn get_by_id(&self, id: &EntryId) -> Result<Option<CacheEntry>, crate::StorageError>;

    /// Stores `entry`, replacing any row with the same collection and path.
    fn insert(&self, entry: &CacheEntry) -> Result<(), crate::StorageError>;

    /// Returns whether a row was removed.
    fn delete_by_id(&self, id: &EntryId) -> Result<bool, crate::StorageError>;

    /// Returns the number of rows removed.
    fn delete_by_collection(&self, collection_id: &str) -> Result<usize, crate::StorageError>;

    fn delete_all(&self) -> Result<usize, crate::StorageError>;

    fn list_all(&self) -> Result<Vec<CacheEntry>, crate::StorageError>;

    fn list_by_collection(&self, collection_id: &str)
        -> Result<Vec<CacheEntry>, crate::StorageError>;
}
