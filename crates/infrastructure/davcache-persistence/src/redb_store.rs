use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use davcache_core::{CacheEntry, EntryId};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::api::{DbState, CATALOG_REDB_FILENAME, CURRENT_SCHEMA};
use crate::cache_key::CatalogKey;
use crate::codec::{decode_entry, encode_entry};
use crate::maintenance::quarantine_corrupt_file;
use crate::paths::{canonical_remote_path, validate_collection_id};
use crate::{CacheCatalog, StorageError};

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const ENTRY_IDS: TableDefinition<&str, &[u8]> = TableDefinition::new("entry_ids");

const META_FORMAT_KEY: &str = "format";
const META_FORMAT_VALUE: &str = "davcache-catalog";
const META_SCHEMA_VERSION: &str = "schema_version";
const META_CREATED_AT: &str = "created_at";

/// Catalog backed by a single redb file at `<root>/catalog.redb`.
#[derive(Clone)]
pub struct RedbCatalog {
    path: Utf8PathBuf,
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCatalog").field("path", &self.path).finish()
    }
}

impl RedbCatalog {
    fn is_corrupt_open_error(err: &redb::DatabaseError) -> bool {
        match err {
            redb::DatabaseError::Storage(storage) => match storage {
                redb::StorageError::Corrupted(_) => true,
                redb::StorageError::Io(ioe) => matches!(
                    ioe.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ),
                _ => false,
            },
            _ => false,
        }
    }

    // redb refuses a second `Database` on the same file within one process,
    // so handles are shared per path.
    fn db_cache() -> &'static Mutex<HashMap<Utf8PathBuf, Arc<Database>>> {
        static CACHE: OnceLock<Mutex<HashMap<Utf8PathBuf, Arc<Database>>>> = OnceLock::new();
        CACHE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub fn path_for_root(root: &Utf8Path) -> Utf8PathBuf {
        root.join(CATALOG_REDB_FILENAME)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Opens the catalog under `root`, creating it when missing.
    ///
    /// A corrupt or foreign file is quarantined and replaced by an empty
    /// catalog; the cached files it described become orphans that
    /// `remove_orphan_files` style sweeps can reclaim.
    pub fn open(root: &Utf8Path) -> Result<Self, StorageError> {
        let path = Self::path_for_root(root);
        std::fs::create_dir_all(root.as_std_path())?;

        let mut cache = Self::db_cache().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.get(&path) {
            if path.exists() {
                return Ok(Self {
                    path,
                    db: existing.clone(),
                });
            }
            cache.remove(&path);
        }

        let db = match Self::open_file(&path) {
            Ok(db) => db,
            Err(StorageError::Corrupt) => {
                quarantine_corrupt_file(&path)?;
                Self::open_file(&path)?
            }
            Err(e) => return Err(e),
        };
        let db = Arc::new(db);
        cache.insert(path.clone(), db.clone());
        tracing::debug!("catalog opened at {}", path);
        Ok(Self { path, db })
    }

    fn open_file(path: &Utf8Path) -> Result<Database, StorageError> {
        let db = if path.exists() {
            match Database::open(path.as_std_path()) {
                Ok(db) => db,
                Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                    return Err(StorageError::Busy);
                }
                Err(e) if Self::is_corrupt_open_error(&e) => return Err(StorageError::Corrupt),
                Err(e) => return Err(e.into()),
            }
        } else {
            Database::create(path.as_std_path())?
        };
        Self::ensure_schema(&db)?;
        Ok(db)
    }

    /// Reports the state of the catalog file without creating it.
    pub fn validate(root: &Utf8Path) -> Result<DbState, StorageError> {
        let path = Self::path_for_root(root);
        if !path.exists() {
            return Ok(DbState::Missing);
        }
        {
            let mut cache = Self::db_cache().lock().unwrap_or_else(|e| e.into_inner());
            if cache.contains_key(&path) {
                if !path.exists() {
                    cache.remove(&path);
                    return Ok(DbState::Missing);
                }
                return Ok(DbState::Valid);
            }
        }

        match Database::open(path.as_std_path()) {
            Ok(db) => match Self::ensure_schema(&db) {
                Ok(()) => Ok(DbState::Valid),
                Err(StorageError::NewerSchema { found, supported }) => {
                    Ok(DbState::NewerSchema { found, supported })
                }
                Err(StorageError::Busy) => Ok(DbState::Busy),
                Err(StorageError::Corrupt) => {
                    drop(db);
                    let _ = quarantine_corrupt_file(&path);
                    Ok(DbState::Corrupt)
                }
                Err(e) => Err(e),
            },
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => Ok(DbState::Busy),
            Err(e) if Self::is_corrupt_open_error(&e) => {
                let _ = quarantine_corrupt_file(&path);
                Ok(DbState::Corrupt)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_schema(db: &Database) -> Result<(), StorageError> {
        let write_tx = db.begin_write()?;
        {
            let mut meta = write_tx.open_table(META)?;
            let format: Option<String> = meta.get(META_FORMAT_KEY)?.map(|g| g.value().to_string());
            if format.is_none() {
                let schema_version = CURRENT_SCHEMA.to_string();
                let created_at = Utc::now().to_rfc3339();
                meta.insert(META_FORMAT_KEY, META_FORMAT_VALUE)?;
                meta.insert(META_SCHEMA_VERSION, schema_version.as_str())?;
                meta.insert(META_CREATED_AT, created_at.as_str())?;
            } else if format.as_deref() != Some(META_FORMAT_VALUE) {
                return Err(StorageError::Corrupt);
            }
        }
        let _ = write_tx.open_table(ENTRIES)?;
        let _ = write_tx.open_table(ENTRY_IDS)?;
        write_tx.commit()?;

        let read_tx = db.begin_read()?;
        let meta = read_tx.open_table(META)?;
        let schema_version = meta
            .get(META_SCHEMA_VERSION)?
            .and_then(|g| g.value().parse::<u32>().ok())
            .unwrap_or(0);
        if schema_version == 0 {
            return Err(StorageError::Corrupt);
        }
        if schema_version > CURRENT_SCHEMA {
            return Err(StorageError::NewerSchema {
                found: schema_version,
                supported: CURRENT_SCHEMA,
            });
        }
        if schema_version != CURRENT_SCHEMA {
            return Err(StorageError::Corrupt);
        }
        Ok(())
    }

    fn collect_range(
        &self,
        collection_id: Option<&str>,
    ) -> Result<Vec<CacheEntry>, StorageError> {
        let bounds = collection_id
            .map(CatalogKey::range_for_collection)
            .transpose()?;
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(ENTRIES)?;
        let rows = match &bounds {
            Some((start, end)) => table.range(start.as_slice()..end.as_slice())?,
            None => table.iter()?,
        };
        let mut out = Vec::new();
        for row in rows {
            let (_, v) = row?;
            out.push(decode_entry(v.value())?);
        }
        Ok(out)
    }

    fn remove_range(&self, collection_id: Option<&str>) -> Result<usize, StorageError> {
        let bounds = collection_id
            .map(CatalogKey::range_for_collection)
            .transpose()?;
        let write_tx = self.db.begin_write()?;
        let removed;
        {
            let mut entries = write_tx.open_table(ENTRIES)?;
            let mut ids = write_tx.open_table(ENTRY_IDS)?;
            let mut doomed = Vec::new();
            let rows = match &bounds {
                Some((start, end)) => entries.range(start.as_slice()..end.as_slice())?,
                None => entries.iter()?,
            };
            for row in rows {
                let (k, v) = row?;
                let id = decode_entry(v.value())?.id;
                doomed.push((k.value().to_vec(), id));
            }
            for (key, id) in &doomed {
                let _ = entries.remove(key.as_slice())?;
                let _ = ids.remove(id.to_string().as_str())?;
            }
            removed = doomed.len();
        }
        write_tx.commit()?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<u64, StorageError> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(ENTRIES)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl CacheCatalog for RedbCatalog {
    fn get_by_path(
        &self,
        collection_id: &str,
        remote_path: &str,
    ) -> Result<Option<CacheEntry>, StorageError> {
        validate_collection_id(collection_id)?;
        let remote_path = canonical_remote_path(remote_path)?;
        let key = CatalogKey::new(collection_id, &remote_path).to_bytes();
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(ENTRIES)?;
        let guard = table.get(key.as_slice())?;
        guard.map(|g| decode_entry(g.value())).transpose()
    }

    fn get_by_id(&self, id: &EntryId) -> Result<Option<CacheEntry>, StorageError> {
        let read_tx = self.db.begin_read()?;
        let ids = read_tx.open_table(ENTRY_IDS)?;
        let Some(key) = ids.get(id.to_string().as_str())?.map(|g| g.value().to_vec()) else {
            return Ok(None);
        };
        let entries = read_tx.open_table(ENTRIES)?;
        let guard = entries.get(key.as_slice())?;
        guard.map(|g| decode_entry(g.value())).transpose()
    }

    fn insert(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        validate_collection_id(&entry.collection_id)?;
        let remote_path = canonical_remote_path(&entry.remote_path)?;
        let key = CatalogKey::new(&entry.collection_id, &remote_path).to_bytes();
        let mut entry = entry.clone();
        entry.remote_path = remote_path;
        let value = encode_entry(&entry)?;

        let write_tx = self.db.begin_write()?;
        {
            let mut entries = write_tx.open_table(ENTRIES)?;
            let mut ids = write_tx.open_table(ENTRY_IDS)?;
            let replaced: Option<Vec<u8>> = entries
                .insert(key.as_slice(), value.as_slice())?
                .map(|g| g.value().to_vec());
            if let Some(old) = replaced {
                let old = decode_entry(&old)?;
                if old.id != entry.id {
                    let _ = ids.remove(old.id.to_string().as_str())?;
                }
            }
            ids.insert(entry.id.to_string().as_str(), key.as_slice())?;
        }
        write_tx.commit()?;
        Ok(())
    }

    fn delete_by_id(&self, id: &EntryId) -> Result<bool, StorageError> {
        let write_tx = self.db.begin_write()?;
        let removed;
        {
            let mut ids = write_tx.open_table(ENTRY_IDS)?;
            let key: Option<Vec<u8>> = ids
                .remove(id.to_string().as_str())?
                .map(|g| g.value().to_vec());
            removed = match key {
                Some(key) => {
                    let mut entries = write_tx.open_table(ENTRIES)?;
                    let _ = entries.remove(key.as_slice())?;
                    true
                }
                None => false,
            };
        }
        write_tx.commit()?;
        Ok(removed)
    }

    fn delete_by_collection(&self, collection_id: &str) -> Result<usize, StorageError> {
        self.remove_range(Some(collection_id))
    }

    fn delete_all(&self) -> Result<usize, StorageError> {
        self.remove_range(None)
    }

    fn list_all(&self) -> Result<Vec<CacheEntry>, StorageError> {
        self.collect_range(None)
    }

    fn list_by_collection(&self, collection_id: &str) -> Result<Vec<CacheEntry>, StorageError> {
        self.collect_range(Some(collection_id))
    }
}
