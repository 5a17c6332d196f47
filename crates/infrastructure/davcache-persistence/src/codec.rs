use davcache_core::CacheEntry;

use crate::StorageError;

pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(entry)?)
}

pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}
