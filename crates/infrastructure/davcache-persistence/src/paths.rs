use davcache_core::DavPath;

pub fn canonical_remote_path(remote_path: &str) -> Result<String, crate::StorageError> {
    Ok(DavPath::canonicalize(remote_path)?)
}

pub fn validate_collection_id(collection_id: &str) -> Result<(), crate::StorageError> {
    Ok(DavPath::validate_collection_id(collection_id)?)
}
