use crate::paths::validate_collection_id;

pub const CATALOG_KEY_SEPARATOR: u8 = 0;

/// Row key: `collection_id \0 remote_path`.
///
/// Collection ids never contain NUL, so every row of a collection sorts inside
/// `[id \0, id \x01)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogKey<'a> {
    pub collection_id: &'a str,
    pub remote_path: &'a str,
}

impl<'a> CatalogKey<'a> {
    pub fn new(collection_id: &'a str, remote_path: &'a str) -> Self {
        Self {
            collection_id,
            remote_path,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.collection_id.len() + 1 + self.remote_path.len());
        key.extend_from_slice(self.collection_id.as_bytes());
        key.push(CATALOG_KEY_SEPARATOR);
        key.extend_from_slice(self.remote_path.as_bytes());
        key
    }

    pub fn range_for_collection(
        collection_id: &str,
    ) -> Result<(Vec<u8>, Vec<u8>), crate::StorageError> {
        validate_collection_id(collection_id)?;
        let mut start = Vec::with_capacity(collection_id.len() + 1);
        start.extend_from_slice(collection_id.as_bytes());
        let mut end = start.clone();
        start.push(CATALOG_KEY_SEPARATOR);
        end.push(CATALOG_KEY_SEPARATOR + 1);
        Ok((start, end))
    }
}
