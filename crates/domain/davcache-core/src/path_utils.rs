#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains parent directory traversal '..': {0}")]
    Traversal(String),
    #[error("path contains a NUL byte: {0:?}")]
    Nul(String),
    #[error("invalid collection id: {0:?}")]
    InvalidCollectionId(String),
}

/// File name of the catalog database inside the storage root. It shares the
/// root with the collection directories, so no collection may take its name.
pub const CATALOG_FILE_NAME: &str = "catalog.redb";

pub struct DavPath;

impl DavPath {
    /// Standardize directory separators to forward slashes.
    pub fn normalize(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// Canonical absolute form of a remote file path: `/a/b/c.ext`.
    ///
    /// Empty and `.` segments are dropped. `..` is rejected rather than
    /// resolved so a listing can never address something outside the
    /// collection's tree.
    pub fn canonicalize(path: &str) -> Result<String, PathError> {
        if path.contains('\0') {
            return Err(PathError::Nul(path.to_string()));
        }
        let normalized = Self::normalize(path);
        let mut out = String::with_capacity(normalized.len() + 1);
        for seg in normalized.split('/') {
            match seg {
                "" | "." => continue,
                ".." => return Err(PathError::Traversal(path.to_string())),
                s => {
                    out.push('/');
                    out.push_str(s);
                }
            }
        }
        if out.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(out)
    }

    /// Segments of an already canonical path, without the leading slash.
    pub fn segments(canonical: &str) -> impl Iterator<Item = &str> {
        canonical.split('/').filter(|s| !s.is_empty())
    }

    /// Collection ids become a directory name under the storage root, next
    /// to the catalog and its quarantined copies.
    pub fn validate_collection_id(id: &str) -> Result<(), PathError> {
        let reserved = id == CATALOG_FILE_NAME
            || id
                .strip_prefix(CATALOG_FILE_NAME)
                .is_some_and(|rest| rest.starts_with('.'));
        let bad = reserved
            || id.is_empty()
            || id == "."
            || id == ".."
            || id
                .chars()
                .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control());
        if bad {
            return Err(PathError::InvalidCollectionId(id.to_string()));
        }
        Ok(())
    }
}
