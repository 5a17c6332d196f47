use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use davcache_core::{DavPath, PathError};
use tracing::{debug, warn};

use crate::OfflineError;

/// Maps `(collection_id, remote_path)` to a location under the storage root.
///
/// Layout: `<root>/<collection_id>/<remote path without leading slash>`.
/// Removing a whole collection is one subtree removal because of it.
#[derive(Debug, Clone)]
pub struct LocalPathPlanner {
    root: Utf8PathBuf,
}

impl LocalPathPlanner {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_root(&self, collection_id: &str) -> Result<Utf8PathBuf, PathError> {
        DavPath::validate_collection_id(collection_id)?;
        Ok(self.root.join(collection_id))
    }

    /// Where the copy of `remote_path` lives. Pure; touches nothing on disk.
    pub fn local_path(
        &self,
        collection_id: &str,
        remote_path: &str,
    ) -> Result<Utf8PathBuf, PathError> {
        let mut path = self.collection_root(collection_id)?;
        let canonical = DavPath::canonicalize(remote_path)?;
        for seg in DavPath::segments(&canonical) {
            path.push(seg);
        }
        Ok(path)
    }

    /// Inverse of [`local_path`](Self::local_path): the collection id and
    /// canonical remote path a file under the root belongs to.
    pub fn locate(&self, local: &Utf8Path) -> Option<(String, String)> {
        let rel = local.strip_prefix(&self.root).ok()?;
        let mut parts = rel.components().map(|c| c.as_str());
        let collection_id = parts.next()?.to_string();
        let remote_path: String = parts.map(|p| format!("/{p}")).collect();
        if remote_path.is_empty() {
            return None;
        }
        Some((collection_id, remote_path))
    }

    /// Like [`local_path`](Self::local_path), and creates the parent
    /// directories so the result can be written to immediately.
    pub fn plan(&self, collection_id: &str, remote_path: &str) -> Result<Utf8PathBuf, OfflineError> {
        let path = self.local_path(collection_id, remote_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| OfflineError::io(parent, e))?;
        }
        Ok(path)
    }

    /// Removes directories left empty after deleting `path`, walking upward.
    ///
    /// Stops at the first non-empty directory or at `stop_at`, which is never
    /// removed itself. Does nothing when `path` is not below `stop_at`.
    pub fn cleanup_empty_ancestors(&self, path: &Utf8Path, stop_at: &Utf8Path) {
        self.cleanup_empty_ancestors_except(path, stop_at, |_| false);
    }

    /// Like [`cleanup_empty_ancestors`](Self::cleanup_empty_ancestors), but
    /// also stops at the first directory `keep` asks to retain.
    pub fn cleanup_empty_ancestors_except(
        &self,
        path: &Utf8Path,
        stop_at: &Utf8Path,
        keep: impl Fn(&Utf8Path) -> bool,
    ) {
        if !path.starts_with(stop_at) || !stop_at.starts_with(&self.root) {
            return;
        }
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop_at || !current.starts_with(stop_at) || keep(current) {
                break;
            }
            match fs::remove_dir(current) {
                Ok(()) => debug!("pruned empty cache directory {}", current),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(_) => break,
            }
            dir = current.parent();
        }
    }

    /// Ancestor cleanup bounded by the collection root of `collection_id`.
    pub fn cleanup_in_collection(&self, path: &Utf8Path, collection_id: &str) {
        if let Ok(stop_at) = self.collection_root(collection_id) {
            self.cleanup_empty_ancestors(path, &stop_at);
        }
    }

    /// Deletes `<root>/<collection_id>` and everything below it.
    pub fn remove_collection_tree(&self, collection_id: &str) {
        let dir = match self.collection_root(collection_id) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("not removing cache tree: {}", e);
                return;
            }
        };
        remove_tree(&dir);
    }

    /// Deletes every collection directory under the root. Regular files
    /// directly in the root (the catalog) are left alone.
    pub fn remove_all(&self) {
        let entries = match fs::read_dir(self.root.as_std_path()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!("cannot list cache root {}: {}", self.root, e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Utf8PathBuf::from_path_buf(path) {
                Ok(dir) => remove_tree(&dir),
                Err(path) => warn!("skipping non UTF-8 cache directory {}", path.display()),
            }
        }
    }
}

fn remove_tree(dir: &Utf8Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("removed cache tree {}", dir),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove cache tree {}: {}", dir, e),
    }
}
