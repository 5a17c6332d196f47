use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod path_utils;
pub mod progress;

pub use path_utils::{DavPath, PathError, CATALOG_FILE_NAME};
pub use progress::TransferProgress;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Opaque identifier of a cache entry. Generated once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One offline copy of a remote file.
///
/// Entries are immutable once committed. A re-download produces a new entry
/// (with a new id) that replaces the old one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub id: EntryId,
    pub collection_id: String,
    pub remote_path: String,
    pub local_path: Utf8PathBuf,
    pub size_bytes: u64,
    pub content_type: String,
    pub downloaded_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        collection_id: impl Into<String>,
        remote_path: impl Into<String>,
        local_path: impl Into<Utf8PathBuf>,
        size_bytes: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            collection_id: collection_id.into(),
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            size_bytes,
            content_type: content_type.into(),
            downloaded_at: Utc::now(),
        }
    }
}

/// A file as reported by a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub remote_path: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

impl RemoteFile {
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            size: None,
            content_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A listing entry annotated with its offline availability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineFile {
    #[serde(flatten)]
    pub file: RemoteFile,
    pub offline: bool,
    pub local_path: Option<Utf8PathBuf>,
}

/// Aggregate of the recorded sizes of one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionUsage {
    pub collection_id: String,
    pub entries: u64,
    pub bytes: u64,
}
