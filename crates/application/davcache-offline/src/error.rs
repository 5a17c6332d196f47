use camino::Utf8PathBuf;
use davcache_core::{EntryId, PathError};
use davcache_persistence::StorageError;

/// Errors surfaced by the offline cache.
///
/// Only user-actionable outcomes end up here. Bookkeeping failures (stale row
/// cleanup, empty directory pruning) are logged and absorbed where they occur.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("a download of {remote_path} in {collection_id} is already in progress")]
    AlreadyInProgress {
        collection_id: String,
        remote_path: String,
    },
    #[error("download of {remote_path} failed: {reason}")]
    DownloadFailed { remote_path: String, reason: String },
    #[error("download of {remote_path} was cancelled")]
    DownloadCancelled { remote_path: String },
    #[error("cache entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("catalog error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineErrorKind {
    AlreadyInProgress,
    DownloadFailed,
    Cancelled,
    NotFound,
    InvalidInput,
    Storage,
    Io,
}

impl OfflineError {
    pub fn kind(&self) -> OfflineErrorKind {
        match self {
            OfflineError::AlreadyInProgress { .. } => OfflineErrorKind::AlreadyInProgress,
            OfflineError::DownloadFailed { .. } => OfflineErrorKind::DownloadFailed,
            OfflineError::DownloadCancelled { .. } => OfflineErrorKind::Cancelled,
            OfflineError::EntryNotFound(_) => OfflineErrorKind::NotFound,
            OfflineError::InvalidPath(_) => OfflineErrorKind::InvalidInput,
            OfflineError::Storage(_) => OfflineErrorKind::Storage,
            OfflineError::Io { .. } => OfflineErrorKind::Io,
        }
    }

    /// Whether trying the same operation again later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            OfflineErrorKind::AlreadyInProgress
                | OfflineErrorKind::DownloadFailed
                | OfflineErrorKind::Cancelled
        )
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        OfflineError::Io {
            path: path.into(),
            source,
        }
    }
}
