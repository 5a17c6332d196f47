use davcache_core::PathError;

/// Failures of the on-disk catalog.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The file exists but is not a catalog this code can read.
    #[error("catalog file is damaged or not a catalog")]
    Corrupt,
    #[error("catalog schema {found} is newer than supported schema {supported}")]
    NewerSchema { found: u32, supported: u32 },
    /// redb holds an exclusive lock on the file. Within one process the
    /// handle cache prevents this, so the holder is normally another process.
    #[error("catalog file is held open by another handle")]
    Busy,
    #[error("invalid catalog key: {0}")]
    InvalidPath(#[from] PathError),
    #[error("catalog io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog row could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("catalog backend failed: {0}")]
    Backend(Box<redb::Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Corrupt,
    NewerSchema,
    Busy,
    InvalidPath,
    Io,
    Codec,
    Backend,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Corrupt => StorageErrorKind::Corrupt,
            StorageError::NewerSchema { .. } => StorageErrorKind::NewerSchema,
            StorageError::Busy => StorageErrorKind::Busy,
            StorageError::InvalidPath(_) => StorageErrorKind::InvalidPath,
            StorageError::Io(_) => StorageErrorKind::Io,
            StorageError::Codec(_) => StorageErrorKind::Codec,
            StorageError::Backend(_) => StorageErrorKind::Backend,
        }
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(value: redb::DatabaseError) -> Self {
        match value {
            redb::DatabaseError::DatabaseAlreadyOpen => Self::Busy,
            other => Self::Backend(Box::new(other.into())),
        }
    }
}

// Everything else redb reports funnels into its umbrella error.
macro_rules! backend_error {
    ($($source:ty),+ $(,)?) => {$(
        impl From<$source> for StorageError {
            fn from(value: $source) -> Self {
                Self::Backend(Box::new(value.into()))
            }
        }
    )+};
}

backend_error!(
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
