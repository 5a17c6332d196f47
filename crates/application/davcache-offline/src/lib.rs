//! Offline copies of WebDAV files: where they live, how they get there and
//! how the catalog is kept honest about them.

mod consistency;
mod error;
mod facade;
mod orchestrator;
mod planner;
mod task;

pub use consistency::ConsistencyChecker;
pub use error::{OfflineError, OfflineErrorKind};
pub use facade::OfflineCache;
pub use orchestrator::DownloadOrchestrator;
pub use planner::LocalPathPlanner;
pub use task::{DownloadStatus, DownloadTaskSnapshot};

// Re-export the types callers need to talk to the cache
pub use davcache_core::{
    CacheEntry, CollectionUsage, EntryId, OfflineFile, RemoteFile, TransferProgress,
};
pub use davcache_infra::{FetchOutcome, RemoteError, RemoteStore};
