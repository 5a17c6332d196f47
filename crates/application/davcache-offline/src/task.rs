use camino::{Utf8Path, Utf8PathBuf};
use davcache_core::TransferProgress;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    /// Status only moves forward; terminal states are final.
    fn can_become(self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (Pending | InProgress, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey {
    pub collection_id: String,
    pub remote_path: String,
}

impl TaskKey {
    pub fn new(collection_id: &str, remote_path: &str) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            remote_path: remote_path.to_string(),
        }
    }
}

#[derive(Debug)]
struct DownloadTask {
    status: DownloadStatus,
    progress: TransferProgress,
    local_path: Option<Utf8PathBuf>,
    cancel: CancellationToken,
}

/// Point-in-time view of an in-flight download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTaskSnapshot {
    pub collection_id: String,
    pub remote_path: String,
    pub status: DownloadStatus,
    pub progress: TransferProgress,
    pub local_path: Option<Utf8PathBuf>,
    pub cancel_requested: bool,
}

/// In-flight downloads keyed by `(collection_id, remote_path)`.
///
/// Every method takes the lock for a short, non-async critical section.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, DownloadTask>>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, DownloadTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a pending task unless one exists for `key`. Check and insert
    /// happen under one lock acquisition.
    pub fn try_register(&self, key: TaskKey, cancel: CancellationToken) -> bool {
        let mut tasks = self.lock();
        if tasks.contains_key(&key) {
            return false;
        }
        tasks.insert(
            key,
            DownloadTask {
                status: DownloadStatus::Pending,
                progress: TransferProgress::default(),
                local_path: None,
                cancel,
            },
        );
        true
    }

    pub fn set_status(&self, key: &TaskKey, next: DownloadStatus) {
        if let Some(task) = self.lock().get_mut(key) {
            if task.status.can_become(next) {
                task.status = next;
            } else {
                warn!(
                    "ignoring {:?} -> {:?} for {}",
                    task.status, next, key.remote_path
                );
            }
        }
    }

    pub fn start(&self, key: &TaskKey, local_path: Utf8PathBuf) {
        if let Some(task) = self.lock().get_mut(key) {
            task.local_path = Some(local_path);
        }
        self.set_status(key, DownloadStatus::InProgress);
    }

    pub fn record_progress(&self, key: &TaskKey, progress: TransferProgress) {
        if let Some(task) = self.lock().get_mut(key) {
            task.progress = progress;
        }
    }

    pub fn remove(&self, key: &TaskKey) {
        if let Some(task) = self.lock().remove(key) {
            debug!(
                "task {}:{} finished as {:?}",
                key.collection_id, key.remote_path, task.status
            );
        }
    }

    /// Fires the cancel token of every task matching `pred`. Returns how many
    /// tasks were signalled.
    pub fn cancel_where(&self, pred: impl Fn(&TaskKey) -> bool) -> usize {
        let tasks = self.lock();
        let mut count = 0;
        for (key, task) in tasks.iter() {
            if pred(key) && !task.status.is_terminal() {
                task.cancel.cancel();
                count += 1;
            }
        }
        count
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn local_paths(&self) -> Vec<Utf8PathBuf> {
        self.lock()
            .values()
            .filter_map(|t| t.local_path.clone())
            .collect()
    }

    /// Runs `f` unless some task has claimed `path`, passing it every claimed
    /// path.
    ///
    /// The registry stays locked while `f` runs. A task claims its path in
    /// [`start`](Self::start) before creating any directory or file, and is
    /// removed only after its entry is committed, so `f` sees a settled path.
    pub fn with_unclaimed<T>(
        &self,
        path: &Utf8Path,
        f: impl FnOnce(&[&Utf8Path]) -> T,
    ) -> Option<T> {
        let tasks = self.lock();
        let claimed: Vec<&Utf8Path> = tasks
            .values()
            .filter_map(|t| t.local_path.as_deref())
            .collect();
        if claimed.contains(&path) {
            return None;
        }
        Some(f(&claimed))
    }

    pub fn snapshots(&self) -> Vec<DownloadTaskSnapshot> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, task)| DownloadTaskSnapshot {
                collection_id: key.collection_id.clone(),
                remote_path: key.remote_path.clone(),
                status: task.status,
                progress: task.progress,
                local_path: task.local_path.clone(),
                cancel_requested: task.cancel.is_cancelled(),
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.collection_id, &a.remote_path).cmp(&(&b.collection_id, &b.remote_path))
        });
        out
    }
}

/// Removes its task from the registry on drop, and deletes the tracked partial
/// file unless [`keep_file`](Self::keep_file) was called.
pub(crate) struct TaskGuard<'a> {
    registry: &'a TaskRegistry,
    key: TaskKey,
    partial: Option<Utf8PathBuf>,
}

impl<'a> TaskGuard<'a> {
    pub fn new(registry: &'a TaskRegistry, key: TaskKey) -> Self {
        Self {
            registry,
            key,
            partial: None,
        }
    }

    pub fn track_partial(&mut self, path: Utf8PathBuf) {
        self.partial = Some(path);
    }

    pub fn keep_file(&mut self) {
        self.partial = None;
    }

    pub fn finish(&mut self, status: DownloadStatus) {
        if status == DownloadStatus::Completed {
            self.keep_file();
        }
        self.registry.set_status(&self.key, status);
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.partial.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed partial download {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove partial download {}: {}", path, e),
            }
        }
        self.registry.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> TaskKey {
        TaskKey::new("col1", path)
    }

    #[test]
    fn second_registration_for_same_key_is_refused() {
        let reg = TaskRegistry::default();
        assert!(reg.try_register(key("/a"), CancellationToken::new()));
        assert!(!reg.try_register(key("/a"), CancellationToken::new()));
        assert!(reg.try_register(TaskKey::new("col2", "/a"), CancellationToken::new()));
    }

    #[test]
    fn terminal_status_is_final() {
        let reg = TaskRegistry::default();
        reg.try_register(key("/a"), CancellationToken::new());
        reg.start(&key("/a"), "/tmp/a".into());
        reg.set_status(&key("/a"), DownloadStatus::Cancelled);
        reg.set_status(&key("/a"), DownloadStatus::Completed);
        assert_eq!(reg.snapshots()[0].status, DownloadStatus::Cancelled);
    }

    #[test]
    fn guard_removes_task_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let partial = Utf8PathBuf::from_path_buf(dir.path().join("part.bin")).unwrap();
        std::fs::write(&partial, b"half").unwrap();

        let reg = TaskRegistry::default();
        reg.try_register(key("/a"), CancellationToken::new());
        {
            let mut guard = TaskGuard::new(&reg, key("/a"));
            guard.track_partial(partial.clone());
            guard.finish(DownloadStatus::Failed);
        }
        assert!(!reg.contains(&key("/a")));
        assert!(!partial.exists());
    }

    #[test]
    fn completed_guard_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let done = Utf8PathBuf::from_path_buf(dir.path().join("done.bin")).unwrap();
        std::fs::write(&done, b"full").unwrap();

        let reg = TaskRegistry::default();
        reg.try_register(key("/a"), CancellationToken::new());
        {
            let mut guard = TaskGuard::new(&reg, key("/a"));
            guard.track_partial(done.clone());
            guard.finish(DownloadStatus::Completed);
        }
        assert!(!reg.contains(&key("/a")));
        assert!(done.exists());
    }

    #[test]
    fn cancel_where_only_hits_matching_live_tasks() {
        let reg = TaskRegistry::default();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        reg.try_register(key("/a"), a.clone());
        reg.try_register(TaskKey::new("col2", "/a"), b.clone());

        assert_eq!(reg.cancel_where(|k| k.collection_id == "col1"), 1);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(reg.snapshots()[0].cancel_requested);
    }

    #[test]
    fn claimed_paths_are_withheld() {
        let reg = TaskRegistry::default();
        reg.try_register(key("/a"), CancellationToken::new());
        reg.try_register(key("/b"), CancellationToken::new());
        reg.start(&key("/a"), "/cache/col1/a".into());

        assert_eq!(reg.with_unclaimed(Utf8Path::new("/cache/col1/a"), |_| ()), None);
        let seen = reg.with_unclaimed(Utf8Path::new("/cache/col1/c"), |claimed| {
            claimed.iter().map(|p| p.to_string()).collect::<Vec<_>>()
        });
        assert_eq!(seen, Some(vec!["/cache/col1/a".to_string()]));

        reg.remove(&key("/a"));
        assert_eq!(reg.with_unclaimed(Utf8Path::new("/cache/col1/a"), |_| 1), Some(1));
    }
}
