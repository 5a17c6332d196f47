use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use davcache_core::{CacheEntry, EntryId, OfflineFile, RemoteFile};
use davcache_infra::RemoteStore;
use davcache_offline::{OfflineCache, OfflineErrorKind, TransferProgress};
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};

fn byte_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec} {msg}",
        )
        .unwrap()
        .progress_chars("=>-"),
    );
    pb
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Ctrl-C state of one batch. Every interrupt marks the batch and cancels
/// whatever is in flight.
#[derive(Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn raise(&self, cache: &OfflineCache) {
        self.raised.store(true, Ordering::SeqCst);
        let n = cache.cancel_all();
        tracing::debug!("interrupt cancelled {} download(s)", n);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Downloads `paths` of `collection` into the cache, one after another.
///
/// Ctrl-C cancels whatever is in flight and skips the rest. Returns the local
/// paths of the files that made it; fails if any did not.
pub async fn cmd_get(
    cache: Arc<OfflineCache>,
    store: Arc<dyn RemoteStore>,
    collection: String,
    paths: Vec<String>,
) -> Result<Vec<Utf8PathBuf>> {
    let interrupt = Interrupt::default();
    let listener = {
        let cache = cache.clone();
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupt.raise(&cache);
            }
        })
    };
    let result = get_files(&cache, store.as_ref(), &collection, paths, &interrupt).await;
    listener.abort();
    result
}

/// The download loop of [`cmd_get`], driven by an explicit [`Interrupt`].
pub async fn get_files(
    cache: &OfflineCache,
    store: &dyn RemoteStore,
    collection: &str,
    paths: Vec<String>,
    interrupt: &Interrupt,
) -> Result<Vec<Utf8PathBuf>> {
    println!(":: Fetching {} file(s) into {}", paths.len(), collection);

    let total = paths.len();
    let mut done = Vec::new();
    let mut failures = 0usize;
    for (i, path) in paths.into_iter().enumerate() {
        if interrupt.is_raised() {
            println!(":: Interrupted, skipping {} file(s)", total - i);
            failures += total - i;
            break;
        }
        let file = RemoteFile::new(path.as_str());
        let pb = byte_bar();
        pb.set_message(path.clone());
        let on_progress = {
            let pb = pb.clone();
            move |p: TransferProgress| {
                match p.total {
                    Some(total) => pb.set_length(total),
                    None => pb.set_length(p.received),
                }
                pb.set_position(p.received);
            }
        };

        match cache.download(&file, collection, store, on_progress).await {
            Ok(local) => {
                pb.finish_and_clear();
                println!("   {} -> {}", path, local);
                done.push(local);
            }
            Err(e) if e.kind() == OfflineErrorKind::Cancelled => {
                pb.abandon_with_message("cancelled");
                failures += total - i;
                break;
            }
            Err(e) => {
                pb.abandon_with_message("failed");
                eprintln!("   {}: {}", path, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} download(s) did not complete", failures);
    }
    Ok(done)
}

pub fn cmd_status(cache: &OfflineCache, collection: &str, paths: Vec<String>) -> Vec<OfflineFile> {
    let files = paths.into_iter().map(RemoteFile::new).collect();
    let enriched = cache.enrich(files, collection);
    for f in &enriched {
        match &f.local_path {
            Some(local) => println!("   offline  {}  ({})", f.file.remote_path, local),
            None => println!("   remote   {}", f.file.remote_path),
        }
    }
    enriched
}

pub fn cmd_list(cache: &OfflineCache, collection: Option<&str>, json: bool) -> Result<Vec<CacheEntry>> {
    let entries = cache.entries(collection)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(entries);
    }
    if entries.is_empty() {
        println!(":: Cache is empty");
    }
    for e in &entries {
        println!(
            "{}  {:>10}  {}:{}  {}",
            e.id,
            format_size(e.size_bytes, DECIMAL),
            e.collection_id,
            e.remote_path,
            e.downloaded_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(entries)
}

pub fn cmd_rm(cache: &OfflineCache, id: &str) -> Result<bool> {
    let id: EntryId = id
        .parse()
        .with_context(|| format!("Not a valid entry id: {id}"))?;
    let removed = cache.delete_entry(&id)?;
    if removed {
        println!(":: Removed {}", id);
    } else {
        println!(":: No entry {}", id);
    }
    Ok(removed)
}

/// Deletes one collection, or the whole cache when `collection` is `None`.
pub fn cmd_purge(cache: &OfflineCache, collection: Option<&str>) -> Result<usize> {
    let removed = match collection {
        Some(c) => cache.delete_all_for_collection(c)?,
        None => cache.delete_all()?,
    };
    println!(":: Removed {} entries", removed);
    Ok(removed)
}

pub fn cmd_size(cache: &OfflineCache) -> Result<u64> {
    let usage = cache.usage()?;
    for u in &usage {
        println!(
            "   {:<24} {:>6} files  {}",
            u.collection_id,
            u.entries,
            format_size(u.bytes, DECIMAL)
        );
    }
    let total = cache.total_size()?;
    println!(":: Total: {}", format_size(total, DECIMAL));
    Ok(total)
}

pub fn cmd_reconcile(cache: &OfflineCache) -> Result<usize> {
    let pb = spinner();
    pb.set_message("Checking cached files...");
    let removed = cache.reconcile_all()?;
    pb.finish_and_clear();
    println!(":: Dropped {} stale entries", removed);
    Ok(removed)
}

pub fn cmd_sweep(cache: &OfflineCache) -> Result<usize> {
    let removed = cache.remove_orphan_files()?;
    println!(":: Removed {} untracked files", removed);
    Ok(removed)
}
