use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use davcache_cli::{commands, RemoteArgs};
use davcache_config::SettingsStore;
use davcache_offline::OfflineCache;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Storage root (defaults to the settings file, then the platform data dir)
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download remote files into the offline cache
    Get {
        #[arg(short, long)]
        collection: String,
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show which remote paths are available offline
    Status {
        #[arg(short, long)]
        collection: String,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    List {
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete one cache entry by id
    Rm { id: String },
    /// Delete a collection, or everything with --all
    Purge {
        #[arg(short, long, required_unless_present = "all")]
        collection: Option<String>,
        #[arg(long, conflicts_with = "collection")]
        all: bool,
    },
    Size,
    /// Drop catalog rows whose files are gone
    Reconcile,
    /// Delete files the catalog does not know about
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")?;

    let settings = SettingsStore::new()?
        .load()
        .context("Failed to load settings")?;
    let root = match cli.root {
        Some(root) => root,
        None => settings.resolve_storage_root()?,
    };
    let cache = Arc::new(
        OfflineCache::open(&root).with_context(|| format!("Failed to open cache at {root}"))?,
    );

    match cli.command {
        Commands::Get {
            collection,
            remote,
            paths,
        } => {
            let store = Arc::new(remote.build_store(&settings)?);
            commands::cmd_get(cache, store, collection, paths).await?;
        }
        Commands::Status { collection, paths } => {
            commands::cmd_status(&cache, &collection, paths);
        }
        Commands::List { collection, json } => {
            commands::cmd_list(&cache, collection.as_deref(), json)?;
        }
        Commands::Rm { id } => {
            commands::cmd_rm(&cache, &id)?;
        }
        Commands::Purge { collection, all } => {
            let target = if all { None } else { collection.as_deref() };
            commands::cmd_purge(&cache, target)?;
        }
        Commands::Size => {
            commands::cmd_size(&cache)?;
        }
        Commands::Reconcile => {
            commands::cmd_reconcile(&cache)?;
        }
        Commands::Sweep => {
            commands::cmd_sweep(&cache)?;
        }
    }

    Ok(())
}
