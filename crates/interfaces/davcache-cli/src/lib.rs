pub mod commands;

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use davcache_config::CacheSettings;
use davcache_infra::{http_client_with_agent, Credentials, HttpRemoteStore};

/// How to reach one WebDAV collection.
#[derive(Args, Clone, Debug)]
pub struct RemoteArgs {
    /// Collection base URL, e.g. https://nas.local/remote.php/dav/files/me
    #[arg(long)]
    pub url: String,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long, env = "DAVCACHE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Speed cap in MiB/s (overrides the settings file)
    #[arg(long)]
    pub limit_mb: Option<u64>,
    /// Apply the default speed cap
    #[arg(long, conflicts_with = "limit_mb")]
    pub throttle: bool,
}

impl RemoteArgs {
    /// Bytes per second to cap downloads at: `--throttle`, then `--limit-mb`,
    /// then the settings file.
    pub fn rate_limit(&self, settings: &CacheSettings) -> Option<u64> {
        if self.throttle {
            return Some(davcache_config::DEFAULT_SPEED_LIMIT_BYTES);
        }
        self.limit_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .or(settings.rate_limit_bytes)
    }

    pub fn build_store(&self, settings: &CacheSettings) -> anyhow::Result<HttpRemoteStore> {
        let client =
            http_client_with_agent(settings.user_agent()).context("Failed to build HTTP client")?;
        let mut store = HttpRemoteStore::new(client, &self.url)
            .with_context(|| format!("Invalid collection URL {}", self.url))?
            .with_attempts(
                settings.fetch_attempts(),
                Duration::from_millis(davcache_config::RETRY_DELAY_MS),
            );

        if let Some(bps) = self.rate_limit(settings) {
            store = store.with_rate_limit(bps);
        }

        if let Some(user) = &self.user {
            store = store.with_credentials(Credentials {
                username: user.clone(),
                password: self.password.clone(),
            });
        }
        Ok(store)
    }
}
