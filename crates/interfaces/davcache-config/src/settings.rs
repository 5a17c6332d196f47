use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const QUALIFIER: &str = "com";
const ORG: &str = "davcache";
const APP: &str = "davcache";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
    /// Overrides the platform data dir as the offline storage root.
    pub storage_root: Option<Utf8PathBuf>,
    /// Download speed cap in bytes per second. `None` means unlimited.
    pub rate_limit_bytes: Option<u64>,
    pub fetch_attempts: Option<u32>,
    pub user_agent: Option<String>,
}

impl CacheSettings {
    /// Storage root to use: the override if set, else the platform default.
    pub fn resolve_storage_root(&self) -> Result<Utf8PathBuf> {
        match &self.storage_root {
            Some(root) => Ok(root.clone()),
            None => default_storage_root(),
        }
    }

    pub fn fetch_attempts(&self) -> u32 {
        crate::clamp_attempts(self.fetch_attempts.unwrap_or(crate::DEFAULT_FETCH_ATTEMPTS))
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(crate::USER_AGENT)
    }
}

/// `<platform data dir>/offline`.
pub fn default_storage_root() -> Result<Utf8PathBuf> {
    let proj_dirs = ProjectDirs::from(QUALIFIER, ORG, APP)
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    let dir = proj_dirs.data_dir().join(crate::OFFLINE_DIR_NAME);
    Utf8PathBuf::from_path_buf(dir)
        .map_err(|p| anyhow::anyhow!("Data directory is not valid UTF-8: {}", p.display()))
}

/// JSON settings file, by default `<platform config dir>/settings.json`.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from(QUALIFIER, ORG, APP)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(Self::at(proj_dirs.config_dir().join("settings.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CacheSettings> {
        if !self.path.exists() {
            return Ok(CacheSettings::default());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read settings")?;
        let settings: CacheSettings =
            serde_json::from_str(&content).context("Failed to parse settings")?;
        Ok(settings)
    }

    pub fn save(&self, settings: &CacheSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        atomic_write(&self.path, json.as_bytes()).context("Failed to write settings")?;
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to rename temp file {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
