//! Central configuration constants for runtime limits and defaults.

pub mod settings;

pub use settings::{CacheSettings, SettingsStore};

/// Attempts per fetch before a download is reported as failed.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Upper bound accepted for `DEFAULT_FETCH_ATTEMPTS` overrides.
pub const MAX_FETCH_ATTEMPTS: u32 = 10;

/// Pause between fetch attempts, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 500;

/// Connect timeout for the WebDAV client, in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Directory under the platform data dir that holds offline copies.
pub const OFFLINE_DIR_NAME: &str = "offline";

/// Default speed limit when enabled (bytes per second). 5 MB/s.
pub const DEFAULT_SPEED_LIMIT_BYTES: u64 = 5 * 1024 * 1024;

pub const USER_AGENT: &str = concat!("davcache/", env!("CARGO_PKG_VERSION"));

/// Convenience function to clamp an attempt count into the allowed range.
pub fn clamp_attempts(v: u32) -> u32 {
    v.clamp(1, MAX_FETCH_ATTEMPTS)
}
