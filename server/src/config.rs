//! Runtime configuration read from `RETROWEB_*` environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9999";
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_RETENTION_DAYS: i64 = 182;
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Holds `style_cache.db`
    pub storage_dir: PathBuf,
    pub bind_addr: String,
    pub generation_timeout: Duration,
    /// Entries untouched for longer than this are evicted
    pub retention: chrono::Duration,
    /// Ceiling on the total css bytes kept in the cache
    pub cache_max_bytes: u64,
    pub eviction_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./retroweb-storage"),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source; unset or malformed values
    /// keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let storage_dir = lookup("RETROWEB_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);
        let bind_addr = lookup("RETROWEB_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let generation_timeout = parse_var::<u64, _>(&lookup, "RETROWEB_GENERATION_TIMEOUT_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.generation_timeout);
        let retention = parse_var::<i64, _>(&lookup, "RETROWEB_RETENTION_DAYS")
            .filter(|days| *days > 0)
            .map(chrono::Duration::days)
            .unwrap_or(defaults.retention);
        let cache_max_bytes = parse_var::<u64, _>(&lookup, "RETROWEB_CACHE_MAX_BYTES")
            .unwrap_or(defaults.cache_max_bytes);
        let eviction_interval = parse_var::<u64, _>(&lookup, "RETROWEB_EVICTION_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.eviction_interval);

        Self {
            storage_dir,
            bind_addr,
            generation_timeout,
            retention,
            cache_max_bytes,
            eviction_interval,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("style_cache.db")
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}, using default", name, raw);
            None
        }
    }
}
