use crate::application::StickySettings;
use serde::Deserialize;
use std::time::Duration;

/// Which store backs sticky mappings.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Shared Redis endpoint, enabled by `REDIS_CONN_STRING`
    Redis,
    /// In-process store; affinity is local to this node
    Memory,
}

impl StoreKind {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" | "local" => Self::Memory,
            _ => Self::Redis,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Store settings
    pub store: StoreKind,
    pub redis_conn_string: Option<String>,
    pub redis_db: i64,
    pub redis_timeout_secs: u64,
    pub sync_frequency_secs: u64,
    pub gc_interval_secs: u64,

    // Lease policy
    pub sticky_ttl_secs: u64,
    pub renewal_threshold_minutes: u32,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreKind::Redis,
            redis_conn_string: None,
            redis_db: 0,
            redis_timeout_secs: 30,
            sync_frequency_secs: 600,
            gc_interval_secs: 60,
            sticky_ttl_secs: 3600,
            renewal_threshold_minutes: 10,
            debug: false,
        }
    }
}

impl Config {
    /// Lease policy for the sticky session service.
    pub fn sticky_settings(&self) -> StickySettings {
        StickySettings {
            ttl: Duration::from_secs(self.sticky_ttl_secs),
            renewal_threshold_minutes: self.renewal_threshold_minutes,
        }
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_timeout_secs)
    }
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let store = std::env::var("STICKY_STORE")
        .map(|v| StoreKind::from_str(&v))
        .unwrap_or(defaults.store);

    let redis_conn_string = std::env::var("REDIS_CONN_STRING")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let redis_db = env_number("REDIS_DB", defaults.redis_db);

    let redis_timeout_secs = env_number("REDIS_TIMEOUT_SECS", defaults.redis_timeout_secs);

    let sync_frequency_secs = env_number("SYNC_FREQUENCY", defaults.sync_frequency_secs);

    let gc_interval_secs = env_number("STICKY_GC_INTERVAL_SECS", defaults.gc_interval_secs);

    let sticky_ttl_secs = env_number("STICKY_SESSION_TTL_SECS", defaults.sticky_ttl_secs);

    let renewal_threshold_minutes = env_number(
        "STICKY_SESSION_RENEWAL_THRESHOLD_MINUTES",
        defaults.renewal_threshold_minutes,
    );

    let debug = std::env::var("DEBUG").is_ok();

    Ok(Config {
        store,
        redis_conn_string,
        redis_db,
        redis_timeout_secs,
        sync_frequency_secs,
        gc_interval_secs,
        sticky_ttl_secs,
        renewal_threshold_minutes,
        debug,
    })
}
