// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::LoadOrder;

pub const ENV_CONFIG_PATH: &str = "TRACKER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/tracker.toml";

pub const DEFAULT_FEED_URL: &str =
    "https://nsearchives.nseindia.com/content/RSS/Online_announcements.xml";

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_early_exit_threshold() -> usize {
    10
}
fn default_max_stored() -> usize {
    500
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_display_limit() -> usize {
    10
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/announcements.db")
}
fn default_bind_addr() -> String {
    "127.0.0.1:5127".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Consecutive known items after which a scan stops.
    #[serde(default = "default_early_exit_threshold")]
    pub early_exit_threshold: usize,
    #[serde(default = "default_max_stored")]
    pub max_stored: usize,
    /// Never below `max_stored`.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Items pushed to a freshly connected subscriber.
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub load_order: LoadOrder,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Start polling `feed_url` as soon as the server is up.
    #[serde(default)]
    pub autostart: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            poll_interval_secs: default_poll_interval_secs(),
            early_exit_threshold: default_early_exit_threshold(),
            max_stored: default_max_stored(),
            cache_capacity: default_cache_capacity(),
            display_limit: default_display_limit(),
            db_path: default_db_path(),
            load_order: LoadOrder::default(),
            bind_addr: default_bind_addr(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            autostart: false,
        }
    }
}

impl TrackerConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading tracker config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing tracker config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: TrackerConfig = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    /// Resolution order:
    /// 1) $TRACKER_CONFIG_PATH (must exist when set)
    /// 2) config/tracker.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied on top in every case.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides().sanitized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_non_empty("TRACKER_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = env_non_empty("TRACKER_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env_non_empty("TRACKER_FEED_URL") {
            self.feed_url = v;
        }
        if let Some(v) = env_non_empty("TRACKER_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poll_interval_secs = v;
        }
        self
    }

    fn sanitized(mut self) -> Self {
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = default_poll_interval_secs();
        }
        if self.early_exit_threshold == 0 {
            self.early_exit_threshold = default_early_exit_threshold();
        }
        if self.max_stored == 0 {
            self.max_stored = default_max_stored();
        }
        if self.cache_capacity < self.max_stored {
            self.cache_capacity = self.max_stored;
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        self.feed_url = self.feed_url.trim().to_string();
        self
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
