use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::namespace::SortKey;

/// Top-level configuration for the profiler.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection to the profiled store.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Maximum keys enumerated per key-space sampling pass. Default: 5000.
    #[serde(default = "default_scan_size")]
    pub scan_size: u64,

    /// How long each traffic sampling pass observes commands. Default: 10s.
    #[serde(default = "default_monitor_duration", with = "humantime_serde")]
    pub monitor_duration: Duration,

    /// How often server info is polled. Default: 5s.
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Key segment delimiter. Default: ":".
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Directory for the scratch logs. Default: the system temp dir.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Size of the big-key, hot-key and slow-log lists. Default: 100.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Regexes for segments that are identifiers, matched against the
    /// whole segment.
    #[serde(default)]
    pub id_patterns: Vec<String>,

    /// Published snapshots buffered for a slow consumer. Default: 100.
    #[serde(default = "default_publish_queue_size")]
    pub publish_queue_size: usize,

    /// Default namespace ordering. Default: keys.
    #[serde(default)]
    pub sort_by: SortKey,
}

/// Connection parameters for the profiled store.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Default: "localhost".
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 6379.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Database index. Default: 0.
    #[serde(default)]
    pub db: u32,

    /// Connect over TLS. Default: false.
    #[serde(default)]
    pub tls: bool,
}

// --- Default value functions ---

fn default_scan_size() -> u64 {
    5000
}

fn default_monitor_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_delimiter() -> String {
    ":".to_string()
}

fn default_logs_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_top_k() -> usize {
    100
}

fn default_publish_queue_size() -> usize {
    100
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            scan_size: default_scan_size(),
            monitor_duration: default_monitor_duration(),
            refresh_interval: default_refresh_interval(),
            delimiter: default_delimiter(),
            logs_dir: default_logs_dir(),
            top_k: default_top_k(),
            id_patterns: Vec::new(),
            publish_queue_size: default_publish_queue_size(),
            sort_by: SortKey::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            db: 0,
            tls: false,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.scan_size == 0 {
            bail!("scan_size must be positive");
        }

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be positive");
        }

        if self.redis.port == 0 {
            bail!("redis.port must be between 1 and 65535");
        }

        if self.redis.host.is_empty() {
            bail!("redis.host is required");
        }

        if self.delimiter.is_empty() {
            bail!("delimiter cannot be empty");
        }

        if self.top_k == 0 {
            bail!("top_k must be positive");
        }

        if self.publish_queue_size == 0 {
            bail!("publish_queue_size must be positive");
        }

        self.compiled_id_patterns()?;

        Ok(())
    }

    /// Compile `id_patterns`, anchoring each to the whole segment.
    pub fn compiled_id_patterns(&self) -> Result<Vec<Regex>> {
        self.id_patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(&format!("^(?:{p})$"))
                    .with_context(|| format!("invalid id pattern: {p}"))
            })
            .collect()
    }
}
