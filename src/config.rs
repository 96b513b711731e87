use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::BucketClock;

/// Retry budget is capped regardless of what the file asks for
pub const MAX_RETRIES: u32 = 3;

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── File format ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketSize {
    Minute,
    Hour,
}

impl BucketSize {
    pub fn width_ms(self) -> i64 {
        match self {
            Self::Minute => BucketClock::MINUTE_MS,
            Self::Hour => BucketClock::HOUR_MS,
        }
    }

    /// Largest number of buckets one snapshots query may span
    /// (168 hours' worth in either mode).
    pub fn max_query_buckets(self) -> i64 {
        match self {
            Self::Minute => 168 * 60,
            Self::Hour => 168,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory holding the `<id>-<YYYY>-<MM>.json` shards
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Dashboard assets served as the router fallback
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Display label only; storage is always UTC
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_bucket")]
    pub bucket: BucketSize,

    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub id: String,

    /// Defaults to `id` when omitted
    #[serde(default)]
    pub name: String,

    pub url: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Per-attempt deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pings above this render yellow
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_bind() -> String {
    "0.0.0.0:3000".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_poll_interval_ms() -> u64 {
    30_000
}
fn default_retention_days() -> u32 {
    30
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_bucket() -> BucketSize {
    BucketSize::Hour
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_slow_threshold_ms() -> u64 {
    1_000
}
fn default_retries() -> u32 {
    1
}

// ─── Loading ─────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        for service in &mut config.services {
            if service.name.trim().is_empty() {
                service.name = service.id.clone();
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("at least one service is required".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid("retention_days must be >= 1".into()));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            let id = &service.id;
            // ids become shard file names
            let id_ok = !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                && !id.starts_with('.');
            if !id_ok {
                return Err(ConfigError::Invalid(format!(
                    "service id '{id}' must be non-empty and use only [A-Za-z0-9_.-]"
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate service id '{id}'")));
            }
            match reqwest::Url::parse(&service.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(ConfigError::Invalid(format!(
                        "service '{id}': unsupported scheme '{}'",
                        url.scheme()
                    )))
                }
                Err(e) => {
                    return Err(ConfigError::Invalid(format!("service '{id}': bad url: {e}")))
                }
            }
            if service.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "service '{id}': timeout_ms must be > 0"
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.id == id)
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Extra attempts after a failure, capped at `MAX_RETRIES`.
    pub fn effective_retries(&self) -> u32 {
        self.retries.min(MAX_RETRIES)
    }
}
