use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by both the hub and worker binaries.
///
/// Each binary's own config struct embeds this under a `shared` field (or
/// flattens it) and adds whatever is specific to its role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SharedConfig {
    /// HTTP port for `/health` and `/metrics`.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

/// Heartbeat cadence and eviction threshold, shared by the hub's
/// Heartbeater and the worker's Receiver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(with = "humantime_secs", default = "default_heartbeat_interval")]
    pub interval: Duration,
    pub missed_beats_allowed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            missed_beats_allowed: 4,
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(3)
}

/// TaskManager polling behaviour: how many upcoming tasks `initialize`
/// pulls from the repository on startup, and the upper bound on the
/// polling loop's sleep between due-task checks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    pub default_limit: usize,
    #[serde(with = "humantime_secs", default = "default_poll_cap")]
    pub poll_cap: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            default_limit: 512,
            poll_cap: default_poll_cap(),
        }
    }
}

fn default_poll_cap() -> Duration {
    Duration::from_millis(50)
}

/// Token-bucket rate limiting for the worker's outbound fetches.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub max_tries: u32,
    #[serde(with = "humantime_secs")]
    pub retry_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            max_tries: 50,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Load and parse a TOML config file, failing loudly on any problem. Callers
/// (the hub and worker `main.rs`) are expected to log the error and exit
/// rather than fall back to defaults — a misconfigured deployment should
/// refuse to start.
pub fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: source.to_string(),
    })
}

/// Resolve a config file path from an environment variable, falling back to
/// `default_path` when the variable is unset.
pub fn config_path_from_env(env_var: &str, default_path: &str) -> PathBuf {
    std::env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default_path))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
