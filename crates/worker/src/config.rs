use serde::{Deserialize, Serialize};

use scrape_common::config::{RateLimitConfig, SharedConfig};

/// Top-level configuration for the worker binary, loaded from
/// `SCRAPE_WORKER_CONFIG` (default `config/worker.toml`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(flatten)]
    pub shared: SharedConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(with = "http_timeout_secs", default = "default_http_timeout")]
    pub http_timeout: std::time::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            broker: BrokerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            http_timeout: default_http_timeout(),
        }
    }
}

fn default_http_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}

/// Broker connection details. The driver behind these is out of scope for
/// this crate (see [`scrape_protocol::transport::Transport`]) — `url`
/// starting with `memory://` selects the in-process transport used for the
/// demo binary and the integration tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub queue: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "memory://local".to_string(),
            queue: "scrape-control".to_string(),
        }
    }
}

mod http_timeout_secs {
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
