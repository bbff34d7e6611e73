use serde::{Deserialize, Serialize};

use scrape_common::config::{SharedConfig, TaskManagerConfig};

/// Top-level configuration for the hub binary, loaded from
/// `SCRAPE_HUB_CONFIG` (default `config/hub.toml`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(flatten)]
    pub shared: SharedConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub task_manager: TaskManagerConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            broker: BrokerConfig::default(),
            task_manager: TaskManagerConfig::default(),
        }
    }
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
