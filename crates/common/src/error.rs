use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type shared by the hub and worker binaries.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("failed to decode envelope content: {0}")]
    Decode(String),

    #[error("no type tag registered for payload: {0}")]
    UnknownType(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("rate limit timeout for domain: {0}")]
    RateLimitTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ConfigError> for ScrapeError {
    fn from(e: ConfigError) -> Self {
        ScrapeError::Config(e.to_string())
    }
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ScrapeError>;
