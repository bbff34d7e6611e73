use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ProductInfo, ProductLocation};

/// Fetches current price/availability for a product location from whatever
/// upstream storefront it points at.
///
/// The worker wraps an implementation of this trait in a rate limiter
/// before ever calling it (see the worker crate's rate-limited adapter) —
/// implementations themselves are not expected to rate limit or retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, location: &ProductLocation) -> Result<ProductInfo, FetchError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Request(String),

    #[error("unexpected response status {0}")]
    Status(u16),

    #[error("failed to parse page content: {0}")]
    Parse(String),
}

impl From<FetchError> for crate::error::ScrapeError {
    fn from(e: FetchError) -> Self {
        crate::error::ScrapeError::Fetch(e.to_string())
    }
}
