use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scrape_common::config::RateLimitConfig;
use scrape_common::fetcher::{FetchError, Fetcher};
use scrape_common::types::{ProductInfo, ProductLocation};

use crate::rate_limiter::TokenBucket;

/// Client-side rate limiter in front of an upstream [`Fetcher`].
///
/// Every call first acquires a token from the bucket, then attempts the
/// wrapped fetch up to `max_tries` times with a fixed back-off between
/// attempts, returning the last error once exhausted. Grounded on the
/// teacher's `DomainRateLimiter` + the retry posture `circuit_breaker.rs`
/// uses for counting consecutive failures, simplified here to the spec's
/// fixed-back-off retry (no circuit breaker — that's scoped to the
/// teacher's multi-dependency health tracking, which this single upstream
/// adapter doesn't need).
pub struct RateLimitedFetcher {
    inner: Arc<dyn Fetcher>,
    bucket: TokenBucket,
    max_tries: u32,
    backoff: Duration,
}

impl RateLimitedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, config: RateLimitConfig) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(config.requests_per_second),
            max_tries: config.max_tries,
            backoff: config.retry_backoff,
        }
    }
}

#[async_trait]
impl Fetcher for RateLimitedFetcher {
    async fn fetch(&self, location: &ProductLocation) -> Result<ProductInfo, FetchError> {
        let mut last_err = None;

        for attempt in 1..=self.max_tries.max(1) {
            self.bucket.acquire().await;

            match self.inner.fetch(location).await {
                Ok(info) => {
                    metrics::counter!("worker.fetch.success").increment(1);
                    return Ok(info);
                }
                Err(err) => {
                    metrics::counter!("worker.fetch.retry").increment(1);
                    tracing::warn!(
                        location_id = %location.id,
                        attempt,
                        error = %err,
                        "upstream fetch attempt failed"
                    );
                    last_err = Some(err);
                    if attempt < self.max_tries {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        metrics::counter!("worker.fetch.exhausted").increment(1);
        Err(last_err.unwrap_or(FetchError::Request("no attempts made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FlakyFetcher {
        calls: AtomicU32,
        fail_until: u32,
        result: ProductInfo,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, _location: &ProductLocation) -> Result<ProductInfo, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_until {
                Err(FetchError::Request("simulated failure".to_string()))
            } else {
                Ok(self.result.clone())
            }
        }
    }

    fn test_location() -> ProductLocation {
        ProductLocation {
            id: scrape_common::ids::ProductLocationId::new(),
            product_id: scrape_common::ids::ProductId::new(),
            location_id: "loc-1".to_string(),
            local_id: "sku-1".to_string(),
            url: "https://example.com/p/1".to_string(),
            slug: "widget".to_string(),
            category: "Widgets".to_string(),
            category_id: "cat-1".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_max_tries() {
        let location = test_location();
        let info = ProductInfo::observed(location.product_id, location.id, 9.99, "IN_STOCK", true);

        let inner = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_until: 2,
            result: info.clone(),
        });

        let limited = RateLimitedFetcher::new(
            inner,
            RateLimitConfig {
                requests_per_second: 1000.0,
                max_tries: 5,
                retry_backoff: Duration::from_millis(1),
            },
        );

        let result = limited.fetch(&location).await.unwrap();
        assert_eq!(result.price, 9.99);
    }

    #[tokio::test]
    async fn exhausts_after_max_tries_and_surfaces_last_error() {
        let location = test_location();
        let info = ProductInfo::observed(location.product_id, location.id, 1.0, "IN_STOCK", true);

        let inner = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_until: 10,
            result: info,
        });

        let limited = RateLimitedFetcher::new(
            inner,
            RateLimitConfig {
                requests_per_second: 1000.0,
                max_tries: 3,
                retry_backoff: Duration::from_millis(1),
            },
        );

        let err = limited.fetch(&location).await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }

    #[tokio::test]
    async fn serializes_concurrent_callers_through_the_bucket() {
        let location = test_location();
        let info = ProductInfo::observed(location.product_id, location.id, 2.5, "IN_STOCK", true);
        let inner = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_until: 0,
            result: info,
        });
        let limited = Arc::new(RateLimitedFetcher::new(
            inner,
            RateLimitConfig {
                requests_per_second: 1000.0,
                max_tries: 1,
                retry_backoff: Duration::from_millis(1),
            },
        ));

        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let limited = Arc::clone(&limited);
            let location = location.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _ = limited.fetch(&location).await;
                order.lock().await.push(i);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().await.len(), 5);
    }
}
