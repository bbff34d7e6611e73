use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Token-bucket limiter capping outbound upstream calls to a configured
/// rate. Grounded on the teacher's per-domain `DomainRateLimiter`, but this
/// worker only ever talks to one upstream site per deployment, so there is
/// a single bucket rather than one per domain.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: requests_per_second,
                last_refill: Instant::now(),
            }),
            rate: requests_per_second,
        }
    }

    /// Block until a token is available, refilling proportionally to
    /// elapsed time and capping the bucket at 2x its rate so a long idle
    /// period doesn't let a burst through unbounded.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.rate * 2.0);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                let needed = 1.0 - state.tokens;
                Duration::from_secs_f64(needed / self.rate)
            };

            tokio::time::sleep(wait).await;
        }
    }
}
