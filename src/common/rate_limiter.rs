//! Token bucket rate limiter
//!
//! OANDA allows roughly 100 requests per second per connection and Coinbase
//! Advanced Trade 30 per second on private endpoints; both clients default far
//! below that.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained rate, also the burst size
    pub requests_per_second: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { requests_per_second: 10 }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.requests_per_second = requests_per_second.max(1);
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Cloning shares the bucket, so one limiter covers every task talking to a venue
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
    capacity: f64,
    per_second: f64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.requests_per_second.max(1) as f64;
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            })),
            capacity,
            per_second: capacity,
        }
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second)
            };
            tracing::trace!("Rate limited, waiting {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let earned = now.duration_since(bucket.refilled_at).as_secs_f64() * self.per_second;
        bucket.tokens = (bucket.tokens + earned).min(self.capacity);
        bucket.refilled_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: usize) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig::default().with_rate(rate))
    }

    #[tokio::test]
    async fn test_burst_then_empty() {
        let limiter = limiter(2);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_a_token() {
        // one token every 20ms
        let limiter = limiter(50);
        for _ in 0..50 {
            limiter.acquire().await;
        }
        let started = std::time::Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_clones_share_bucket() {
        let a = limiter(1);
        let b = a.clone();
        a.acquire().await;
        assert!(!b.try_acquire().await);
    }
}
