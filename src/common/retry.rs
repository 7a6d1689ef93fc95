//! Retry with exponential backoff, gated by a circuit breaker and rate limiter

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::error::BrokerResult;
use crate::types::Venue;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Transport settings shared by the venue clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limiter = self.rate_limiter.with_rate(requests_per_second);
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker = self.circuit_breaker.with_failure_threshold(threshold);
        self
    }
}

/// Circuit breaker + rate limiter + retry policy for one venue
#[derive(Debug, Clone)]
pub struct Resilience {
    venue: Venue,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Resilience {
    pub fn new(venue: Venue, config: &ClientConfig) -> Self {
        Self {
            venue,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(venue, config.circuit_breaker.clone()))),
            rate_limiter: RateLimiter::new(config.rate_limiter.clone()),
            retry: config.retry.clone(),
        }
    }

    /// Run `operation`, retrying transient failures with backoff
    ///
    /// Only safe for reads and for writes the venue deduplicates.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> BrokerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        self.run(operation, self.retry.max_retries).await
    }

    /// Run `operation` exactly once (non-idempotent order submission)
    pub async fn execute_once<F, Fut, T>(&self, operation: F) -> BrokerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        self.run(operation, 0).await
    }

    async fn run<F, Fut, T>(&self, operation: F, max_retries: u32) -> BrokerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        self.circuit_breaker.lock().await.check()?;

        let mut attempt = 0;
        let result = loop {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                tracing::debug!(venue = %self.venue, attempt, "Retrying after {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
            self.rate_limiter.acquire().await;

            match operation().await {
                Err(e) if e.is_transient() && attempt < max_retries => {
                    tracing::warn!(
                        venue = %self.venue,
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    attempt += 1;
                }
                result => break result,
            }
        };

        // one breaker verdict per call, after retries
        self.circuit_breaker.lock().await.record(&result);
        result
    }

    pub async fn circuit_open(&self) -> bool {
        self.circuit_breaker.lock().await.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(1))
            .with_circuit_breaker_threshold(2)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let r = Resilience::new(Venue::Oanda, &fast_config());
        let calls = AtomicU32::new(0);

        let result = r
            .execute_with_retry(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BrokerError::Network("reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let r = Resilience::new(Venue::Coinbase, &fast_config());
        let calls = AtomicU32::new(0);

        let result: BrokerResult<()> = r
            .execute_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Rejected("INSUFFICIENT_FUND".into()))
            })
            .await;

        assert!(matches!(result, Err(BrokerError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_once_does_not_retry() {
        let r = Resilience::new(Venue::Oanda, &fast_config());
        let calls = AtomicU32::new(0);

        let result: BrokerResult<()> = r
            .execute_once(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Timeout("30s".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_open_circuit() {
        let r = Resilience::new(Venue::Oanda, &fast_config());

        for _ in 0..2 {
            let result: BrokerResult<()> = r
                .execute_with_retry(|| async { Err(BrokerError::Network("down".into())) })
                .await;
            assert!(matches!(result, Err(BrokerError::Network(_))));
        }

        assert!(r.circuit_open().await);
        let result: BrokerResult<()> = r.execute_with_retry(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BrokerError::CircuitOpen(Venue::Oanda))));
    }
}
