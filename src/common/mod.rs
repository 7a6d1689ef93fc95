//! Transport resilience shared by the venue clients
//!
//! - Circuit breaker per venue
//! - Token bucket rate limiter
//! - Retry with exponential backoff for transient errors only

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{ClientConfig, Resilience, RetryPolicy};
