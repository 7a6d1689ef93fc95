//! Circuit breaker for venue transports
//!
//! Only transient failures (network, 5xx, rate limits) count against a venue.
//! A rejected order proves the venue is up, so it counts as a success.
//!
//! After `failure_threshold` transient failures in a row the breaker opens and
//! every request fails fast with [`BrokerError::CircuitOpen`]. Once
//! `timeout` has passed, trial requests are let through; `success_threshold` good
//! trials close it again, one bad trial re-opens it.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{BrokerError, BrokerResult};
use crate::types::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    venue: Venue,
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Consecutive transient failures while closed
    failures: u32,
    /// Good trials while half-open
    trials_ok: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(venue: Venue, config: CircuitBreakerConfig) -> Self {
        Self {
            venue,
            config,
            state: CircuitState::Closed,
            failures: 0,
            trials_ok: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Gate for the next request
    pub fn check(&mut self) -> BrokerResult<()> {
        if self.state != CircuitState::Open {
            return Ok(());
        }
        let cooled = self.opened_at.map_or(true, |at| at.elapsed() >= self.config.timeout);
        if !cooled {
            return Err(BrokerError::CircuitOpen(self.venue));
        }
        tracing::info!(venue = %self.venue, "Circuit half-open, trying venue again");
        self.state = CircuitState::HalfOpen;
        self.trials_ok = 0;
        Ok(())
    }

    /// Account for a finished request
    pub fn record<T>(&mut self, result: &BrokerResult<T>) {
        match result {
            Err(e) if e.is_transient() => self.on_failure(e),
            _ => self.on_success(),
        }
    }

    fn on_success(&mut self) {
        self.failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.trials_ok += 1;
            if self.trials_ok >= self.config.success_threshold {
                tracing::info!(venue = %self.venue, "Circuit closed, venue recovered");
                self.state = CircuitState::Closed;
                self.opened_at = None;
            }
        }
    }

    fn on_failure(&mut self, error: &BrokerError) {
        match self.state {
            CircuitState::Closed => {
                self.failures += 1;
                if self.failures >= self.config.failure_threshold {
                    tracing::error!(
                        venue = %self.venue,
                        failures = self.failures,
                        "Circuit opened after repeated failures, last: {}",
                        error
                    );
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(venue = %self.venue, "Trial request failed ({}), circuit re-opened", error);
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.failures = 0;
        self.trials_ok = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, timeout: Duration) -> CircuitBreaker {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(failures)
            .with_timeout(timeout);
        CircuitBreaker::new(Venue::Oanda, config)
    }

    fn network() -> BrokerResult<()> {
        Err(BrokerError::Network("connection reset".into()))
    }

    #[test]
    fn test_opens_after_transient_failures() {
        let mut cb = breaker(3, Duration::from_secs(60));
        cb.record(&network());
        cb.record(&network());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());

        cb.record(&network());
        assert!(cb.is_open());
        assert!(matches!(cb.check(), Err(BrokerError::CircuitOpen(Venue::Oanda))));
    }

    #[test]
    fn test_rejections_do_not_count() {
        let mut cb = breaker(2, Duration::from_secs(60));
        cb.record(&network());
        cb.record::<()>(&Err(BrokerError::Rejected("insufficient margin".into())));
        cb.record(&network());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trials() {
        let mut cb = breaker(1, Duration::from_millis(1));
        cb.record(&network());
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record(&Ok(()));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record(&Ok(()));
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record(&network());
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.check().is_ok());
        cb.record(&network());
        assert!(cb.is_open());
    }
}
