//! Venue I/O error types

use thiserror::Error;

use crate::types::Venue;

/// Failures talking to a trading venue
///
/// The split that matters to callers is [`BrokerError::is_transient`]: transient
/// errors are retried with backoff, everything else surfaces immediately.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("{venue} API error ({status}): {message}")]
    Api {
        venue: Venue,
        status: u16,
        message: String,
    },

    #[error("rate limited by {0}")]
    RateLimited(Venue),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(Venue),
}

impl BrokerError {
    pub fn api(venue: Venue, status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => BrokerError::RateLimited(venue),
            401 | 403 => BrokerError::Auth(format!("{} ({}): {}", venue, status, message.into())),
            _ => BrokerError::Api {
                venue,
                status,
                message: message.into(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Api { status: 404, .. })
    }

    /// Whether retrying the same request might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Network(_) | BrokerError::Timeout(_) | BrokerError::RateLimited(_) => {
                true
            }
            BrokerError::Api { status, .. } => *status >= 500,
            BrokerError::Auth(_)
            | BrokerError::Parse(_)
            | BrokerError::Rejected(_)
            | BrokerError::Unsupported(_)
            | BrokerError::CircuitOpen(_) => false,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::Timeout(err.to_string())
        } else if err.is_decode() {
            BrokerError::Parse(err.to_string())
        } else {
            BrokerError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Parse(err.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            BrokerError::api(Venue::Oanda, 429, "slow down"),
            BrokerError::RateLimited(Venue::Oanda)
        ));
        assert!(matches!(
            BrokerError::api(Venue::Coinbase, 401, "bad jwt"),
            BrokerError::Auth(_)
        ));
        assert!(matches!(
            BrokerError::api(Venue::Coinbase, 400, "bad size"),
            BrokerError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Network("reset".into()).is_transient());
        assert!(BrokerError::Timeout("30s".into()).is_transient());
        assert!(BrokerError::api(Venue::Oanda, 503, "maintenance").is_transient());
        assert!(BrokerError::api(Venue::Oanda, 429, "").is_transient());

        assert!(!BrokerError::api(Venue::Oanda, 400, "INSUFFICIENT_MARGIN").is_transient());
        assert!(!BrokerError::Rejected("FOK not filled".into()).is_transient());
        assert!(!BrokerError::Auth("expired".into()).is_transient());
        assert!(!BrokerError::CircuitOpen(Venue::Coinbase).is_transient());
    }

    #[test]
    fn test_not_found() {
        assert!(BrokerError::api(Venue::Oanda, 404, "ORDER_DOESNT_EXIST").is_not_found());
        assert!(!BrokerError::api(Venue::Oanda, 400, "bad").is_not_found());
        assert!(!BrokerError::Rejected("404".into()).is_not_found());
    }
}
