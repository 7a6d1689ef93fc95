//! Strategy health: disables strategies that keep failing

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::GuardConfig;

/// Result of one trade as far as the guards care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    /// Closed flat
    Breakeven,
    /// Entry never filled
    Failed,
}

impl Outcome {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            Outcome::Win
        } else if pnl < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Breakeven
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Loss | Outcome::Failed)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    at: DateTime<Utc>,
    outcome: Outcome,
    pnl: f64,
}

#[derive(Debug, Clone)]
pub struct StrategyHealth {
    consecutive_failures: usize,
    window: Duration,
    min_trades: usize,
    max_failure_rate: f64,
    max_loss: f64,
    history: HashMap<String, Vec<Entry>>,
    disabled: HashMap<String, String>,
}

impl StrategyHealth {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            consecutive_failures: config.health_consecutive_failures.max(1),
            window: config.health_window(),
            min_trades: config.health_min_trades,
            max_failure_rate: config.health_max_failure_rate,
            max_loss: config.max_strategy_loss,
            history: HashMap::new(),
            disabled: HashMap::new(),
        }
    }

    pub fn record(&mut self, strategy: &str, outcome: Outcome, pnl: f64, at: DateTime<Utc>) {
        let trades = self.history.entry(strategy.to_string()).or_default();
        trades.push(Entry { at, outcome, pnl });
        let cutoff = at - self.window;
        trades.retain(|e| e.at > cutoff);

        if self.disabled.contains_key(strategy) {
            return;
        }
        if let Some(reason) = self.check(strategy) {
            tracing::warn!(strategy, "STRATEGY DISABLED: {}", reason);
            self.disabled.insert(strategy.to_string(), reason);
        }
    }

    fn check(&self, strategy: &str) -> Option<String> {
        let trades = self.history.get(strategy)?;

        let n = self.consecutive_failures;
        if trades.len() >= n && trades[trades.len() - n..].iter().all(|e| e.outcome.is_failure()) {
            return Some(format!("{} consecutive failures", n));
        }

        if trades.len() >= self.min_trades {
            let failures = trades.iter().filter(|e| e.outcome.is_failure()).count();
            let rate = failures as f64 / trades.len() as f64;
            if rate > self.max_failure_rate {
                return Some(format!("failure rate {:.1}% over {} trades", rate * 100.0, trades.len()));
            }
        }

        let pnl: f64 = trades.iter().map(|e| e.pnl).sum();
        if pnl < self.max_loss {
            return Some(format!("window P&L {:.2} below {:.2}", pnl, self.max_loss));
        }

        None
    }

    pub fn is_enabled(&self, strategy: &str) -> bool {
        !self.disabled.contains_key(strategy)
    }

    pub fn disabled_reason(&self, strategy: &str) -> Option<&str> {
        self.disabled.get(strategy).map(String::as_str)
    }

    pub fn disabled(&self) -> HashSet<String> {
        self.disabled.keys().cloned().collect()
    }

    /// Re-enable with a clean history
    pub fn enable(&mut self, strategy: &str) {
        if self.disabled.remove(strategy).is_some() {
            tracing::info!(strategy, "Strategy re-enabled");
        }
        self.history.remove(strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> StrategyHealth {
        StrategyHealth::new(&GuardConfig::default())
    }

    #[test]
    fn test_consecutive_failures_disable() {
        let mut h = health();
        let t0 = Utc::now();
        h.record("fvg", Outcome::Loss, -10.0, t0);
        h.record("fvg", Outcome::Failed, 0.0, t0);
        assert!(h.is_enabled("fvg"));
        h.record("fvg", Outcome::Loss, -10.0, t0);
        assert!(!h.is_enabled("fvg"));
        assert!(h.is_enabled("momentum"));
    }

    #[test]
    fn test_failure_rate_needs_min_trades() {
        let mut h = health();
        let t0 = Utc::now();
        // L L W repeated: never 3 in a row, 66% failures
        for i in 0..9 {
            let outcome = if i % 3 == 2 { Outcome::Win } else { Outcome::Loss };
            h.record("fvg", outcome, 0.0, t0 + Duration::minutes(i));
        }
        assert!(h.is_enabled("fvg"));

        // 10 trades: 7 failures = 70%, not above the limit
        h.record("fvg", Outcome::Loss, 0.0, t0 + Duration::minutes(10));
        assert!(h.is_enabled("fvg"));

        // 11 trades: 8/11 = 72.7%, last three are W L L
        h.record("fvg", Outcome::Loss, 0.0, t0 + Duration::minutes(11));
        assert!(!h.is_enabled("fvg"));
    }

    #[test]
    fn test_old_trades_leave_the_window() {
        let mut h = health();
        let t0 = Utc::now();
        h.record("fvg", Outcome::Loss, -10.0, t0);
        h.record("fvg", Outcome::Loss, -10.0, t0);
        h.record("fvg", Outcome::Loss, -10.0, t0 + Duration::hours(25));
        assert!(h.is_enabled("fvg"));
    }

    #[test]
    fn test_loss_limit_and_reenable() {
        let mut h = health();
        let t0 = Utc::now();
        h.record("momentum", Outcome::Win, 50.0, t0);
        h.record("momentum", Outcome::Loss, -1200.0, t0);
        assert!(!h.is_enabled("momentum"));
        assert!(h.disabled_reason("momentum").unwrap().contains("P&L"));

        h.enable("momentum");
        assert!(h.is_enabled("momentum"));
        h.record("momentum", Outcome::Loss, -10.0, t0);
        assert!(h.is_enabled("momentum"));
    }
}
