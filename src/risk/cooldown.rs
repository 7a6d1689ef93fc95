//! Per-pair cooldown and rotation limits

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::types::Symbol;

/// Blocks a pair for a fixed period after a losing or failed trade
#[derive(Debug, Clone)]
pub struct PairCooldown {
    period: Duration,
    blocked_until: HashMap<Symbol, DateTime<Utc>>,
}

impl PairCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            blocked_until: HashMap::new(),
        }
    }

    /// Start (or extend) the cooldown from `at`
    pub fn block(&mut self, symbol: &Symbol, at: DateTime<Utc>) {
        let until = at + self.period;
        let entry = self.blocked_until.entry(symbol.clone()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
        tracing::info!(%symbol, "Cooldown until {}", until.format("%Y-%m-%d %H:%M UTC"));
    }

    /// Time left on the cooldown, if any
    pub fn remaining(&self, symbol: &Symbol, now: DateTime<Utc>) -> Option<Duration> {
        let until = *self.blocked_until.get(symbol)?;
        (until > now).then(|| until - now)
    }

    pub fn clear(&mut self, symbol: &Symbol) {
        self.blocked_until.remove(symbol);
    }
}

/// Keeps one pair from dominating the recent trade selections
#[derive(Debug, Clone)]
pub struct PairRotation {
    history: VecDeque<Symbol>,
    capacity: usize,
    max_per_pair: usize,
}

impl PairRotation {
    pub fn new(capacity: usize, max_per_pair: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            max_per_pair,
        }
    }

    pub fn count(&self, symbol: &Symbol) -> usize {
        self.history.iter().filter(|s| *s == symbol).count()
    }

    pub fn allows(&self, symbol: &Symbol) -> bool {
        self.count(symbol) < self.max_per_pair
    }

    pub fn record(&mut self, symbol: &Symbol) {
        self.history.push_back(symbol.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn window(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_expires() {
        let mut cooldown = PairCooldown::new(Duration::hours(12));
        let eur = Symbol::new("EUR_USD");
        let t0 = Utc::now();

        assert!(cooldown.remaining(&eur, t0).is_none());
        cooldown.block(&eur, t0);
        assert_eq!(cooldown.remaining(&eur, t0 + Duration::hours(2)), Some(Duration::hours(10)));
        assert!(cooldown.remaining(&eur, t0 + Duration::hours(12)).is_none());
    }

    #[test]
    fn test_cooldown_never_shortens() {
        let mut cooldown = PairCooldown::new(Duration::hours(12));
        let eur = Symbol::new("EUR_USD");
        let t0 = Utc::now();

        cooldown.block(&eur, t0);
        // replaying an older loss must not move the end earlier
        cooldown.block(&eur, t0 - Duration::hours(6));
        assert!(cooldown.remaining(&eur, t0 + Duration::hours(11)).is_some());
    }

    #[test]
    fn test_rotation_limit() {
        let mut rotation = PairRotation::new(12, 3);
        let eur = Symbol::new("EUR_USD");
        let gbp = Symbol::new("GBP_USD");

        for _ in 0..3 {
            assert!(rotation.allows(&eur));
            rotation.record(&eur);
        }
        assert!(!rotation.allows(&eur));
        assert!(rotation.allows(&gbp));

        // older selections roll out of the window
        for _ in 0..10 {
            rotation.record(&gbp);
        }
        assert_eq!(rotation.count(&eur), 2);
        assert!(rotation.allows(&eur));
    }
}
