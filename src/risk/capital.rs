//! Capital tracking
//!
//! Capital is the configured starting balance plus realized P&L from the
//! ledger. It never goes negative, and sizing can be capped below it.

#[derive(Debug, Clone)]
pub struct CapitalTracker {
    initial: f64,
    max_capital: Option<f64>,
    realized: f64,
    peak: f64,
}

impl CapitalTracker {
    pub fn new(initial: f64, max_capital: Option<f64>) -> Self {
        let initial = initial.max(0.0);
        Self {
            initial,
            max_capital,
            realized: 0.0,
            peak: initial,
        }
    }

    pub fn record(&mut self, pnl: f64) {
        if !pnl.is_finite() {
            tracing::warn!("Ignoring non-finite P&L {}", pnl);
            return;
        }
        self.realized += pnl;
        self.peak = self.peak.max(self.current());
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }

    pub fn realized(&self) -> f64 {
        self.realized
    }

    /// Current capital, floored at zero
    pub fn current(&self) -> f64 {
        (self.initial + self.realized).max(0.0)
    }

    /// Capital used for position sizing
    pub fn sizing_capital(&self) -> f64 {
        match self.max_capital {
            Some(max) => self.current().min(max),
            None => self.current(),
        }
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        (self.peak - self.current()) / self.peak
    }

    pub fn reset(&mut self) {
        self.realized = 0.0;
        self.peak = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_floor_and_ceiling() {
        let mut capital = CapitalTracker::new(3000.0, Some(5000.0));
        capital.record(4000.0);
        assert_relative_eq!(capital.current(), 7000.0);
        assert_relative_eq!(capital.sizing_capital(), 5000.0);

        capital.record(-10_000.0);
        assert_relative_eq!(capital.current(), 0.0);
        assert_relative_eq!(capital.drawdown(), 1.0);
    }

    #[test]
    fn test_ignores_nan() {
        let mut capital = CapitalTracker::new(3000.0, None);
        capital.record(f64::NAN);
        assert_relative_eq!(capital.current(), 3000.0);
    }
}
