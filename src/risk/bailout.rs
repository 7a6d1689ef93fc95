//! Emergency bailout: halts all trading when the recent win rate collapses

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct EmergencyBailout {
    window: usize,
    min_win_rate: f64,
    results: VecDeque<bool>,
    triggered: bool,
}

impl EmergencyBailout {
    pub fn new(window: usize, min_win_rate: f64) -> Self {
        Self {
            window: window.max(1),
            min_win_rate,
            results: VecDeque::with_capacity(window),
            triggered: false,
        }
    }

    /// Record one closed trade; only a full window can trigger
    pub fn record(&mut self, win: bool) {
        self.results.push_back(win);
        while self.results.len() > self.window {
            self.results.pop_front();
        }

        if !self.triggered && self.results.len() == self.window && self.win_rate() < self.min_win_rate {
            self.triggered = true;
            tracing::error!(
                "EMERGENCY BAILOUT: win rate {:.1}% over last {} trades (minimum {:.1}%). Trading halted.",
                self.win_rate() * 100.0,
                self.window,
                self.min_win_rate * 100.0
            );
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        self.results.iter().filter(|&&w| w).count() as f64 / self.results.len() as f64
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Manual reset: clears the halt and the window
    pub fn reset(&mut self) {
        self.triggered = false;
        self.results.clear();
        tracing::info!("Emergency bailout reset, trading re-enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_full_window() {
        let mut bailout = EmergencyBailout::new(12, 0.35);
        for _ in 0..11 {
            bailout.record(false);
        }
        assert!(!bailout.is_triggered());
        bailout.record(false);
        assert!(bailout.is_triggered());
    }

    #[test]
    fn test_threshold() {
        let mut bailout = EmergencyBailout::new(12, 0.35);
        // 5/12 = 41.7%
        for i in 0..12 {
            bailout.record(i % 12 < 5);
        }
        assert!(!bailout.is_triggered());

        // slide to 4/12 = 33.3%
        bailout.record(false);
        assert!(bailout.is_triggered());
    }

    #[test]
    fn test_halt_is_sticky_until_reset() {
        let mut bailout = EmergencyBailout::new(3, 0.5);
        for _ in 0..3 {
            bailout.record(false);
        }
        for _ in 0..3 {
            bailout.record(true);
        }
        assert!(bailout.is_triggered());

        bailout.reset();
        assert!(!bailout.is_triggered());
        assert_eq!(bailout.win_rate(), 1.0);
    }
}
