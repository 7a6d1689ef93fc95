//! Guard composition
//!
//! One place the engine asks "may this setup trade?" and tells "this trade
//! finished". The engine keeps a single `Guards` behind a mutex shared by the
//! scan and monitor loops.

use chrono::{DateTime, Utc};

use super::{
    validate_risk_reward, CapitalTracker, EmergencyBailout, GuardConfig, Outcome, PairCooldown,
    PairRotation, Rejection, RiskConfig, StrategyHealth,
};
use crate::ledger::{GuardReset, GuardResetEntry, TradeRecord, TradeState};
use crate::signals::Setup;

#[derive(Debug, Clone)]
pub struct Guards {
    bailout: EmergencyBailout,
    cooldown: PairCooldown,
    rotation: PairRotation,
    health: StrategyHealth,
    capital: CapitalTracker,
    min_risk_reward: f64,
    consecutive_losses: usize,
    config: GuardConfig,
    max_capital: Option<f64>,
    initial_capital: f64,
}

impl Guards {
    pub fn new(config: &GuardConfig, risk: &RiskConfig) -> Self {
        Self {
            bailout: EmergencyBailout::new(config.bailout_window, config.bailout_win_rate),
            cooldown: PairCooldown::new(config.cooldown()),
            rotation: PairRotation::new(config.rotation_history, config.rotation_max),
            health: StrategyHealth::new(config),
            capital: CapitalTracker::new(risk.initial_capital, risk.max_capital),
            min_risk_reward: risk.min_risk_reward,
            consecutive_losses: 0,
            config: config.clone(),
            max_capital: risk.max_capital,
            initial_capital: risk.initial_capital,
        }
    }

    /// Every guard that applies before sizing
    pub fn check_entry(&self, setup: &Setup, now: DateTime<Utc>) -> Result<(), Rejection> {
        if self.bailout.is_triggered() {
            return Err(Rejection::Halted);
        }
        if !self.health.is_enabled(&setup.strategy) {
            return Err(Rejection::StrategyDisabled(setup.strategy.clone()));
        }
        if let Some(left) = self.cooldown.remaining(&setup.symbol, now) {
            return Err(Rejection::Cooldown {
                symbol: setup.symbol.clone(),
                minutes: left.num_minutes().max(1),
            });
        }
        if !self.rotation.allows(&setup.symbol) {
            return Err(Rejection::Rotation {
                symbol: setup.symbol.clone(),
                count: self.rotation.count(&setup.symbol),
                window: self.rotation.window(),
            });
        }
        validate_risk_reward(setup, self.min_risk_reward)
    }

    /// A trade was opened on this symbol
    pub fn record_open(&mut self, trade: &TradeRecord) {
        self.rotation.record(&trade.symbol);
    }

    pub fn record_close(&mut self, trade: &TradeRecord) {
        let pnl = trade.realized_pnl.unwrap_or(0.0);
        let at = trade.closed_at.unwrap_or(trade.updated_at);
        let outcome = Outcome::from_pnl(pnl);

        self.capital.record(pnl);
        self.bailout.record(outcome == Outcome::Win);
        self.health.record(&trade.strategy, outcome, pnl, at);
        match outcome {
            Outcome::Loss => {
                self.consecutive_losses += 1;
                self.cooldown.block(&trade.symbol, at);
            }
            Outcome::Win => self.consecutive_losses = 0,
            Outcome::Breakeven | Outcome::Failed => {}
        }

        tracing::info!(
            symbol = %trade.symbol,
            strategy = %trade.strategy,
            "Closed {:?}: pnl {:.2}, capital {:.2}",
            outcome,
            pnl,
            self.capital.current()
        );
    }

    /// Entry never filled
    pub fn record_failure(&mut self, trade: &TradeRecord) {
        let at = trade.closed_at.unwrap_or(trade.updated_at);
        self.cooldown.block(&trade.symbol, at);
        self.health.record(&trade.strategy, Outcome::Failed, 0.0, at);
    }

    /// Rebuild all guard state from the ledger
    ///
    /// Operator resets are applied where they fall in the trade history, so
    /// trades closed after a reset still count.
    pub fn replay(&mut self, trades: &[TradeRecord], resets: &[GuardResetEntry]) {
        *self = Guards {
            bailout: EmergencyBailout::new(self.config.bailout_window, self.config.bailout_win_rate),
            cooldown: PairCooldown::new(self.config.cooldown()),
            rotation: PairRotation::new(self.config.rotation_history, self.config.rotation_max),
            health: StrategyHealth::new(&self.config),
            capital: CapitalTracker::new(self.initial_capital, self.max_capital),
            consecutive_losses: 0,
            ..self.clone()
        };

        let mut opened: Vec<&TradeRecord> = trades.iter().filter(|t| t.state != TradeState::Failed).collect();
        opened.sort_by_key(|t| t.created_at);
        for trade in opened {
            self.record_open(trade);
        }

        let mut finished: Vec<&TradeRecord> = trades.iter().filter(|t| t.state.is_terminal()).collect();
        finished.sort_by_key(|t| t.closed_at.unwrap_or(t.updated_at));
        let mut resets: Vec<&GuardResetEntry> = resets.iter().collect();
        resets.sort_by_key(|r| r.at);
        let mut pending_resets = resets.into_iter().peekable();

        let mut closed = 0;
        for trade in finished {
            let at = trade.closed_at.unwrap_or(trade.updated_at);
            while let Some(reset) = pending_resets.next_if(|r| r.at <= at) {
                self.apply_reset(&reset.reset);
            }
            match trade.state {
                TradeState::Closed => {
                    self.record_close(trade);
                    closed += 1;
                }
                TradeState::Failed => self.record_failure(trade),
                _ => {}
            }
        }
        for reset in pending_resets {
            self.apply_reset(&reset.reset);
        }

        tracing::info!(
            "Guards replayed: {} closed trades, capital {:.2}, bailout {}, disabled strategies {:?}",
            closed,
            self.capital.current(),
            if self.bailout.is_triggered() { "ACTIVE" } else { "off" },
            self.health.disabled()
        );
    }

    pub fn apply_reset(&mut self, reset: &GuardReset) {
        match reset {
            GuardReset::Bailout => self.reset_bailout(),
            GuardReset::Strategy(name) => self.enable_strategy(name),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.bailout.is_triggered()
    }

    pub fn reset_bailout(&mut self) {
        self.bailout.reset();
    }

    pub fn enable_strategy(&mut self, strategy: &str) {
        self.health.enable(strategy);
    }

    pub fn capital(&self) -> &CapitalTracker {
        &self.capital
    }

    pub fn consecutive_losses(&self) -> usize {
        self.consecutive_losses
    }

    pub fn health(&self) -> &StrategyHealth {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewTrade;
    use crate::types::{Side, Symbol, Venue};
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn setup(symbol: &str, strategy: &str) -> Setup {
        Setup {
            symbol: Symbol::new(symbol),
            side: Side::Buy,
            entry: 1.1000,
            stop_loss: 1.0980,
            take_profit: 1.1060,
            confidence: 0.85,
            kind: "bullish_fvg".into(),
            strategy: strategy.into(),
        }
    }

    fn finished(symbol: &str, state: TradeState, pnl: Option<f64>, at: DateTime<Utc>) -> TradeRecord {
        let mut rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Oanda,
                symbol: Symbol::new(symbol),
                side: Side::Buy,
                size: 1000.0,
                entry_price: 1.1,
                stop_loss: 1.09,
                take_profit: 1.13,
                strategy: "fvg".into(),
                confidence: 0.85,
            },
            at - Duration::minutes(30),
        );
        rec.state = state;
        rec.realized_pnl = pnl;
        rec.closed_at = Some(at);
        rec.updated_at = at;
        rec
    }

    fn guards() -> Guards {
        Guards::new(&GuardConfig::default(), &RiskConfig::default())
    }

    #[test]
    fn test_loss_starts_cooldown() {
        let mut g = guards();
        let now = Utc::now();
        assert!(g.check_entry(&setup("EUR_USD", "fvg"), now).is_ok());

        g.record_close(&finished("EUR_USD", TradeState::Closed, Some(-25.0), now));
        assert!(matches!(
            g.check_entry(&setup("EUR_USD", "fvg"), now + Duration::hours(1)),
            Err(Rejection::Cooldown { .. })
        ));
        assert!(g.check_entry(&setup("GBP_USD", "fvg"), now).is_ok());
        assert!(g.check_entry(&setup("EUR_USD", "fvg"), now + Duration::hours(13)).is_ok());
        assert_relative_eq!(g.capital().current(), 2975.0);
    }

    #[test]
    fn test_win_has_no_cooldown() {
        let mut g = guards();
        let now = Utc::now();
        g.record_close(&finished("EUR_USD", TradeState::Closed, Some(40.0), now));
        assert!(g.check_entry(&setup("EUR_USD", "fvg"), now).is_ok());
        assert_eq!(g.consecutive_losses(), 0);
    }

    #[test]
    fn test_risk_reward_floor() {
        let g = guards();
        let mut s = setup("EUR_USD", "fvg");
        s.take_profit = 1.1020;
        assert!(matches!(
            g.check_entry(&s, Utc::now()),
            Err(Rejection::RiskReward { .. })
        ));
    }

    #[test]
    fn test_replay_rebuilds_state() {
        let t0 = Utc::now() - Duration::hours(48);
        let trades: Vec<TradeRecord> = (0..12)
            .map(|i| {
                let symbol = ["EUR_USD", "GBP_USD", "AUD_USD", "NZD_USD"][i % 4];
                finished(symbol, TradeState::Closed, Some(-10.0), t0 + Duration::hours(i as i64 * 3))
            })
            .collect();

        let mut g = guards();
        g.replay(&trades, &[]);
        assert!(g.is_halted());
        assert_relative_eq!(g.capital().current(), 2880.0);
        assert_eq!(g.check_entry(&setup("EUR_USD", "momentum"), Utc::now()), Err(Rejection::Halted));

        // replay is idempotent
        g.replay(&trades, &[]);
        assert_relative_eq!(g.capital().current(), 2880.0);

        g.reset_bailout();
        assert!(!g.is_halted());
    }

    #[test]
    fn test_replay_applies_resets_in_order() {
        let t0 = Utc::now() - Duration::hours(48);
        let mut trades: Vec<TradeRecord> = (0..12)
            .map(|i| finished("EUR_USD", TradeState::Closed, Some(-10.0), t0 + Duration::hours(i)))
            .collect();
        let reset = GuardResetEntry {
            reset: GuardReset::Bailout,
            at: t0 + Duration::hours(20),
        };

        let mut g = guards();
        g.replay(&trades, std::slice::from_ref(&reset));
        assert!(!g.is_halted());
        // capital still counts every trade
        assert_relative_eq!(g.capital().current(), 2880.0);

        // a fresh window of losses after the reset halts again
        trades.extend((0..12).map(|i| {
            finished("GBP_USD", TradeState::Closed, Some(-10.0), t0 + Duration::hours(21 + i))
        }));
        g.replay(&trades, &[reset]);
        assert!(g.is_halted());
    }

    #[test]
    fn test_failed_entry_counts_against_strategy() {
        let mut g = guards();
        let now = Utc::now();
        for symbol in ["EUR_USD", "GBP_USD", "AUD_USD"] {
            g.record_failure(&finished(symbol, TradeState::Failed, None, now));
        }
        assert_eq!(
            g.check_entry(&setup("NZD_USD", "fvg"), now),
            Err(Rejection::StrategyDisabled("fvg".into()))
        );
        assert!(g.check_entry(&setup("NZD_USD", "momentum"), now).is_ok());
    }
}
