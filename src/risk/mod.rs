//! Risk management and trading guards
//!
//! Sizing turns a setup into a venue-sized order. The guards decide whether a
//! setup may trade at all: emergency bailout, pair cooldown and rotation,
//! strategy health, and the risk/reward floor. All guard state is rebuilt
//! from the ledger on start ([`Guards::replay`]), so nothing here persists on
//! its own.

pub mod bailout;
pub mod capital;
pub mod cooldown;
pub mod guards;
pub mod health;
pub mod sizing;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Symbol, Venue};

pub use bailout::EmergencyBailout;
pub use capital::CapitalTracker;
pub use cooldown::{PairCooldown, PairRotation};
pub use guards::Guards;
pub use health::{Outcome, StrategyHealth};
pub use sizing::{validate_risk_reward, PositionSizer};

/// Why a setup was not traded
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("emergency bailout active: trading halted")]
    Halted,

    #[error("strategy '{0}' is disabled")]
    StrategyDisabled(String),

    #[error("{symbol} cooling down for another {minutes}m")]
    Cooldown { symbol: Symbol, minutes: i64 },

    #[error("{symbol} traded {count} times in the last {window} selections")]
    Rotation {
        symbol: Symbol,
        count: usize,
        window: usize,
    },

    #[error("{symbol} already has an active trade on {venue}")]
    ActiveTrade { symbol: Symbol, venue: Venue },

    #[error("{0} trades already open")]
    MaxOpenTrades(usize),

    #[error("risk/reward {ratio:.2} below minimum {min:.2}")]
    RiskReward { ratio: f64, min: f64 },

    #[error("stop {pips:.1} pips from entry, minimum is {min:.1}")]
    StopTooTight { pips: f64, min: f64 },

    #[error("position size {0} rounds to nothing")]
    SizeTooSmall(f64),

    #[error("no capital available")]
    NoCapital,

    #[error("{0} cannot open short positions")]
    ShortUnsupported(Venue),
}

/// `risk` section of the config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub initial_capital: f64,
    /// Ceiling on the capital used for sizing
    pub max_capital: Option<f64>,
    pub account_currency: String,
    pub risk_per_trade: f64,
    /// Margin a single position may use, as a fraction of capital
    pub max_position_pct: f64,
    /// Tighter per-strategy caps on `max_position_pct`
    pub strategy_position_caps: HashMap<String, f64>,
    /// Leverage assumed for forex instruments
    pub forex_leverage: f64,
    pub min_risk_reward: f64,
    pub min_stop_pips: f64,
    pub max_open_trades: usize,
    pub consecutive_loss_limit: usize,
    pub consecutive_loss_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: 3000.0,
            max_capital: None,
            account_currency: "USD".to_string(),
            risk_per_trade: 0.01,
            max_position_pct: 0.20,
            strategy_position_caps: HashMap::from([("momentum".to_string(), 0.05)]),
            forex_leverage: 30.0,
            min_risk_reward: 1.5,
            min_stop_pips: 5.0,
            max_open_trades: 5,
            consecutive_loss_limit: 3,
            consecutive_loss_multiplier: 0.75,
        }
    }
}

/// `guards` section of the config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub bailout_window: usize,
    pub bailout_win_rate: f64,
    pub cooldown_hours: i64,
    pub rotation_history: usize,
    pub rotation_max: usize,
    pub health_consecutive_failures: usize,
    pub health_window_hours: i64,
    pub health_min_trades: usize,
    pub health_max_failure_rate: f64,
    pub max_strategy_loss: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            bailout_window: 12,
            bailout_win_rate: 0.35,
            cooldown_hours: 12,
            rotation_history: 12,
            rotation_max: 3,
            health_consecutive_failures: 3,
            health_window_hours: 24,
            health_min_trades: 10,
            health_max_failure_rate: 0.7,
            max_strategy_loss: -1000.0,
        }
    }
}

impl GuardConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::hours(self.cooldown_hours)
    }

    pub fn health_window(&self) -> Duration {
        Duration::hours(self.health_window_hours)
    }
}
