//! Trade records, lifecycle states and ledger errors

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Side, Symbol, Venue};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("trade {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TradeState,
        to: TradeState,
    },

    #[error("an active trade already exists for {symbol} on {venue}")]
    DuplicateActive { venue: Venue, symbol: Symbol },

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("trade not found: {0}")]
    NotFound(String),

    #[error("ledger lock poisoned")]
    Poisoned,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Lifecycle of a bracket trade
///
/// ```text
/// Pending ──> Filled ──> Protected ──> Closed
///    │           │  <────────┘           ^
///    v           └───────────────────────┘
/// Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeState {
    /// Entry order about to be (or being) submitted
    Pending,
    /// Entry filled, no confirmed protection
    Filled,
    /// Entry filled with live stop-loss and take-profit
    Protected,
    Closed,
    /// Entry never filled
    Failed,
}

impl TradeState {
    pub const ACTIVE: [TradeState; 3] = [TradeState::Pending, TradeState::Filled, TradeState::Protected];

    pub fn as_str(self) -> &'static str {
        match self {
            TradeState::Pending => "pending",
            TradeState::Filled => "filled",
            TradeState::Protected => "protected",
            TradeState::Closed => "closed",
            TradeState::Failed => "failed",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            TradeState::Pending | TradeState::Filled | TradeState::Protected
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: TradeState) -> bool {
        use TradeState::*;
        matches!(
            (self, next),
            (Pending, Filled)
                | (Pending, Failed)
                | (Filled, Protected)
                | (Filled, Closed)
                | (Protected, Closed)
                | (Protected, Filled)
        )
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeState::Pending),
            "filled" => Ok(TradeState::Filled),
            "protected" => Ok(TradeState::Protected),
            "closed" => Ok(TradeState::Closed),
            "failed" => Ok(TradeState::Failed),
            other => Err(LedgerError::InvalidTrade(format!("unknown state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Protection could not be attached after the fill, position flattened
    Compensated,
    /// Closed by an operator or emergency flatten
    Flattened,
    /// Closed at the venue by something other than our orders
    External,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Compensated => "compensated",
            ExitReason::Flattened => "flattened",
            ExitReason::External => "external",
        };
        f.write_str(s)
    }
}

/// Venue ids of the protective orders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionIds {
    pub stop_loss_id: Option<String>,
    pub take_profit_id: Option<String>,
    /// Single order carrying both legs (Coinbase `trigger_bracket_gtc`)
    pub bracket_id: Option<String>,
}

impl ProtectionIds {
    pub fn bracket(id: impl Into<String>) -> Self {
        Self {
            bracket_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn legs(stop_loss_id: impl Into<String>, take_profit_id: impl Into<String>) -> Self {
        Self {
            stop_loss_id: Some(stop_loss_id.into()),
            take_profit_id: Some(take_profit_id.into()),
            bracket_id: None,
        }
    }

    /// Both sides of the exit are covered
    pub fn is_complete(&self) -> bool {
        self.bracket_id.is_some() || (self.stop_loss_id.is_some() && self.take_profit_id.is_some())
    }

    pub fn order_ids(&self) -> Vec<String> {
        [&self.bracket_id, &self.stop_loss_id, &self.take_profit_id]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Request to open a trade; validated before anything touches a venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub venue: Venue,
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
    pub confidence: f64,
}

impl NewTrade {
    pub fn validate(&self) -> LedgerResult<()> {
        let prices = [self.entry_price, self.stop_loss, self.take_profit];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(LedgerError::InvalidTrade(format!(
                "prices must be finite and positive: entry={} sl={} tp={}",
                self.entry_price, self.stop_loss, self.take_profit
            )));
        }
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(LedgerError::InvalidTrade(format!(
                "size must be positive, got {}",
                self.size
            )));
        }
        if self.stop_loss == self.take_profit {
            return Err(LedgerError::InvalidTrade(format!(
                "stop loss equals take profit ({})",
                self.stop_loss
            )));
        }

        let ordered = match self.side {
            Side::Buy => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Side::Sell => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        };
        if !ordered {
            return Err(LedgerError::InvalidTrade(format!(
                "{} bracket out of order: sl={} entry={} tp={}",
                self.side, self.stop_loss, self.entry_price, self.take_profit
            )));
        }
        Ok(())
    }
}

/// Canonical record of one bracket trade (the `trades` projection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    /// Idempotency key sent with the entry order
    pub client_order_id: String,
    pub venue: Venue,
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
    pub confidence: f64,
    pub state: TradeState,

    pub fill_price: Option<f64>,
    pub filled_size: Option<f64>,
    pub venue_order_id: Option<String>,
    pub venue_trade_id: Option<String>,
    pub protection: ProtectionIds,

    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
    pub fees: f64,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn from_new(new: NewTrade, now: DateTime<Utc>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            client_order_id: id.clone(),
            id,
            venue: new.venue,
            symbol: new.symbol,
            side: new.side,
            size: new.size,
            entry_price: new.entry_price,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
            strategy: new.strategy,
            confidence: new.confidence,
            state: TradeState::Pending,
            fill_price: None,
            filled_size: None,
            venue_order_id: None,
            venue_trade_id: None,
            protection: ProtectionIds::default(),
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            fees: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Filled size if known, else the requested size
    pub fn position_size(&self) -> f64 {
        self.filled_size.unwrap_or(self.size)
    }

    /// Fill price if known, else the requested entry
    pub fn entry(&self) -> f64 {
        self.fill_price.unwrap_or(self.entry_price)
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl.is_some_and(|p| p > 0.0)
    }

    /// P&L from prices when the venue did not report one
    pub fn price_pnl(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry()) * self.position_size() * self.side.sign()
    }
}

/// Fill details reported by the venue for the entry order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillUpdate {
    pub fill_price: f64,
    pub filled_size: f64,
    pub venue_order_id: Option<String>,
    pub venue_trade_id: Option<String>,
    pub fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseUpdate {
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub fees: f64,
    pub reason: ExitReason,
}

/// One row of the append-only `events` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub seq: i64,
    pub trade_id: String,
    pub from_state: Option<TradeState>,
    pub to_state: TradeState,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Engine state written after every scan cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub cycle_count: u64,
    pub capital: f64,
    pub active_trades: usize,
    pub halted: bool,
    pub paper_mode: bool,
    pub config_hash: String,
}

/// Operator override of a guard
///
/// Guard state is rebuilt from trades on every start, so overrides are
/// stored too and applied at the point in the trade history they were made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "strategy", rename_all = "snake_case")]
pub enum GuardReset {
    Bailout,
    Strategy(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResetEntry {
    pub reset: GuardReset,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: Option<NaiveDate>,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub realized_pnl: f64,
    pub fees: f64,
}

impl DailyStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_trade(side: Side, entry: f64, sl: f64, tp: f64) -> NewTrade {
        NewTrade {
            venue: Venue::Oanda,
            symbol: Symbol::new("EUR_USD"),
            side,
            size: 1000.0,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            strategy: "fvg".into(),
            confidence: 0.85,
        }
    }

    #[test]
    fn test_state_machine_edges() {
        use TradeState::*;
        let allowed = [
            (Pending, Filled),
            (Pending, Failed),
            (Filled, Protected),
            (Filled, Closed),
            (Protected, Closed),
            (Protected, Filled),
        ];
        let all = [Pending, Filled, Protected, Closed, Failed];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
        assert!(Closed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_validate_brackets() {
        assert!(new_trade(Side::Buy, 1.10, 1.09, 1.13).validate().is_ok());
        assert!(new_trade(Side::Sell, 1.10, 1.11, 1.07).validate().is_ok());

        // wrong side of entry
        assert!(new_trade(Side::Buy, 1.10, 1.11, 1.13).validate().is_err());
        assert!(new_trade(Side::Sell, 1.10, 1.09, 1.07).validate().is_err());
        // sl == tp
        assert!(new_trade(Side::Buy, 1.10, 1.10, 1.10).validate().is_err());
        // nonsense numbers
        assert!(new_trade(Side::Buy, f64::NAN, 1.09, 1.13).validate().is_err());
        let mut zero = new_trade(Side::Buy, 1.10, 1.09, 1.13);
        zero.size = 0.0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_protection_completeness() {
        assert!(!ProtectionIds::default().is_complete());
        assert!(ProtectionIds::bracket("b1").is_complete());
        assert!(ProtectionIds::legs("sl", "tp").is_complete());

        let half = ProtectionIds {
            stop_loss_id: Some("sl".into()),
            ..Default::default()
        };
        assert!(!half.is_complete());
        assert_eq!(ProtectionIds::legs("sl", "tp").order_ids(), vec!["sl", "tp"]);
    }

    #[test]
    fn test_price_pnl_uses_side() {
        let mut rec = TradeRecord::from_new(new_trade(Side::Sell, 1.10, 1.11, 1.07), Utc::now());
        rec.fill_price = Some(1.1000);
        rec.filled_size = Some(10_000.0);
        assert!((rec.price_pnl(1.0900) - 100.0).abs() < 1e-6);
        assert!((rec.price_pnl(1.1100) + 100.0).abs() < 1e-6);
        assert_eq!(rec.client_order_id, rec.id);
    }
}
