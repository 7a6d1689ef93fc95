//! OCO bracket execution and monitoring
//!
//! [`OcoExecutor`] runs the opening saga: record, enter, protect, and flatten
//! if protection cannot be attached. [`OcoMonitor`] keeps every active trade
//! honest afterwards: it records venue-side closes, repairs naked positions,
//! settles entries whose outcome was lost and trails stops. Both write every
//! step to the ledger before moving on.
//!
//! A trade belongs to the executor until `open` returns; the monitor shares
//! the executor and leaves those trades alone.

pub mod executor;
pub mod monitor;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::BrokerError;
use crate::ledger::{CloseUpdate, ExitReason, LedgerError, SqliteLedger, TradeRecord};
use crate::venues::{Broker, ExitFill};

pub use executor::{OcoExecutor, OpenOutcome};
pub use monitor::{MonitorReport, OcoMonitor};

#[derive(Debug, Error)]
pub enum OcoError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type OcoResult<T> = Result<T, OcoError>;

/// `monitor` section of the config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Attempts to attach protection before flattening
    pub protection_attempts: u32,
    pub protection_retry_ms: u64,
    /// How long a `pending` trade the venue has no order for is given
    /// before it is failed
    pub pending_timeout_secs: i64,
    pub trailing: TrailingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            protection_attempts: 3,
            protection_retry_ms: 1000,
            pending_timeout_secs: 300,
            trailing: TrailingConfig::default(),
        }
    }
}

/// `monitor.trailing` section
///
/// Once a protected trade's open profit passes `activation` times its
/// distance from entry to stop, the stop moves to `entry + lock * profit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    pub activation: f64,
    pub lock: f64,
    /// Smallest move worth a venue round trip, as a fraction of the profit
    pub min_step: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation: 0.5,
            lock: 0.5,
            min_step: 0.1,
        }
    }
}

impl TrailingConfig {
    /// New stop for `trade` at exit price `price`, if it should move
    pub fn stop_for(&self, trade: &TradeRecord, price: f64) -> Option<f64> {
        if !self.enabled || !price.is_finite() {
            return None;
        }
        let entry = trade.entry();
        let dir = trade.side.sign();
        let profit = (price - entry) * dir;
        let risk = (entry - trade.stop_loss).abs();
        if profit <= 0.0 || profit <= risk * self.activation {
            return None;
        }

        let stop = entry + dir * profit * self.lock;
        let gain = (stop - trade.stop_loss) * dir;
        let short_of_target = (trade.take_profit - stop) * dir > 0.0;
        (gain > 0.0 && gain >= profit * self.min_step && short_of_target).then_some(stop)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn protection_retry(&self) -> Duration {
        Duration::from_millis(self.protection_retry_ms)
    }
}

/// Net realized P&L for an exit
///
/// Venue-reported P&L wins. Otherwise it comes from prices, less the fees
/// paid on both legs.
pub fn realized_pnl(trade: &TradeRecord, exit: &ExitFill) -> f64 {
    match exit.realized_pnl {
        Some(pnl) => pnl,
        None => trade.price_pnl(exit.exit_price) - trade.fees - exit.fees,
    }
}

pub fn close_update(trade: &TradeRecord, exit: &ExitFill) -> CloseUpdate {
    CloseUpdate {
        exit_price: exit.exit_price,
        realized_pnl: realized_pnl(trade, exit),
        fees: exit.fees,
        reason: exit.reason,
    }
}

/// Close `trade` at market and record it
///
/// If the venue reports the position already exited through its bracket,
/// that exit is what gets recorded.
pub async fn flatten_and_close(
    ledger: &SqliteLedger,
    broker: &dyn Broker,
    trade: &TradeRecord,
    reason: ExitReason,
) -> OcoResult<TradeRecord> {
    let mut exit = broker.flatten(trade).await?;
    if exit.reason == ExitReason::Flattened {
        exit.reason = reason;
    }
    let closed = ledger.mark_closed(&trade.id, close_update(trade, &exit))?;
    tracing::warn!(
        trade_id = %trade.id,
        symbol = %trade.symbol,
        "Position closed ({}) @ {}: pnl {:.2}",
        exit.reason,
        exit.exit_price,
        closed.realized_pnl.unwrap_or_default()
    );
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewTrade;
    use crate::types::{Side, Symbol, Venue};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn long_trade(stop_loss: f64) -> TradeRecord {
        let mut rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Oanda,
                symbol: Symbol::new("EUR_USD"),
                side: Side::Buy,
                size: 10_000.0,
                entry_price: 1.1000,
                stop_loss,
                take_profit: 1.1150,
                strategy: "fvg".into(),
                confidence: 0.9,
            },
            Utc::now(),
        );
        rec.fill_price = Some(1.1000);
        rec
    }

    #[test]
    fn test_trailing_stop_levels() {
        let trailing = TrailingConfig::default();
        let trade = long_trade(1.0950);

        // under half the risk in profit: stay put
        assert_eq!(trailing.stop_for(&trade, 1.1020), None);
        assert_eq!(trailing.stop_for(&trade, 1.0990), None);

        // half the profit locked in
        assert_relative_eq!(trailing.stop_for(&trade, 1.1040).unwrap(), 1.1020, epsilon = 1e-9);

        // never loosens
        let trailed = long_trade(1.1020);
        assert_eq!(trailing.stop_for(&trailed, 1.1030), None);
        assert_relative_eq!(trailing.stop_for(&trailed, 1.1080).unwrap(), 1.1040, epsilon = 1e-9);

        let off = TrailingConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(off.stop_for(&trade, 1.1100), None);
    }

    #[test]
    fn test_trailing_stop_short() {
        let mut rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Coinbase,
                symbol: Symbol::new("BTC-USD"),
                side: Side::Sell,
                size: 0.01,
                entry_price: 40_000.0,
                stop_loss: 41_000.0,
                take_profit: 37_000.0,
                strategy: "momentum".into(),
                confidence: 0.8,
            },
            Utc::now(),
        );
        rec.fill_price = Some(40_000.0);
        assert_relative_eq!(
            TrailingConfig::default().stop_for(&rec, 39_000.0).unwrap(),
            39_500.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_realized_pnl_prefers_venue() {
        let mut rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Coinbase,
                symbol: Symbol::new("BTC-USD"),
                side: Side::Buy,
                size: 0.01,
                entry_price: 40_000.0,
                stop_loss: 39_000.0,
                take_profit: 43_000.0,
                strategy: "momentum".into(),
                confidence: 0.8,
            },
            Utc::now(),
        );
        rec.fill_price = Some(40_000.0);
        rec.filled_size = Some(0.01);
        rec.fees = 2.0;

        let mut exit = ExitFill {
            exit_price: 43_000.0,
            realized_pnl: None,
            fees: 2.5,
            reason: ExitReason::TakeProfit,
        };
        // 30 from price, less 4.5 of fees
        assert_relative_eq!(realized_pnl(&rec, &exit), 25.5, epsilon = 1e-9);

        exit.realized_pnl = Some(27.0);
        assert_relative_eq!(close_update(&rec, &exit).realized_pnl, 27.0);
    }
}
