//! Execution venues
//!
//! Every venue implements [`Broker`]: one protocol for entering a position,
//! attaching its stop-loss/take-profit pair, watching it and flattening it.
//! The OCO executor and monitor only ever talk to this trait.

pub mod coinbase;
pub mod oanda;
pub mod paper;
pub mod router;

use async_trait::async_trait;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::BrokerResult;
use crate::ledger::{ExitReason, ProtectionIds, TradeRecord};
use crate::types::{Candle, Quote, Side, Symbol, Venue};

pub use coinbase::CoinbaseClient;
pub use oanda::OandaClient;
pub use paper::PaperBroker;
pub use router::Router;

/// Entry order plus the bracket it must end up protected by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketRequest {
    pub trade_id: String,
    /// Idempotency key, sent as the venue's client order id
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    /// Reference price the bracket was computed from
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
}

impl BracketRequest {
    pub fn from_record(record: &TradeRecord) -> Self {
        Self {
            trade_id: record.id.clone(),
            client_order_id: record.client_order_id.clone(),
            symbol: record.symbol.clone(),
            side: record.side,
            size: record.size,
            entry_price: record.entry_price,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            strategy: record.strategy.clone(),
        }
    }
}

/// Entry execution as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFill {
    pub fill_price: f64,
    pub filled_size: f64,
    pub venue_order_id: String,
    /// Venue position handle where the venue has one (OANDA trade id)
    pub venue_trade_id: Option<String>,
    pub fees: f64,
    /// Protection the venue attached atomically with the fill, if confirmed
    pub protection: Option<ProtectionIds>,
}

/// How a trade exited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitFill {
    pub exit_price: f64,
    /// Venue-reported P&L in account currency, when the venue reports one
    pub realized_pnl: Option<f64>,
    pub fees: f64,
    pub reason: ExitReason,
}

/// Venue view of an open trade
#[derive(Debug, Clone, PartialEq)]
pub enum TradeStatus {
    /// Position open with both protective legs live
    Protected(ProtectionIds),
    /// Position open but at least one leg is gone
    Unprotected { reason: String },
    Closed(ExitFill),
}

/// Venue view of an entry whose outcome was never recorded
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    Filled(EntryFill),
    /// Accepted and still working
    Working { order_id: String },
    /// Ended without a fill
    Unfilled { reason: String },
    /// No order under the trade's client order id
    NotFound,
}

/// Tick and lot sizes for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSpec {
    pub symbol: Symbol,
    pub size_increment: Decimal,
    pub min_size: Decimal,
    pub price_increment: Decimal,
    /// Forex pip size (0.0001, or 0.01 for JPY quotes)
    pub pip_size: Option<f64>,
}

impl InstrumentSpec {
    /// OANDA instruments: integer units, 3 decimals for JPY quotes, 5 otherwise
    pub fn forex(symbol: &Symbol) -> Self {
        let jpy = symbol.currencies().is_some_and(|(_, quote)| quote == "JPY");
        Self {
            symbol: symbol.clone(),
            size_increment: Decimal::ONE,
            min_size: Decimal::ONE,
            price_increment: if jpy { Decimal::new(1, 3) } else { Decimal::new(1, 5) },
            pip_size: Some(if jpy { 0.01 } else { 0.0001 }),
        }
    }

    /// Size rounded down to the lot increment; `None` below the minimum
    pub fn round_size(&self, size: f64) -> Option<Decimal> {
        let size = Decimal::from_f64(size)?;
        let rounded = floor_to(size, self.size_increment);
        (rounded >= self.min_size && rounded > Decimal::ZERO).then_some(rounded)
    }

    /// Price rounded to the nearest tick
    pub fn round_price(&self, price: f64) -> Option<Decimal> {
        let price = Decimal::from_f64(price)?;
        if self.price_increment <= Decimal::ZERO {
            return Some(price);
        }
        let ticks = (price / self.price_increment).round();
        Some(with_scale(ticks * self.price_increment, self.price_increment.scale()))
    }

    /// Price rounded to the tick on the side away from `reference`
    ///
    /// Used for stops so rounding never moves them closer to the entry.
    pub fn round_price_away(&self, price: f64, reference: f64) -> Option<Decimal> {
        let d = Decimal::from_f64(price)?;
        if self.price_increment <= Decimal::ZERO {
            return Some(d);
        }
        let ticks = d / self.price_increment;
        let ticks = if price < reference { ticks.floor() } else { ticks.ceil() };
        Some(with_scale(ticks * self.price_increment, self.price_increment.scale()))
    }

    pub fn round_size_f64(&self, size: f64) -> Option<f64> {
        self.round_size(size).and_then(|d| d.to_f64())
    }

    pub fn round_price_f64(&self, price: f64) -> Option<f64> {
        self.round_price(price).and_then(|d| d.to_f64())
    }
}

fn floor_to(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    with_scale((value / increment).floor() * increment, increment.scale())
}

fn with_scale(mut value: Decimal, scale: u32) -> Decimal {
    value.rescale(scale);
    value
}

/// A trading venue
#[async_trait]
pub trait Broker: Send + Sync {
    fn venue(&self) -> Venue;

    /// Whether sell-side entries (shorts) can be opened
    fn supports_short(&self) -> bool {
        true
    }

    async fn quote(&self, symbol: &Symbol) -> BrokerResult<Quote>;

    /// Most recent completed candles, oldest first
    async fn candles(&self, symbol: &Symbol, count: usize) -> BrokerResult<Vec<Candle>>;

    /// Account balance in account currency
    async fn account_balance(&self) -> BrokerResult<f64>;

    async fn instrument(&self, symbol: &Symbol) -> BrokerResult<InstrumentSpec>;

    /// Place the entry; returns once it is filled or definitively not
    async fn submit_entry(&self, request: &BracketRequest) -> BrokerResult<EntryFill>;

    /// Find the entry placed under `trade.client_order_id`
    async fn lookup_entry(&self, trade: &TradeRecord) -> BrokerResult<EntryStatus>;

    /// Create (or replace) the stop-loss/take-profit pair for a filled trade
    async fn attach_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds>;

    /// Move live protection to the levels now on `trade`
    ///
    /// The default suits venues whose `attach_protection` replaces in place.
    async fn replace_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds> {
        self.attach_protection(trade).await
    }

    async fn poll_trade(&self, trade: &TradeRecord) -> BrokerResult<TradeStatus>;

    /// Close the position at market, cancelling any protective orders first
    async fn flatten(&self, trade: &TradeRecord) -> BrokerResult<ExitFill>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> BrokerResult<()>;
}
