//! Paper trading venue
//!
//! Fills entries at the current quote, holds the bracket in memory and closes
//! it when the mark crosses the stop or the target. Prices come either from
//! an upstream venue (live data, simulated execution) or from marks and
//! candles set directly. Nothing here is random: P&L is always the price move
//! times the position size.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BrokerError, BrokerResult};
use crate::ledger::{ExitReason, ProtectionIds, TradeRecord};
use crate::types::{Candle, Quote, Side, Symbol, Venue};
use crate::venues::{BracketRequest, Broker, EntryFill, EntryStatus, ExitFill, InstrumentSpec, TradeStatus};

#[derive(Debug, Clone)]
struct PaperPosition {
    symbol: Symbol,
    side: Side,
    size: f64,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
    entry_fee: f64,
    order_id: String,
    bracket_id: Option<String>,
}

impl PaperPosition {
    fn from_record(trade: &TradeRecord) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            side: trade.side,
            size: trade.position_size(),
            entry: trade.entry(),
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            entry_fee: 0.0,
            order_id: trade.venue_order_id.clone().unwrap_or_default(),
            bracket_id: trade.protection.bracket_id.clone(),
        }
    }

    /// Bracket level hit at `price`, if any; the stop wins a tie
    fn triggered(&self, price: f64) -> Option<(f64, ExitReason)> {
        let (stop_hit, target_hit) = match self.side {
            Side::Buy => (price <= self.stop_loss, price >= self.take_profit),
            Side::Sell => (price >= self.stop_loss, price <= self.take_profit),
        };
        if stop_hit {
            Some((self.stop_loss, ExitReason::StopLoss))
        } else if target_hit {
            Some((self.take_profit, ExitReason::TakeProfit))
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    marks: HashMap<Symbol, f64>,
    candles: HashMap<Symbol, Vec<Candle>>,
    /// Keyed by ledger trade id
    positions: HashMap<String, PaperPosition>,
    balance: f64,
    next_id: u64,
}

impl PaperState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("paper-{}-{}", prefix, self.next_id)
    }
}

pub struct PaperBroker {
    feeds: HashMap<Venue, Arc<dyn Broker>>,
    routes: HashMap<Symbol, Venue>,
    account_currency: String,
    /// Full spread as a fraction of the mark
    spread: f64,
    /// Fee per side as a fraction of notional
    fee_rate: f64,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            feeds: HashMap::new(),
            routes: HashMap::new(),
            account_currency: "USD".to_string(),
            spread: 0.0,
            fee_rate: 0.0,
            state: Mutex::new(PaperState {
                balance: initial_balance,
                ..Default::default()
            }),
        }
    }

    /// Upstream venue supplying prices for symbols routed to it
    pub fn with_feed(mut self, venue: Venue, broker: Arc<dyn Broker>) -> Self {
        self.feeds.insert(venue, broker);
        self
    }

    pub fn route(mut self, symbol: Symbol, venue: Venue) -> Self {
        self.routes.insert(symbol, venue);
        self
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = spread.max(0.0);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate.max(0.0);
        self
    }

    pub fn with_account_currency(mut self, currency: impl Into<String>) -> Self {
        self.account_currency = currency.into();
        self
    }

    pub fn set_mark(&self, symbol: &Symbol, price: f64) {
        self.state().marks.insert(symbol.clone(), price);
    }

    /// Offline candle history; the last close becomes the mark
    pub fn set_candles(&self, symbol: &Symbol, candles: Vec<Candle>) {
        let mut state = self.state();
        if let Some(last) = candles.last() {
            state.marks.insert(symbol.clone(), last.close);
        }
        state.candles.insert(symbol.clone(), candles);
    }

    pub fn open_positions(&self) -> usize {
        self.state().positions.len()
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn feed(&self, symbol: &Symbol) -> Option<&Arc<dyn Broker>> {
        self.routes.get(symbol).and_then(|venue| self.feeds.get(venue))
    }

    fn quote_from_mark(&self, mark: f64) -> Quote {
        let half = mark * self.spread / 2.0;
        Quote::new(mark - half, mark + half)
    }

    /// Realized P&L in account currency, net of both fees
    fn settle(&self, position: &PaperPosition, exit_price: f64) -> (f64, f64) {
        let exit_fee = exit_price * position.size * self.fee_rate;
        let gross = (exit_price - position.entry) * position.size * position.side.sign();
        let factor = position
            .symbol
            .quote_conversion(exit_price, &self.account_currency)
            .unwrap_or_else(|| {
                tracing::warn!(symbol = %position.symbol, "No conversion to {}, using 1.0", self.account_currency);
                1.0
            });
        ((gross - exit_fee) * factor - position.entry_fee, exit_fee * factor)
    }

    fn close_position(&self, trade_id: &str, exit_price: f64, reason: ExitReason) -> Option<ExitFill> {
        let position = self.state().positions.remove(trade_id)?;
        let (pnl, fees) = self.settle(&position, exit_price);
        self.state().balance += pnl;
        tracing::info!(
            symbol = %position.symbol,
            trade_id,
            "Paper {} {} @ {:.5}: pnl {:.2}",
            reason,
            position.side,
            exit_price,
            pnl
        );
        Some(ExitFill {
            exit_price,
            realized_pnl: Some(pnl),
            fees,
            reason,
        })
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn venue(&self) -> Venue {
        Venue::Paper
    }

    async fn quote(&self, symbol: &Symbol) -> BrokerResult<Quote> {
        if let Some(feed) = self.feed(symbol) {
            let quote = feed.quote(symbol).await?;
            self.state().marks.insert(symbol.clone(), quote.mid());
            return Ok(quote);
        }
        let mark = self.state().marks.get(symbol).copied();
        mark.map(|m| self.quote_from_mark(m))
            .ok_or_else(|| BrokerError::Rejected(format!("no paper price for {}", symbol)))
    }

    async fn candles(&self, symbol: &Symbol, count: usize) -> BrokerResult<Vec<Candle>> {
        if let Some(feed) = self.feed(symbol) {
            return feed.candles(symbol, count).await;
        }
        let state = self.state();
        let candles = state.candles.get(symbol).map(Vec::as_slice).unwrap_or_default();
        Ok(candles[candles.len().saturating_sub(count)..].to_vec())
    }

    async fn account_balance(&self) -> BrokerResult<f64> {
        Ok(self.state().balance)
    }

    async fn instrument(&self, symbol: &Symbol) -> BrokerResult<InstrumentSpec> {
        if let Some(feed) = self.feed(symbol) {
            return feed.instrument(symbol).await;
        }
        if symbol.as_str().contains('_') {
            Ok(InstrumentSpec::forex(symbol))
        } else {
            Ok(InstrumentSpec {
                symbol: symbol.clone(),
                size_increment: rust_decimal::Decimal::new(1, 8),
                min_size: rust_decimal::Decimal::new(1, 8),
                price_increment: rust_decimal::Decimal::new(1, 2),
                pip_size: None,
            })
        }
    }

    async fn submit_entry(&self, request: &BracketRequest) -> BrokerResult<EntryFill> {
        if request.side == Side::Sell && self.feed(&request.symbol).is_some_and(|f| !f.supports_short()) {
            return Err(BrokerError::Unsupported(format!(
                "short entry on {}: upstream venue is long-only",
                request.symbol
            )));
        }
        let spec = self.instrument(&request.symbol).await?;
        let size = spec.round_size_f64(request.size).ok_or_else(|| {
            BrokerError::Rejected(format!("size {} below minimum for {}", request.size, request.symbol))
        })?;
        let fill_price = self.quote(&request.symbol).await?.entry_price(request.side);
        let entry_fee = fill_price * size * self.fee_rate;

        let mut state = self.state();
        let order_id = state.next_id("order");
        state.positions.insert(
            request.trade_id.clone(),
            PaperPosition {
                symbol: request.symbol.clone(),
                side: request.side,
                size,
                entry: fill_price,
                stop_loss: request.stop_loss,
                take_profit: request.take_profit,
                entry_fee,
                order_id: order_id.clone(),
                bracket_id: None,
            },
        );
        tracing::info!(symbol = %request.symbol, order_id = %order_id, "Paper fill {} {} @ {:.5}", request.side, size, fill_price);

        Ok(EntryFill {
            fill_price,
            filled_size: size,
            venue_order_id: order_id.clone(),
            venue_trade_id: Some(order_id),
            fees: entry_fee,
            protection: None,
        })
    }

    async fn lookup_entry(&self, trade: &TradeRecord) -> BrokerResult<EntryStatus> {
        let state = self.state();
        let Some(position) = state.positions.get(&trade.id) else {
            return Ok(EntryStatus::NotFound);
        };
        Ok(EntryStatus::Filled(EntryFill {
            fill_price: position.entry,
            filled_size: position.size,
            venue_order_id: position.order_id.clone(),
            venue_trade_id: Some(position.order_id.clone()),
            fees: position.entry_fee,
            protection: position.bracket_id.clone().map(ProtectionIds::bracket),
        }))
    }

    async fn attach_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds> {
        let mut state = self.state();
        let bracket_id = state.next_id("bracket");
        let position = state
            .positions
            .entry(trade.id.clone())
            .or_insert_with(|| PaperPosition::from_record(trade));
        position.stop_loss = trade.stop_loss;
        position.take_profit = trade.take_profit;
        position.bracket_id = Some(bracket_id.clone());
        Ok(ProtectionIds::bracket(bracket_id))
    }

    async fn poll_trade(&self, trade: &TradeRecord) -> BrokerResult<TradeStatus> {
        let price = self.quote(&trade.symbol).await?.exit_price(trade.side);

        // positions from before a restart are adopted from the ledger
        let position = self
            .state()
            .positions
            .entry(trade.id.clone())
            .or_insert_with(|| PaperPosition::from_record(trade))
            .clone();

        if let Some((level, reason)) = position.triggered(price) {
            if position.bracket_id.is_some() {
                if let Some(exit) = self.close_position(&trade.id, level, reason) {
                    return Ok(TradeStatus::Closed(exit));
                }
            }
        }
        Ok(match position.bracket_id {
            Some(id) => TradeStatus::Protected(ProtectionIds::bracket(id)),
            None => TradeStatus::Unprotected {
                reason: "no paper bracket".to_string(),
            },
        })
    }

    async fn flatten(&self, trade: &TradeRecord) -> BrokerResult<ExitFill> {
        let price = self.quote(&trade.symbol).await?.exit_price(trade.side);
        self.state()
            .positions
            .entry(trade.id.clone())
            .or_insert_with(|| PaperPosition::from_record(trade));
        self.close_position(&trade.id, price, ExitReason::Flattened)
            .ok_or_else(|| BrokerError::Rejected(format!("no paper position for {}", trade.id)))
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> BrokerResult<()> {
        let mut state = self.state();
        for position in state.positions.values_mut() {
            if position.bracket_id.as_deref() == Some(order_id) {
                position.bracket_id = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewTrade;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn request(side: Side, sl: f64, tp: f64) -> (TradeRecord, BracketRequest) {
        let rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Paper,
                symbol: Symbol::new("EUR_USD"),
                side,
                size: 10_000.0,
                entry_price: 1.1000,
                stop_loss: sl,
                take_profit: tp,
                strategy: "fvg".into(),
                confidence: 0.9,
            },
            Utc::now(),
        );
        let req = BracketRequest::from_record(&rec);
        (rec, req)
    }

    #[tokio::test]
    async fn test_take_profit_closes_with_price_pnl() {
        let broker = PaperBroker::new(3000.0);
        let eur = Symbol::new("EUR_USD");
        broker.set_mark(&eur, 1.1000);

        let (mut rec, req) = request(Side::Buy, 1.0950, 1.1150);
        let fill = broker.submit_entry(&req).await.unwrap();
        assert_relative_eq!(fill.fill_price, 1.1000);
        rec.fill_price = Some(fill.fill_price);
        rec.filled_size = Some(fill.filled_size);

        let ids = broker.attach_protection(&rec).await.unwrap();
        rec.protection = ids.clone();
        assert_eq!(broker.poll_trade(&rec).await.unwrap(), TradeStatus::Protected(ids));

        broker.set_mark(&eur, 1.1160);
        match broker.poll_trade(&rec).await.unwrap() {
            TradeStatus::Closed(exit) => {
                assert_eq!(exit.reason, ExitReason::TakeProfit);
                assert_relative_eq!(exit.exit_price, 1.1150);
                assert_relative_eq!(exit.realized_pnl.unwrap(), 150.0, epsilon = 1e-6);
            }
            other => panic!("expected close, got {:?}", other),
        }
        assert_relative_eq!(broker.account_balance().await.unwrap(), 3150.0, epsilon = 1e-6);
        assert_eq!(broker.open_positions(), 0);
    }

    #[tokio::test]
    async fn test_short_stop_loss() {
        let broker = PaperBroker::new(3000.0);
        let eur = Symbol::new("EUR_USD");
        broker.set_mark(&eur, 1.1000);

        let (mut rec, req) = request(Side::Sell, 1.1050, 1.0850);
        broker.submit_entry(&req).await.unwrap();
        rec.fill_price = Some(1.1000);
        rec.protection = broker.attach_protection(&rec).await.unwrap();

        broker.set_mark(&eur, 1.1060);
        match broker.poll_trade(&rec).await.unwrap() {
            TradeStatus::Closed(exit) => {
                assert_eq!(exit.reason, ExitReason::StopLoss);
                assert_relative_eq!(exit.realized_pnl.unwrap(), -50.0, epsilon = 1e-6);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_bracket_is_unprotected_and_flattens() {
        let broker = PaperBroker::new(3000.0).with_spread(0.0002);
        let eur = Symbol::new("EUR_USD");
        broker.set_mark(&eur, 1.1000);

        let (mut rec, req) = request(Side::Buy, 1.0950, 1.1150);
        let fill = broker.submit_entry(&req).await.unwrap();
        // buys pay the ask
        assert!(fill.fill_price > 1.1000);
        rec.fill_price = Some(fill.fill_price);
        rec.protection = broker.attach_protection(&rec).await.unwrap();

        let bracket = rec.protection.bracket_id.clone().unwrap();
        broker.cancel_order(&eur, &bracket).await.unwrap();
        assert!(matches!(
            broker.poll_trade(&rec).await.unwrap(),
            TradeStatus::Unprotected { .. }
        ));

        let exit = broker.flatten(&rec).await.unwrap();
        assert_eq!(exit.reason, ExitReason::Flattened);
        // paid the spread both ways
        assert!(exit.realized_pnl.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn test_lookup_entry_by_trade() {
        let broker = PaperBroker::new(3000.0);
        broker.set_mark(&Symbol::new("EUR_USD"), 1.1000);

        let (rec, req) = request(Side::Buy, 1.0950, 1.1150);
        assert_eq!(broker.lookup_entry(&rec).await.unwrap(), EntryStatus::NotFound);

        let fill = broker.submit_entry(&req).await.unwrap();
        match broker.lookup_entry(&rec).await.unwrap() {
            EntryStatus::Filled(found) => assert_eq!(found, fill),
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_candles_set_mark() {
        let broker = PaperBroker::new(1000.0);
        let btc = Symbol::new("BTC-USD");
        let candles: Vec<Candle> = (0..5)
            .map(|i| {
                let p = 100.0 + i as f64;
                Candle::new_unchecked(Utc::now(), p, p + 1.0, p - 1.0, p, 10.0)
            })
            .collect();
        broker.set_candles(&btc, candles);

        assert_eq!(broker.candles(&btc, 3).await.unwrap().len(), 3);
        assert_relative_eq!(broker.quote(&btc).await.unwrap().mid(), 104.0);
        assert!(broker.quote(&Symbol::new("ETH-USD")).await.is_err());
    }
}
