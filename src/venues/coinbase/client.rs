//! Coinbase Advanced Trade client (spot crypto)
//!
//! Entries are market IOC orders. Protection is one native
//! `trigger_bracket_gtc` sell order holding both the take-profit limit and
//! the stop trigger, so a single order id covers the OCO pair and Coinbase
//! itself guarantees only one leg can execute.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::types::*;
use crate::auth::CoinbaseAuth;
use crate::common::{ClientConfig, Resilience};
use crate::error::{BrokerError, BrokerResult};
use crate::ledger::{ExitReason, ProtectionIds, TradeRecord};
use crate::types::{Candle, Quote, Side, Symbol, Venue};
use crate::venues::{BracketRequest, Broker, EntryFill, EntryStatus, ExitFill, InstrumentSpec, TradeStatus};

pub const API_BASE_URL: &str = "https://api.coinbase.com";

const BROKERAGE: &str = "/api/v3/brokerage";
const CANDLE_SECONDS: i64 = 15 * 60;
const MAX_CANDLES: usize = 300;

#[derive(Clone)]
pub struct CoinbaseClient {
    auth: CoinbaseAuth,
    base_url: String,
    account_currency: String,
    http_client: Client,
    resilience: Resilience,
    products: Arc<RwLock<HashMap<Symbol, InstrumentSpec>>>,
    fill_poll_interval: Duration,
    fill_poll_attempts: u32,
}

impl CoinbaseClient {
    pub fn new(auth: CoinbaseAuth, config: ClientConfig) -> BrokerResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            auth,
            base_url: API_BASE_URL.to_string(),
            account_currency: "USD".to_string(),
            http_client,
            resilience: Resilience::new(Venue::Coinbase, &config),
            products: Arc::new(RwLock::new(HashMap::new())),
            fill_poll_interval: Duration::from_millis(500),
            fill_poll_attempts: 20,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_account_currency(mut self, currency: impl Into<String>) -> Self {
        self.account_currency = currency.into();
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> BrokerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http_client.request(method.clone(), &url);

        req = match &self.auth {
            CoinbaseAuth::Jwt(signer) => req.header(
                "Authorization",
                format!("Bearer {}", signer.token(method.as_str(), path)),
            ),
            CoinbaseAuth::Hmac(signer) => {
                let path_only = path.split('?').next().unwrap_or(path);
                let signed = signer.sign_request(method.as_str(), path_only, body.unwrap_or(""));
                req.header("CB-ACCESS-KEY", signed.access_key)
                    .header("CB-ACCESS-SIGN", signed.signature)
                    .header("CB-ACCESS-TIMESTAMP", signed.timestamp)
            }
        };
        if let Some(body) = body {
            req = req
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| {
            BrokerError::Parse(format!("{}: {} (body: {})", path, e, truncate(&text)))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> BrokerResult<T> {
        self.resilience
            .execute_with_retry(|| self.request(Method::GET, path, None))
            .await
    }

    async fn get_order(&self, order_id: &str) -> BrokerResult<Order> {
        let resp: GetOrderResponse = self
            .get(&format!("{}/orders/historical/{}", BROKERAGE, order_id))
            .await?;
        Ok(resp.order)
    }

    /// Submit an order once; returns the venue order id
    async fn create_order(&self, order: &CreateOrderRequest) -> BrokerResult<String> {
        let body = serde_json::to_string(order)?;
        let path = format!("{}/orders", BROKERAGE);
        let resp: CreateOrderResponse = self
            .resilience
            .execute_once(|| self.request(Method::POST, &path, Some(&body)))
            .await?;
        interpret_create(&resp)
    }

    /// Poll until the order is terminal or the attempts run out
    async fn wait_for_terminal(&self, order_id: &str) -> BrokerResult<Order> {
        let mut order = self.get_order(order_id).await?;
        for _ in 0..self.fill_poll_attempts {
            if order.is_terminal() {
                break;
            }
            tokio::time::sleep(self.fill_poll_interval).await;
            order = self.get_order(order_id).await?;
        }
        Ok(order)
    }

    async fn market_order(&self, symbol: &Symbol, side: Side, base_size: Decimal) -> BrokerResult<Order> {
        let order = CreateOrderRequest {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            product_id: symbol.to_string(),
            side: wire_side(side),
            order_configuration: OrderConfiguration::MarketMarketIoc { base_size },
        };
        let order_id = self.create_order(&order).await?;
        self.wait_for_terminal(&order_id).await
    }
}

#[async_trait]
impl Broker for CoinbaseClient {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn supports_short(&self) -> bool {
        false
    }

    async fn quote(&self, symbol: &Symbol) -> BrokerResult<Quote> {
        let resp: BestBidAskResponse = self
            .get(&format!("{}/best_bid_ask?product_ids={}", BROKERAGE, symbol))
            .await?;
        resp.pricebooks
            .iter()
            .find(|b| b.product_id == symbol.as_str())
            .and_then(quote_from_book)
            .ok_or_else(|| BrokerError::Parse(format!("no book for {}", symbol)))
    }

    async fn candles(&self, symbol: &Symbol, count: usize) -> BrokerResult<Vec<Candle>> {
        let count = count.min(MAX_CANDLES);
        let now = Utc::now().timestamp();
        let start = now - (count as i64 + 1) * CANDLE_SECONDS;
        let path = format!(
            "{}/products/{}/candles?start={}&end={}&granularity=FIFTEEN_MINUTE",
            BROKERAGE, symbol, start, now
        );
        let resp: CandlesResponse = self.get(&path).await?;
        let mut candles = candles_from_response(&resp, now)?;
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        Ok(candles)
    }

    async fn account_balance(&self) -> BrokerResult<f64> {
        let resp: AccountsResponse = self
            .get(&format!("{}/accounts?limit=250", BROKERAGE))
            .await?;
        let account = resp
            .accounts
            .iter()
            .find(|a| a.currency == self.account_currency)
            .ok_or_else(|| {
                BrokerError::Parse(format!("no {} account", self.account_currency))
            })?;
        to_f64(account.available_balance.value)
    }

    async fn instrument(&self, symbol: &Symbol) -> BrokerResult<InstrumentSpec> {
        if let Some(spec) = self.products.read().await.get(symbol) {
            return Ok(spec.clone());
        }
        let product: Product = self
            .get(&format!("{}/products/{}", BROKERAGE, symbol))
            .await?;
        let spec = spec_from_product(symbol, &product);
        self.products.write().await.insert(symbol.clone(), spec.clone());
        Ok(spec)
    }

    async fn submit_entry(&self, request: &BracketRequest) -> BrokerResult<EntryFill> {
        if request.side == Side::Sell {
            return Err(BrokerError::Unsupported(format!(
                "short entry on {}: Coinbase spot cannot sell what it does not hold",
                request.symbol
            )));
        }
        let spec = self.instrument(&request.symbol).await?;
        let order = build_entry(request, &spec)?;
        let order_id = self.create_order(&order).await?;
        let order = self.wait_for_terminal(&order_id).await.map_err(|e| {
            tracing::error!(
                order_id = %order_id,
                client_order_id = %request.client_order_id,
                "Entry accepted but its fill could not be read: {}",
                e
            );
            e
        })?;
        let fill = fill_from_order(&order)?;

        tracing::info!(
            symbol = %request.symbol,
            order_id = %fill.venue_order_id,
            "Coinbase fill {} {} @ {}",
            request.side,
            fill.filled_size,
            fill.fill_price
        );
        Ok(fill)
    }

    async fn lookup_entry(&self, trade: &TradeRecord) -> BrokerResult<EntryStatus> {
        if let Some(order_id) = trade.venue_order_id.as_deref() {
            let order = self.get_order(order_id).await?;
            return entry_status(Some(&order));
        }
        let resp: ListOrdersResponse = self
            .get(&format!(
                "{}/orders/historical/batch?product_ids={}&limit=100",
                BROKERAGE, trade.symbol
            ))
            .await?;
        entry_status(find_entry(&resp.orders, &trade.client_order_id))
    }

    async fn attach_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds> {
        let spec = self.instrument(&trade.symbol).await?;
        let order = build_bracket(trade, &spec)?;
        let order_id = self.create_order(&order).await?;
        tracing::info!(
            symbol = %trade.symbol,
            order_id = %order_id,
            "Coinbase bracket placed: tp={} sl={}",
            trade.take_profit,
            trade.stop_loss
        );
        Ok(ProtectionIds::bracket(order_id))
    }

    /// Cancel the live bracket, then place one at the new levels
    ///
    /// A second bracket next to the first would find the base currency on
    /// hold, so the old one has to be gone before the new one goes in.
    async fn replace_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds> {
        if let Some(bracket_id) = trade.protection.bracket_id.as_deref() {
            self.cancel_order(&trade.symbol, bracket_id).await?;
            let old = self.get_order(bracket_id).await?;
            if old.filled() > Decimal::ZERO || old.is_working() {
                return Err(BrokerError::Rejected(format!(
                    "bracket {} is {}; not replacing it",
                    bracket_id, old.status
                )));
            }
        }
        self.attach_protection(trade).await
    }

    async fn poll_trade(&self, trade: &TradeRecord) -> BrokerResult<TradeStatus> {
        let Some(bracket_id) = trade.protection.bracket_id.as_deref() else {
            return Ok(TradeStatus::Unprotected {
                reason: "no bracket order recorded".to_string(),
            });
        };
        let order = self.get_order(bracket_id).await?;
        interpret_bracket(trade, &order)
    }

    async fn flatten(&self, trade: &TradeRecord) -> BrokerResult<ExitFill> {
        if let Some(bracket_id) = trade.protection.bracket_id.as_deref() {
            if let Err(e) = self.cancel_order(&trade.symbol, bracket_id).await {
                tracing::warn!(order_id = %bracket_id, "Bracket cancel failed: {}", e);
            }
            // the bracket may have executed before the cancel landed
            let bracket = self.get_order(bracket_id).await?;
            if let TradeStatus::Closed(exit) = interpret_bracket(trade, &bracket)? {
                return Ok(exit);
            }
            if bracket.is_working() {
                return Err(BrokerError::Rejected(format!(
                    "bracket {} still {}; not selling on top of it",
                    bracket_id, bracket.status
                )));
            }
        }

        let spec = self.instrument(&trade.symbol).await?;
        let size = spec.round_size(trade.position_size()).ok_or_else(|| {
            BrokerError::Rejected(format!(
                "position {} below minimum size for {}",
                trade.position_size(),
                trade.symbol
            ))
        })?;
        let order = self.market_order(&trade.symbol, trade.side.opposite(), size).await?;
        if order.filled() <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!(
                "flatten order {} ended {} without fills",
                order.order_id, order.status
            )));
        }
        let price = order
            .average_filled_price
            .ok_or_else(|| BrokerError::Parse("filled order without price".to_string()))?;
        Ok(ExitFill {
            exit_price: to_f64(price)?,
            realized_pnl: None,
            fees: to_f64(order.total_fees.unwrap_or_default())?,
            reason: ExitReason::Flattened,
        })
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> BrokerResult<()> {
        let body = serde_json::to_string(&CancelOrdersRequest {
            order_ids: vec![order_id.to_string()],
        })?;
        let path = format!("{}/orders/batch_cancel", BROKERAGE);
        let resp: CancelOrdersResponse = self
            .resilience
            .execute_with_retry(|| self.request(Method::POST, &path, Some(&body)))
            .await?;
        match resp.results.iter().find(|r| r.order_id == order_id) {
            Some(r) if r.success => Ok(()),
            Some(r) => Err(BrokerError::Rejected(format!(
                "cancel {}: {}",
                order_id,
                r.failure_reason.as_deref().unwrap_or("unknown")
            ))),
            None => Err(BrokerError::Parse(format!("no cancel result for {}", order_id))),
        }
    }
}

// ==================== WIRE SHAPING ====================

fn wire_side(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

pub(crate) fn build_entry(request: &BracketRequest, spec: &InstrumentSpec) -> BrokerResult<CreateOrderRequest> {
    let base_size = spec.round_size(request.size).ok_or_else(|| {
        BrokerError::Rejected(format!(
            "size {} below minimum for {}",
            request.size, request.symbol
        ))
    })?;
    Ok(CreateOrderRequest {
        client_order_id: request.client_order_id.clone(),
        product_id: request.symbol.to_string(),
        side: wire_side(request.side),
        order_configuration: OrderConfiguration::MarketMarketIoc { base_size },
    })
}

pub(crate) fn build_bracket(trade: &TradeRecord, spec: &InstrumentSpec) -> BrokerResult<CreateOrderRequest> {
    let base_size = spec.round_size(trade.position_size()).ok_or_else(|| {
        BrokerError::Rejected(format!(
            "position {} below minimum for {}",
            trade.position_size(),
            trade.symbol
        ))
    })?;
    let stop = spec.round_price_away(trade.stop_loss, trade.entry());
    let limit = spec.round_price(trade.take_profit);
    let (Some(stop_trigger_price), Some(limit_price)) = (stop, limit) else {
        return Err(BrokerError::Rejected(format!(
            "bracket prices not representable: sl={} tp={}",
            trade.stop_loss, trade.take_profit
        )));
    };
    Ok(CreateOrderRequest {
        client_order_id: uuid::Uuid::new_v4().to_string(),
        product_id: trade.symbol.to_string(),
        side: wire_side(trade.side.opposite()),
        order_configuration: OrderConfiguration::TriggerBracketGtc {
            base_size,
            limit_price,
            stop_trigger_price,
        },
    })
}

pub(crate) fn interpret_create(resp: &CreateOrderResponse) -> BrokerResult<String> {
    if resp.success {
        if let Some(ok) = &resp.success_response {
            return Ok(ok.order_id.clone());
        }
    }
    let reason = resp
        .error_response
        .as_ref()
        .map(ErrorResponse::describe)
        .filter(|s| !s.is_empty())
        .or_else(|| resp.failure_reason.clone())
        .unwrap_or_else(|| "order not accepted".to_string());
    Err(BrokerError::Rejected(reason))
}

pub(crate) fn fill_from_order(order: &Order) -> BrokerResult<EntryFill> {
    let filled = order.filled();
    if filled <= Decimal::ZERO {
        return Err(BrokerError::Rejected(format!(
            "entry {} ended {} without fills",
            order.order_id, order.status
        )));
    }
    let price = order
        .average_filled_price
        .ok_or_else(|| BrokerError::Parse("filled order without price".to_string()))?;
    Ok(EntryFill {
        fill_price: to_f64(price)?,
        filled_size: to_f64(filled)?,
        venue_order_id: order.order_id.clone(),
        venue_trade_id: None,
        fees: to_f64(order.total_fees.unwrap_or_default())?,
        protection: None,
    })
}

pub(crate) fn find_entry<'a>(orders: &'a [Order], client_order_id: &str) -> Option<&'a Order> {
    orders
        .iter()
        .find(|o| o.client_order_id.as_deref() == Some(client_order_id))
}

/// Entry status from the order found for a trade's client order id
pub(crate) fn entry_status(order: Option<&Order>) -> BrokerResult<EntryStatus> {
    let Some(order) = order else {
        return Ok(EntryStatus::NotFound);
    };
    if order.is_working() {
        return Ok(EntryStatus::Working {
            order_id: order.order_id.clone(),
        });
    }
    if order.filled() > Decimal::ZERO {
        return fill_from_order(order).map(EntryStatus::Filled);
    }
    Ok(EntryStatus::Unfilled {
        reason: format!("entry {} ended {} without fills", order.order_id, order.status),
    })
}

pub(crate) fn interpret_bracket(trade: &TradeRecord, order: &Order) -> BrokerResult<TradeStatus> {
    match order.status.as_str() {
        "FILLED" => {
            let price = order
                .average_filled_price
                .ok_or_else(|| BrokerError::Parse("filled bracket without price".to_string()))?;
            let exit_price = to_f64(price)?;
            let reason = if (exit_price - trade.take_profit).abs() <= (exit_price - trade.stop_loss).abs() {
                ExitReason::TakeProfit
            } else {
                ExitReason::StopLoss
            };
            Ok(TradeStatus::Closed(ExitFill {
                exit_price,
                realized_pnl: None,
                fees: to_f64(order.total_fees.unwrap_or_default())?,
                reason,
            }))
        }
        _ if order.is_working() => Ok(TradeStatus::Protected(ProtectionIds::bracket(
            order.order_id.clone(),
        ))),
        status => Ok(TradeStatus::Unprotected {
            reason: format!("bracket {} is {}", order.order_id, status),
        }),
    }
}

pub(crate) fn spec_from_product(symbol: &Symbol, product: &Product) -> InstrumentSpec {
    InstrumentSpec {
        symbol: symbol.clone(),
        size_increment: product.base_increment.normalize(),
        min_size: product
            .base_min_size
            .unwrap_or(product.base_increment)
            .normalize(),
        price_increment: product.quote_increment.normalize(),
        pip_size: None,
    }
}

pub(crate) fn quote_from_book(book: &PriceBook) -> Option<Quote> {
    let bid = book.bids.first()?.price.to_f64()?;
    let ask = book.asks.first()?.price.to_f64()?;
    Some(Quote::new(bid, ask))
}

/// Completed candles, oldest first
pub(crate) fn candles_from_response(resp: &CandlesResponse, now: i64) -> BrokerResult<Vec<Candle>> {
    let mut candles = resp
        .candles
        .iter()
        .map(|row| {
            let start: i64 = row
                .start
                .parse()
                .map_err(|_| BrokerError::Parse(format!("candle start '{}'", row.start)))?;
            Ok((start, row))
        })
        .collect::<BrokerResult<Vec<_>>>()?;
    candles.retain(|(start, _)| start + CANDLE_SECONDS <= now);
    candles.sort_by_key(|(start, _)| *start);

    candles
        .into_iter()
        .map(|(start, row)| {
            let datetime = DateTime::<Utc>::from_timestamp(start, 0)
                .ok_or_else(|| BrokerError::Parse(format!("candle start {}", start)))?;
            Ok(Candle::new_unchecked(
                datetime,
                to_f64(row.open)?,
                to_f64(row.high)?,
                to_f64(row.low)?,
                to_f64(row.close)?,
                to_f64(row.volume)?,
            ))
        })
        .collect()
}

fn classify_error(status: u16, body: &str) -> BrokerError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.describe())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| truncate(body));
    BrokerError::api(Venue::Coinbase, status, message)
}

fn to_f64(d: Decimal) -> BrokerResult<f64> {
    d.to_f64()
        .ok_or_else(|| BrokerError::Parse(format!("decimal {} out of f64 range", d)))
}

fn truncate(s: &str) -> String {
    s.chars().take(300).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewTrade;
    use rust_decimal_macros::dec;

    fn btc_spec() -> InstrumentSpec {
        let product: Product = serde_json::from_str(
            r#"{"product_id": "BTC-USD", "price": "43000.12",
                "base_increment": "0.00000001", "quote_increment": "0.01",
                "base_min_size": "0.00001"}"#,
        )
        .unwrap();
        spec_from_product(&Symbol::new("BTC-USD"), &product)
    }

    fn filled_trade() -> TradeRecord {
        let mut rec = TradeRecord::from_new(
            NewTrade {
                venue: Venue::Coinbase,
                symbol: Symbol::new("BTC-USD"),
                side: Side::Buy,
                size: 0.0123456789,
                entry_price: 43000.0,
                stop_loss: 42140.004,
                take_profit: 46440.006,
                strategy: "momentum".into(),
                confidence: 0.8,
            },
            Utc::now(),
        );
        rec.fill_price = Some(43000.0);
        rec.filled_size = Some(0.0123456789);
        rec
    }

    fn order(status: &str, filled: &str, price: Option<&str>) -> Order {
        let price = price.map(|p| format!(r#""{}""#, p)).unwrap_or_else(|| "null".into());
        serde_json::from_str(&format!(
            r#"{{"order_id": "o-1", "product_id": "BTC-USD", "side": "SELL",
                "status": "{status}", "filled_size": "{filled}",
                "average_filled_price": {price}, "total_fees": "1.25"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_entry_body_shape() {
        let req = BracketRequest::from_record(&filled_trade());
        let body = serde_json::to_value(build_entry(&req, &btc_spec()).unwrap()).unwrap();

        assert_eq!(body["client_order_id"], req.client_order_id.as_str());
        assert_eq!(body["product_id"], "BTC-USD");
        assert_eq!(body["side"], "BUY");
        assert_eq!(
            body["order_configuration"]["market_market_ioc"]["base_size"],
            "0.01234567"
        );
    }

    #[test]
    fn test_bracket_body_shape() {
        let body = serde_json::to_value(build_bracket(&filled_trade(), &btc_spec()).unwrap()).unwrap();
        let cfg = &body["order_configuration"]["trigger_bracket_gtc"];

        assert_eq!(body["side"], "SELL");
        assert_eq!(cfg["base_size"], "0.01234567");
        assert_eq!(cfg["limit_price"], "46440.01");
        // stop rounded away from the entry
        assert_eq!(cfg["stop_trigger_price"], "42140.00");
    }

    #[test]
    fn test_spec_from_product() {
        let spec = btc_spec();
        assert_eq!(spec.size_increment, dec!(0.00000001));
        assert_eq!(spec.min_size, dec!(0.00001));
        assert_eq!(spec.price_increment, dec!(0.01));
        assert!(spec.pip_size.is_none());
    }

    #[test]
    fn test_create_response() {
        let ok: CreateOrderResponse = serde_json::from_str(
            r#"{"success": true, "success_response": {"order_id": "abc", "product_id": "BTC-USD", "side": "BUY", "client_order_id": "c"}}"#,
        )
        .unwrap();
        assert_eq!(interpret_create(&ok).unwrap(), "abc");

        let bad: CreateOrderResponse = serde_json::from_str(
            r#"{"success": false, "failure_reason": "UNKNOWN_FAILURE_REASON",
                "error_response": {"error": "INSUFFICIENT_FUND", "message": "Insufficient balance in source account"}}"#,
        )
        .unwrap();
        match interpret_create(&bad) {
            Err(BrokerError::Rejected(r)) => assert!(r.starts_with("INSUFFICIENT_FUND")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_fill_from_order() {
        let fill = fill_from_order(&order("FILLED", "0.01234567", Some("43010.5"))).unwrap();
        assert_eq!(fill.venue_order_id, "o-1");
        assert!((fill.fill_price - 43010.5).abs() < 1e-9);
        assert!((fill.fees - 1.25).abs() < 1e-12);

        // IOC that found no liquidity
        assert!(matches!(
            fill_from_order(&order("CANCELLED", "0", None)),
            Err(BrokerError::Rejected(_))
        ));
    }

    #[test]
    fn test_entry_status_after_lost_response() {
        assert_eq!(entry_status(None).unwrap(), EntryStatus::NotFound);

        match entry_status(Some(&order("FILLED", "0.01234567", Some("43010.5")))).unwrap() {
            EntryStatus::Filled(fill) => {
                assert_eq!(fill.venue_order_id, "o-1");
                assert!((fill.fill_price - 43010.5).abs() < 1e-9);
            }
            other => panic!("expected fill, got {:?}", other),
        }
        assert_eq!(
            entry_status(Some(&order("OPEN", "0", None))).unwrap(),
            EntryStatus::Working { order_id: "o-1".into() }
        );
        assert!(matches!(
            entry_status(Some(&order("CANCELLED", "0", None))).unwrap(),
            EntryStatus::Unfilled { .. }
        ));

        // an IOC cancelled after a partial fill still opened a position
        assert!(matches!(
            entry_status(Some(&order("CANCELLED", "0.005", Some("43000")))).unwrap(),
            EntryStatus::Filled(_)
        ));
    }

    #[test]
    fn test_list_orders_matched_by_client_order_id() {
        let resp: ListOrdersResponse = serde_json::from_str(
            r#"{"orders": [
                {"order_id": "a", "product_id": "BTC-USD", "side": "BUY", "client_order_id": "other",
                 "status": "FILLED", "filled_size": "1", "average_filled_price": "1"},
                {"order_id": "b", "product_id": "BTC-USD", "side": "BUY", "client_order_id": "coid-7",
                 "status": "FILLED", "filled_size": "0.01", "average_filled_price": "43000"}
            ], "has_next": false}"#,
        )
        .unwrap();
        let found = find_entry(&resp.orders, "coid-7");
        assert_eq!(found.map(|o| o.order_id.as_str()), Some("b"));
        assert!(find_entry(&resp.orders, "coid-8").is_none());
    }

    #[test]
    fn test_bracket_status() {
        let trade = filled_trade();

        let open = interpret_bracket(&trade, &order("OPEN", "0", None)).unwrap();
        assert_eq!(open, TradeStatus::Protected(ProtectionIds::bracket("o-1")));

        match interpret_bracket(&trade, &order("FILLED", "0.01234567", Some("46440.01"))).unwrap() {
            TradeStatus::Closed(exit) => {
                assert_eq!(exit.reason, ExitReason::TakeProfit);
                assert!(exit.realized_pnl.is_none());
            }
            other => panic!("expected closed, got {:?}", other),
        }

        match interpret_bracket(&trade, &order("FILLED", "0.01234567", Some("42100"))).unwrap() {
            TradeStatus::Closed(exit) => assert_eq!(exit.reason, ExitReason::StopLoss),
            other => panic!("expected closed, got {:?}", other),
        }

        assert!(matches!(
            interpret_bracket(&trade, &order("CANCELLED", "0", None)).unwrap(),
            TradeStatus::Unprotected { .. }
        ));
    }

    #[test]
    fn test_candles_sorted_and_incomplete_dropped() {
        let now = 1_700_003_000;
        let resp: CandlesResponse = serde_json::from_str(
            r#"{"candles": [
                {"start": "1700002800", "low": "1", "high": "2", "open": "1.5", "close": "1.6", "volume": "10"},
                {"start": "1700001900", "low": "1", "high": "2", "open": "1.4", "close": "1.5", "volume": "11"},
                {"start": "1700001000", "low": "1", "high": "2", "open": "1.3", "close": "1.4", "volume": "12"}
            ]}"#,
        )
        .unwrap();
        let candles = candles_from_response(&resp, now).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].datetime < candles[1].datetime);
        assert_eq!(candles[1].volume, 11.0);
    }

    #[test]
    fn test_book_quote() {
        let resp: BestBidAskResponse = serde_json::from_str(
            r#"{"pricebooks": [{"product_id": "BTC-USD",
                "bids": [{"price": "43000.01", "size": "0.5"}],
                "asks": [{"price": "43000.02", "size": "0.2"}], "time": "2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        let q = quote_from_book(&resp.pricebooks[0]).unwrap();
        assert!(q.ask > q.bid);
    }

    #[test]
    fn test_error_classification() {
        let err = classify_error(401, r#"{"error": "unauthorized", "message": "invalid signature"}"#);
        assert!(matches!(err, BrokerError::Auth(_)));
        assert!(classify_error(502, "<html>bad gateway</html>").is_transient());
    }
}
