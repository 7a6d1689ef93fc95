//! OANDA v3 REST client
//!
//! Brackets are placed atomically: the market entry carries
//! `stopLossOnFill`/`takeProfitOnFill`, so OANDA creates both dependent
//! orders in the same transaction as the fill. The client then reads the
//! opened trade back to confirm both legs exist before reporting the entry
//! as protected.

use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::*;
use crate::auth::OandaToken;
use crate::common::{ClientConfig, Resilience};
use crate::error::{BrokerError, BrokerResult};
use crate::ledger::{ExitReason, ProtectionIds, TradeRecord};
use crate::types::{Candle, Quote, Side, Symbol, Venue};
use crate::venues::{BracketRequest, Broker, EntryFill, EntryStatus, ExitFill, InstrumentSpec, TradeStatus};

pub const LIVE_URL: &str = "https://api-fxtrade.oanda.com";
pub const PRACTICE_URL: &str = "https://api-fxpractice.oanda.com";

const ORDER_TAG: &str = "bracket-trader";

#[derive(Clone)]
pub struct OandaClient {
    token: OandaToken,
    account_id: String,
    base_url: String,
    granularity: String,
    http_client: Client,
    resilience: Resilience,
}

impl OandaClient {
    pub fn new(
        token: OandaToken,
        account_id: impl Into<String>,
        base_url: impl Into<String>,
        config: ClientConfig,
    ) -> BrokerResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            token,
            account_id: account_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            granularity: "M15".to_string(),
            http_client,
            resilience: Resilience::new(Venue::Oanda, &config),
        })
    }

    pub fn with_granularity(mut self, granularity: impl Into<String>) -> Self {
        self.granularity = granularity.into();
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn account_path(&self, rest: &str) -> String {
        format!("/v3/accounts/{}{}", self.account_id, rest)
    }

    /// One HTTP round trip, errors classified
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> BrokerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http_client
            .request(method, &url)
            .header("Authorization", self.token.bearer())
            .header("Accept-Datetime-Format", "RFC3339");
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
        serde_json::from_str(&text)
            .map_err(|e| BrokerError::Parse(format!("{}: {} (body: {})", path, e, truncate(&text))))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> BrokerResult<T> {
        self.resilience
            .execute_with_retry(|| self.request(Method::GET, path, None))
            .await
    }

    async fn get_trade(&self, trade_id: &str) -> BrokerResult<Trade> {
        let resp: TradeResponse = self
            .get(&self.account_path(&format!("/trades/{}", trade_id)))
            .await?;
        Ok(resp.trade)
    }

    fn trade_id<'a>(&self, trade: &'a TradeRecord) -> BrokerResult<&'a str> {
        trade
            .venue_trade_id
            .as_deref()
            .ok_or_else(|| BrokerError::Rejected(format!("trade {} has no OANDA trade id", trade.id)))
    }
}

#[async_trait]
impl Broker for OandaClient {
    fn venue(&self) -> Venue {
        Venue::Oanda
    }

    async fn quote(&self, symbol: &Symbol) -> BrokerResult<Quote> {
        let path = self.account_path(&format!("/pricing?instruments={}", symbol));
        let resp: PricingResponse = self.get(&path).await?;
        resp.prices
            .iter()
            .find(|p| p.instrument == symbol.as_str())
            .and_then(quote_from_price)
            .ok_or_else(|| BrokerError::Parse(format!("no price for {}", symbol)))
    }

    async fn candles(&self, symbol: &Symbol, count: usize) -> BrokerResult<Vec<Candle>> {
        // one extra: the newest candle is usually still forming
        let path = format!(
            "/v3/instruments/{}/candles?granularity={}&count={}&price=M",
            symbol,
            self.granularity,
            count + 1
        );
        let resp: CandlesResponse = self.get(&path).await?;
        let mut candles = candles_from_response(&resp)?;
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        Ok(candles)
    }

    async fn account_balance(&self) -> BrokerResult<f64> {
        let resp: AccountSummaryResponse = self.get(&self.account_path("/summary")).await?;
        to_f64(resp.account.balance)
    }

    async fn instrument(&self, symbol: &Symbol) -> BrokerResult<InstrumentSpec> {
        Ok(InstrumentSpec::forex(symbol))
    }

    async fn submit_entry(&self, request: &BracketRequest) -> BrokerResult<EntryFill> {
        let spec = InstrumentSpec::forex(&request.symbol);
        let body = serde_json::to_string(&build_order(request, &spec)?)?;
        let path = self.account_path("/orders");

        // OANDA does not deduplicate on client ids: never resend an order
        let resp: OrderResponse = self
            .resilience
            .execute_once(|| self.request(Method::POST, &path, Some(&body)))
            .await?;
        let mut fill = interpret_order(&resp)?;

        if let Some(trade_id) = fill.venue_trade_id.clone() {
            match self.get_trade(&trade_id).await {
                Ok(trade) => fill.protection = protection_from_trade(&trade),
                Err(e) => tracing::warn!(
                    trade_id = %trade_id,
                    "Could not confirm on-fill protection: {}", e
                ),
            }
        }

        tracing::info!(
            symbol = %request.symbol,
            trade_id = ?fill.venue_trade_id,
            "OANDA fill {} {} @ {} (protected: {})",
            request.side,
            fill.filled_size,
            fill.fill_price,
            fill.protection.is_some()
        );
        Ok(fill)
    }

    async fn lookup_entry(&self, trade: &TradeRecord) -> BrokerResult<EntryStatus> {
        let path = self.account_path(&format!("/orders/@{}", trade.client_order_id));
        let order = match self.get::<OrderDetailResponse>(&path).await {
            Ok(resp) => resp.order,
            Err(e) if e.is_not_found() => return Ok(EntryStatus::NotFound),
            Err(e) => return Err(e),
        };
        let opened = match order.trade_opened_id.as_deref() {
            Some(trade_id) => Some(self.get_trade(trade_id).await?),
            None => None,
        };
        entry_status(&order, opened.as_ref())
    }

    async fn attach_protection(&self, trade: &TradeRecord) -> BrokerResult<ProtectionIds> {
        let trade_id = self.trade_id(trade)?;
        let spec = InstrumentSpec::forex(&trade.symbol);
        let body = serde_json::to_string(&build_dependent_orders(trade, &spec)?)?;
        let path = self.account_path(&format!("/trades/{}/orders", trade_id));

        // replaces whatever is there, so a resend is harmless
        let resp: DependentOrdersResponse = self
            .resilience
            .execute_with_retry(|| self.request(Method::PUT, &path, Some(&body)))
            .await?;
        interpret_dependent_orders(&resp)
    }

    async fn poll_trade(&self, trade: &TradeRecord) -> BrokerResult<TradeStatus> {
        let remote = self.get_trade(self.trade_id(trade)?).await?;
        interpret_trade(&remote)
    }

    async fn flatten(&self, trade: &TradeRecord) -> BrokerResult<ExitFill> {
        let trade_id = self.trade_id(trade)?;

        let remote = self.get_trade(trade_id).await?;
        if let TradeStatus::Closed(exit) = interpret_trade(&remote)? {
            return Ok(exit);
        }

        let body = serde_json::to_string(&CloseTradeRequest { units: "ALL" })?;
        let path = self.account_path(&format!("/trades/{}/close", trade_id));
        let resp: CloseTradeResponse = self
            .resilience
            .execute_once(|| self.request(Method::PUT, &path, Some(&body)))
            .await?;
        interpret_close(&resp)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> BrokerResult<()> {
        let path = self.account_path(&format!("/orders/{}/cancel", order_id));
        let _: serde_json::Value = self
            .resilience
            .execute_with_retry(|| self.request(Method::PUT, &path, None))
            .await?;
        Ok(())
    }
}

// ==================== WIRE SHAPING ====================

pub(crate) fn build_order(request: &BracketRequest, spec: &InstrumentSpec) -> BrokerResult<OrderRequest> {
    let units = spec.round_size(request.size).ok_or_else(|| {
        BrokerError::Rejected(format!(
            "size {} rounds below one unit for {}",
            request.size, request.symbol
        ))
    })?;
    let units = match request.side {
        Side::Buy => units,
        Side::Sell => -units,
    };
    let (stop_loss, take_profit) =
        bracket_prices(spec, request.entry_price, request.stop_loss, request.take_profit)?;

    let extensions = ClientExtensions {
        id: request.client_order_id.clone(),
        tag: ORDER_TAG.to_string(),
        comment: request.strategy.clone(),
    };
    Ok(OrderRequest {
        order: MarketOrder {
            order_type: "MARKET",
            instrument: request.symbol.to_string(),
            units,
            time_in_force: "FOK",
            position_fill: "DEFAULT",
            stop_loss_on_fill: OnFill::gtc(stop_loss),
            take_profit_on_fill: OnFill::gtc(take_profit),
            client_extensions: extensions.clone(),
            trade_client_extensions: extensions,
        },
    })
}

pub(crate) fn build_dependent_orders(
    trade: &TradeRecord,
    spec: &InstrumentSpec,
) -> BrokerResult<DependentOrdersRequest> {
    let (stop_loss, take_profit) =
        bracket_prices(spec, trade.entry(), trade.stop_loss, trade.take_profit)?;
    Ok(DependentOrdersRequest {
        take_profit: OnFill::gtc(take_profit),
        stop_loss: OnFill::gtc(stop_loss),
    })
}

/// Stop rounded away from the entry, target to the nearest tick
fn bracket_prices(
    spec: &InstrumentSpec,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
) -> BrokerResult<(Decimal, Decimal)> {
    let sl = spec.round_price_away(stop_loss, entry);
    let tp = spec.round_price(take_profit);
    match (sl, tp) {
        (Some(sl), Some(tp)) if sl != tp => Ok((sl, tp)),
        _ => Err(BrokerError::Rejected(format!(
            "bracket prices not representable: sl={} tp={}",
            stop_loss, take_profit
        ))),
    }
}

pub(crate) fn interpret_order(resp: &OrderResponse) -> BrokerResult<EntryFill> {
    if let Some(fill) = &resp.order_fill_transaction {
        if let Some(opened) = &fill.trade_opened {
            let price = opened.price.or(fill.price).ok_or_else(|| {
                BrokerError::Parse("fill transaction without price".to_string())
            })?;
            let units = opened.units.or(fill.units).unwrap_or_default().abs();
            return Ok(EntryFill {
                fill_price: to_f64(price)?,
                filled_size: to_f64(units)?,
                venue_order_id: resp
                    .order_create_transaction
                    .as_ref()
                    .map(|t| t.id.clone())
                    .unwrap_or_else(|| fill.id.clone()),
                venue_trade_id: Some(opened.trade_id.clone()),
                fees: fill.commission.map(|c| to_f64(c.abs())).transpose()?.unwrap_or(0.0),
                protection: None,
            });
        }
        // with positionFill DEFAULT an opposite open trade gets reduced instead
        let touched = reduced_trades(fill).join(",");
        tracing::error!(
            transaction_id = %fill.id,
            trades = %touched,
            "Entry fill reduced existing OANDA trade(s) instead of opening one; account exposure changed"
        );
        return Err(BrokerError::Rejected(format!(
            "fill {} reduced trade(s) {} instead of opening a trade",
            fill.id, touched
        )));
    }

    let reason = resp
        .order_cancel_transaction
        .as_ref()
        .and_then(|c| c.reason.clone())
        .or_else(|| {
            resp.order_reject_transaction
                .as_ref()
                .and_then(|r| r.reject_reason.clone())
        })
        .or_else(|| resp.error_message.clone())
        .unwrap_or_else(|| "order was not filled".to_string());
    Err(BrokerError::Rejected(reason))
}

fn reduced_trades(fill: &FillTransaction) -> Vec<String> {
    fill.trade_reduced
        .iter()
        .chain(fill.trades_closed.iter())
        .map(|t| t.trade_id.clone())
        .collect()
}

/// Entry status from a looked-up order and the trade it opened, if any
pub(crate) fn entry_status(order: &OrderDetail, opened: Option<&Trade>) -> BrokerResult<EntryStatus> {
    match order.state.as_str() {
        "FILLED" => match opened {
            Some(trade) => {
                let units = trade.initial_units.or(trade.current_units).unwrap_or_default().abs();
                Ok(EntryStatus::Filled(EntryFill {
                    fill_price: to_f64(trade.price)?,
                    filled_size: to_f64(units)?,
                    venue_order_id: order.id.clone(),
                    venue_trade_id: Some(trade.id.clone()),
                    fees: 0.0,
                    protection: protection_from_trade(trade),
                }))
            }
            None => {
                let touched: Vec<&str> = order
                    .trade_reduced_id
                    .iter()
                    .chain(order.trade_closed_ids.iter())
                    .map(String::as_str)
                    .collect();
                tracing::error!(
                    order_id = %order.id,
                    transaction_id = ?order.filling_transaction_id,
                    trades = %touched.join(","),
                    "Entry fill reduced existing OANDA trade(s) instead of opening one; account exposure changed"
                );
                Ok(EntryStatus::Unfilled {
                    reason: format!("order {} reduced trade(s) {} instead of opening one", order.id, touched.join(",")),
                })
            }
        },
        "CANCELLED" => Ok(EntryStatus::Unfilled {
            reason: format!("order {} cancelled", order.id),
        }),
        _ => Ok(EntryStatus::Working {
            order_id: order.id.clone(),
        }),
    }
}

pub(crate) fn protection_from_trade(trade: &Trade) -> Option<ProtectionIds> {
    match (&trade.stop_loss_order, &trade.take_profit_order) {
        (Some(sl), Some(tp)) if sl.is_live() && tp.is_live() => {
            Some(ProtectionIds::legs(sl.id.clone(), tp.id.clone()))
        }
        _ => None,
    }
}

pub(crate) fn interpret_dependent_orders(resp: &DependentOrdersResponse) -> BrokerResult<ProtectionIds> {
    let reject = resp
        .stop_loss_order_reject_transaction
        .as_ref()
        .or(resp.take_profit_order_reject_transaction.as_ref())
        .and_then(|r| r.reject_reason.clone());
    if let Some(reason) = reject {
        return Err(BrokerError::Rejected(reason));
    }

    match (&resp.stop_loss_order_transaction, &resp.take_profit_order_transaction) {
        (Some(sl), Some(tp)) => Ok(ProtectionIds::legs(sl.id.clone(), tp.id.clone())),
        _ => Err(BrokerError::Rejected(
            resp.error_message
                .clone()
                .unwrap_or_else(|| "dependent orders not created".to_string()),
        )),
    }
}

pub(crate) fn interpret_trade(trade: &Trade) -> BrokerResult<TradeStatus> {
    if trade.state == "CLOSED" {
        let filled = |o: &Option<DependentOrder>| o.as_ref().is_some_and(|o| o.is_filled());
        let reason = if filled(&trade.take_profit_order) {
            ExitReason::TakeProfit
        } else if filled(&trade.stop_loss_order) {
            ExitReason::StopLoss
        } else {
            ExitReason::External
        };
        let exit_price = trade.average_close_price.unwrap_or(trade.price);
        return Ok(TradeStatus::Closed(ExitFill {
            exit_price: to_f64(exit_price)?,
            realized_pnl: trade.realized_pl.map(to_f64).transpose()?,
            fees: trade
                .financing
                .map(|f| to_f64(-f))
                .transpose()?
                .unwrap_or(0.0),
            reason,
        }));
    }

    Ok(match protection_from_trade(trade) {
        Some(ids) => TradeStatus::Protected(ids),
        None => {
            let describe = |name: &str, o: &Option<DependentOrder>| match o {
                None => format!("{} missing", name),
                Some(o) => format!("{} {}", name, o.state),
            };
            TradeStatus::Unprotected {
                reason: format!(
                    "{}, {}",
                    describe("stop loss", &trade.stop_loss_order),
                    describe("take profit", &trade.take_profit_order)
                ),
            }
        }
    })
}

pub(crate) fn interpret_close(resp: &CloseTradeResponse) -> BrokerResult<ExitFill> {
    let fill = resp.order_fill_transaction.as_ref().ok_or_else(|| {
        BrokerError::Rejected(
            resp.order_cancel_transaction
                .as_ref()
                .and_then(|c| c.reason.clone())
                .or_else(|| resp.error_message.clone())
                .unwrap_or_else(|| "close order not filled".to_string()),
        )
    })?;

    let closed = fill.trades_closed.first();
    let price = closed
        .and_then(|c| c.price)
        .or(fill.price)
        .ok_or_else(|| BrokerError::Parse("close fill without price".to_string()))?;
    let pnl = closed.and_then(|c| c.realized_pl).or(fill.pl);
    Ok(ExitFill {
        exit_price: to_f64(price)?,
        realized_pnl: pnl.map(to_f64).transpose()?,
        fees: fill.commission.map(|c| to_f64(c.abs())).transpose()?.unwrap_or(0.0),
        reason: ExitReason::Flattened,
    })
}

pub(crate) fn quote_from_price(price: &Price) -> Option<Quote> {
    let bid = price.bids.first().map(|b| b.price).or(price.closeout_bid)?;
    let ask = price.asks.first().map(|a| a.price).or(price.closeout_ask)?;
    Some(Quote::new(bid.to_f64()?, ask.to_f64()?))
}

pub(crate) fn candles_from_response(resp: &CandlesResponse) -> BrokerResult<Vec<Candle>> {
    resp.candles
        .iter()
        .filter(|c| c.complete)
        .filter_map(|c| c.mid.as_ref().map(|mid| (c, mid)))
        .map(|(c, mid)| {
            let datetime = chrono::DateTime::parse_from_rfc3339(&c.time)
                .map_err(|e| BrokerError::Parse(format!("candle time '{}': {}", c.time, e)))?
                .with_timezone(&chrono::Utc);
            Ok(Candle::new_unchecked(
                datetime,
                to_f64(mid.o)?,
                to_f64(mid.h)?,
                to_f64(mid.l)?,
                to_f64(mid.c)?,
                c.volume as f64,
            ))
        })
        .collect()
}

fn classify_error(status: u16, body: &str) -> BrokerError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let reject = parsed
        .as_ref()
        .and_then(|b| b.order_reject_transaction.as_ref())
        .and_then(|r| r.reject_reason.clone());
    if let Some(reason) = reject {
        return BrokerError::Rejected(reason);
    }
    let message = parsed
        .and_then(|b| b.error_message)
        .unwrap_or_else(|| truncate(body));
    BrokerError::api(Venue::Oanda, status, message)
}

fn to_f64(d: Decimal) -> BrokerResult<f64> {
    d.to_f64()
        .ok_or_else(|| BrokerError::Parse(format!("decimal {} out of f64 range", d)))
}

fn truncate(s: &str) -> String {
    s.chars().take(300).collect()
}
