//! OANDA v3 REST wire types
//!
//! OANDA sends every number as a string; `rust_decimal` parses those directly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== REQUESTS ====================

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub order: MarketOrder,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrder {
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub instrument: String,
    /// Signed: positive buys, negative sells
    pub units: Decimal,
    pub time_in_force: &'static str,
    pub position_fill: &'static str,
    pub stop_loss_on_fill: OnFill,
    pub take_profit_on_fill: OnFill,
    pub client_extensions: ClientExtensions,
    pub trade_client_extensions: ClientExtensions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnFill {
    pub price: Decimal,
    pub time_in_force: &'static str,
}

impl OnFill {
    pub fn gtc(price: Decimal) -> Self {
        Self {
            price,
            time_in_force: "GTC",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientExtensions {
    pub id: String,
    pub tag: String,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentOrdersRequest {
    pub take_profit: OnFill,
    pub stop_loss: OnFill,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseTradeRequest {
    pub units: &'static str,
}

// ==================== RESPONSES ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_create_transaction: Option<Transaction>,
    pub order_fill_transaction: Option<FillTransaction>,
    pub order_cancel_transaction: Option<CancelTransaction>,
    pub order_reject_transaction: Option<RejectTransaction>,
    #[serde(default, rename = "relatedTransactionIDs")]
    pub related_transaction_ids: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillTransaction {
    pub id: String,
    pub price: Option<Decimal>,
    pub units: Option<Decimal>,
    pub trade_opened: Option<TradeOpened>,
    pub trade_reduced: Option<TradeReduced>,
    #[serde(default)]
    pub trades_closed: Vec<TradeReduced>,
    pub pl: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub financing: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOpened {
    #[serde(rename = "tradeID")]
    pub trade_id: String,
    pub units: Option<Decimal>,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeReduced {
    #[serde(rename = "tradeID")]
    pub trade_id: String,
    pub units: Option<Decimal>,
    #[serde(rename = "realizedPL")]
    pub realized_pl: Option<Decimal>,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelTransaction {
    pub id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectTransaction {
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentOrdersResponse {
    pub take_profit_order_transaction: Option<Transaction>,
    pub stop_loss_order_transaction: Option<Transaction>,
    pub take_profit_order_reject_transaction: Option<RejectTransaction>,
    pub stop_loss_order_reject_transaction: Option<RejectTransaction>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTradeResponse {
    pub order_fill_transaction: Option<FillTransaction>,
    pub order_cancel_transaction: Option<CancelTransaction>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeResponse {
    pub trade: Trade,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub instrument: String,
    pub price: Decimal,
    pub state: String,
    pub initial_units: Option<Decimal>,
    pub current_units: Option<Decimal>,
    #[serde(rename = "realizedPL")]
    pub realized_pl: Option<Decimal>,
    pub average_close_price: Option<Decimal>,
    pub financing: Option<Decimal>,
    pub take_profit_order: Option<DependentOrder>,
    pub stop_loss_order: Option<DependentOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetailResponse {
    pub order: OrderDetail,
}

/// An order as `GET orders/{specifier}` returns it
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    pub id: String,
    pub state: String,
    #[serde(rename = "tradeOpenedID")]
    pub trade_opened_id: Option<String>,
    #[serde(rename = "tradeReducedID")]
    pub trade_reduced_id: Option<String>,
    #[serde(default, rename = "tradeClosedIDs")]
    pub trade_closed_ids: Vec<String>,
    #[serde(rename = "fillingTransactionID")]
    pub filling_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependentOrder {
    pub id: String,
    pub state: String,
    pub price: Option<Decimal>,
}

impl DependentOrder {
    pub fn is_live(&self) -> bool {
        self.state == "PENDING"
    }

    pub fn is_filled(&self) -> bool {
        self.state == "FILLED"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingResponse {
    pub prices: Vec<Price>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub instrument: String,
    #[serde(default)]
    pub bids: Vec<PriceBucket>,
    #[serde(default)]
    pub asks: Vec<PriceBucket>,
    pub closeout_bid: Option<Decimal>,
    pub closeout_ask: Option<Decimal>,
    #[serde(default)]
    pub tradeable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceBucket {
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlesResponse {
    pub instrument: Option<String>,
    pub candles: Vec<CandleStick>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleStick {
    pub time: String,
    pub complete: bool,
    #[serde(default)]
    pub volume: u64,
    pub mid: Option<CandleData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleData {
    pub o: Decimal,
    pub h: Decimal,
    pub l: Decimal,
    pub c: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSummaryResponse {
    pub account: AccountSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    #[serde(rename = "NAV")]
    pub nav: Option<Decimal>,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_message: Option<String>,
    pub error_code: Option<serde_json::Value>,
    pub order_reject_transaction: Option<RejectTransaction>,
}
