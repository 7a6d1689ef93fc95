//! Coinbase Advanced Trade v3 wire types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== REQUESTS ====================

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub client_order_id: String,
    pub product_id: String,
    /// "BUY" or "SELL"
    pub side: &'static str,
    pub order_configuration: OrderConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderConfiguration {
    MarketMarketIoc {
        base_size: Decimal,
    },
    /// Resting exit: limit at the target, stop-market trigger at the stop
    TriggerBracketGtc {
        base_size: Decimal,
        limit_price: Decimal,
        stop_trigger_price: Decimal,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOrdersRequest {
    pub order_ids: Vec<String>,
}

// ==================== RESPONSES ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderResponse {
    #[serde(default)]
    pub success: bool,
    pub success_response: Option<SuccessResponse>,
    pub error_response: Option<ErrorResponse>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessResponse {
    pub order_id: String,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub preview_failure_reason: Option<String>,
}

impl ErrorResponse {
    pub fn describe(&self) -> String {
        [
            &self.error,
            &self.preview_failure_reason,
            &self.message,
            &self.error_details,
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(": ")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetOrderResponse {
    pub order: Order,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListOrdersResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub product_id: String,
    pub side: String,
    pub client_order_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub filled_size: Option<Decimal>,
    #[serde(default)]
    pub average_filled_price: Option<Decimal>,
    #[serde(default)]
    pub total_fees: Option<Decimal>,
}

impl Order {
    /// No further fills can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "FILLED" | "CANCELLED" | "EXPIRED" | "FAILED"
        )
    }

    pub fn is_working(&self) -> bool {
        matches!(
            self.status.as_str(),
            "OPEN" | "PENDING" | "QUEUED" | "CANCEL_QUEUED"
        )
    }

    pub fn filled(&self) -> Decimal {
        self.filled_size.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrdersResponse {
    pub results: Vec<CancelResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelResult {
    pub success: bool,
    pub failure_reason: Option<String>,
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub price: Option<Decimal>,
    pub base_increment: Decimal,
    pub quote_increment: Decimal,
    pub base_min_size: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BestBidAskResponse {
    pub pricebooks: Vec<PriceBook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceBook {
    pub product_id: String,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlesResponse {
    pub candles: Vec<CandleRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleRow {
    /// Unix seconds, as a string
    pub start: String,
    pub low: Decimal,
    pub high: Decimal,
    pub open: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub currency: String,
    pub available_balance: Balance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub value: Decimal,
    pub currency: Option<String>,
}
