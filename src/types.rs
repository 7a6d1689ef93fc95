//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a candle is not a usable OHLCV bar
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("non-positive or non-finite price")]
    BadPrice,
    #[error("high {high} below low {low}")]
    Inverted { high: f64, low: f64 },
    #[error("{field} {value} outside [{low}, {high}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },
    #[error("negative volume {0}")]
    NegativeVolume(f64),
}

/// Completed OHLCV bar, timestamped at its open (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate().map(|()| candle)
    }

    /// Venue data is trusted as sent; CSV input goes through [`Candle::validate`]
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), CandleError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(CandleError::BadPrice);
        }
        if self.high < self.low {
            return Err(CandleError::Inverted {
                high: self.high,
                low: self.low,
            });
        }
        for (field, value) in [("open", self.open), ("close", self.close)] {
            if value < self.low || value > self.high {
                return Err(CandleError::OutOfRange {
                    field,
                    value,
                    low: self.low,
                    high: self.high,
                });
            }
        }
        if self.volume < 0.0 {
            return Err(CandleError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }
}

/// Instrument symbol in the venue's native spelling (`EUR_USD`, `BTC-USD`)
///
/// Symbols are cloned into every trade record and log line, so the backing
/// storage is an `Arc<str>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(std::sync::Arc<str>);

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol(s.into())
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0.to_string()
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(s.as_ref().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a pair symbol into (base, quote) on `_`, `-` or `/`
    pub fn currencies(&self) -> Option<(&str, &str)> {
        let s = self.as_str();
        let idx = s.find(['_', '-', '/'])?;
        let (base, rest) = s.split_at(idx);
        let quote = &rest[1..];
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some((base, quote))
    }

    /// Factor converting quote-currency amounts into `account_currency`
    ///
    /// `None` when neither leg is the account currency (a cross pair).
    pub fn quote_conversion(&self, price: f64, account_currency: &str) -> Option<f64> {
        let Some((base, quote)) = self.currencies() else {
            return Some(1.0);
        };
        if quote.eq_ignore_ascii_case(account_currency) {
            Some(1.0)
        } else if base.eq_ignore_ascii_case(account_currency) && price > 0.0 {
            Some(1.0 / price)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for longs, -1 for shorts
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// Execution venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Oanda,
    Coinbase,
    Paper,
}

impl Venue {
    pub fn as_str(self) -> &'static str {
        match self {
            Venue::Oanda => "oanda",
            Venue::Coinbase => "coinbase",
            Venue::Paper => "paper",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oanda" => Ok(Venue::Oanda),
            "coinbase" => Ok(Venue::Coinbase),
            "paper" => Ok(Venue::Paper),
            other => Err(format!("unknown venue '{}'", other)),
        }
    }
}

/// Top-of-book quote
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn new(bid: f64, ask: f64) -> Self {
        Self { bid, ask }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Price a market order on `side` would pay
    pub fn entry_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }

    /// Price a market order closing a `side` position would get
    pub fn exit_price(&self, side: Side) -> f64 {
        self.entry_price(side.opposite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_currencies() {
        assert_eq!(Symbol::new("EUR_USD").currencies(), Some(("EUR", "USD")));
        assert_eq!(Symbol::new("BTC-USD").currencies(), Some(("BTC", "USD")));
        assert_eq!(Symbol::new("BTCUSD").currencies(), None);
        assert_eq!(Symbol::new("_USD").currencies(), None);
    }

    #[test]
    fn test_quote_conversion() {
        assert_eq!(Symbol::new("EUR_USD").quote_conversion(1.1, "USD"), Some(1.0));
        let jpy = Symbol::new("USD_JPY").quote_conversion(150.0, "USD").unwrap();
        assert!((jpy - 1.0 / 150.0).abs() < 1e-12);
        assert_eq!(Symbol::new("EUR_GBP").quote_conversion(0.85, "USD"), None);
    }

    #[test]
    fn test_side_parsing_and_opposite() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("short".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.sign(), -1.0);
    }

    #[test]
    fn test_quote_prices() {
        let q = Quote::new(1.1000, 1.1002);
        assert_eq!(q.entry_price(Side::Buy), 1.1002);
        assert_eq!(q.entry_price(Side::Sell), 1.1000);
        assert_eq!(q.exit_price(Side::Buy), 1.1000);
        assert!((q.mid() - 1.1001).abs() < 1e-12);
    }

    #[test]
    fn test_candle_validation() {
        let now = Utc::now();
        assert!(Candle::new(now, 10.0, 11.0, 9.0, 10.5, 100.0).is_ok());
        assert_eq!(
            Candle::new(now, 10.0, 9.0, 11.0, 10.5, 100.0).unwrap_err(),
            CandleError::Inverted { high: 9.0, low: 11.0 }
        );
        assert!(matches!(
            Candle::new(now, 12.0, 11.0, 9.0, 10.5, 100.0),
            Err(CandleError::OutOfRange { field: "open", .. })
        ));
        assert_eq!(
            Candle::new(now, 10.0, 11.0, 9.0, 10.5, -1.0).unwrap_err(),
            CandleError::NegativeVolume(-1.0)
        );
        assert_eq!(Candle::new(now, f64::NAN, 11.0, 9.0, 10.5, 1.0).unwrap_err(), CandleError::BadPrice);
    }

    #[test]
    fn test_symbol_serializes_as_string() {
        let json = serde_json::to_string(&Symbol::new("EUR_USD")).unwrap();
        assert_eq!(json, "\"EUR_USD\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Symbol::new("EUR_USD"));
    }
}
