//! Fair Value Gap scanner
//!
//! A three-candle imbalance: the first candle's high stays below the third
//! candle's low (bullish), or its low stays above the third's high (bearish).
//! Entry is the middle of the gap, the stop sits at the far side of the first
//! candle and the target is a fixed multiple of the risk.

use serde::{Deserialize, Serialize};

use super::{Setup, SignalScanner};
use crate::indicators::{last_atr, last_ema, last_rsi, retracement, swing_range};
use crate::types::{Candle, Side, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FvgConfig {
    /// Minimum gap as a fraction of price
    pub gap_threshold: f64,
    pub min_confidence: f64,
    pub risk_reward: f64,
    /// ATR/price needed for the volatility bonus
    pub atr_volatility_min: f64,
    pub fib_levels: Vec<f64>,
    /// Entry within this fraction of a fib level counts as confluence
    pub fib_tolerance: f64,
    pub fib_lookback: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub min_candles: usize,
}

impl Default for FvgConfig {
    fn default() -> Self {
        Self {
            gap_threshold: 0.002,
            min_confidence: 0.80,
            risk_reward: 3.0,
            atr_volatility_min: 0.005,
            fib_levels: vec![0.618, 0.786],
            fib_tolerance: 0.001,
            fib_lookback: 20,
            ema_period: 21,
            rsi_period: 14,
            atr_period: 14,
            min_candles: 25,
        }
    }
}

/// Raw gap before scoring
#[derive(Debug, Clone, PartialEq)]
struct Gap {
    side: Side,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
    /// Fraction of price
    size: f64,
}

pub struct FvgScanner {
    config: FvgConfig,
}

impl FvgScanner {
    pub fn new(config: FvgConfig) -> Self {
        Self { config }
    }

    fn detect(&self, candles: &[Candle]) -> Option<Gap> {
        let [c1, c2, c3] = candles.last_chunk::<3>()?;
        let rr = self.config.risk_reward;

        if c1.high < c3.low && c2.close < c3.close {
            let size = (c3.low - c1.high) / c3.low;
            if size >= self.config.gap_threshold {
                let entry = (c1.high + c3.low) / 2.0;
                let risk = entry - c1.low;
                return Some(Gap {
                    side: Side::Buy,
                    entry,
                    stop_loss: c1.low,
                    take_profit: entry + risk * rr,
                    size,
                });
            }
        }

        if c1.low > c3.high && c2.close > c3.close {
            let size = (c1.low - c3.high) / c3.high;
            if size >= self.config.gap_threshold {
                let entry = (c1.low + c3.high) / 2.0;
                let risk = c1.high - entry;
                return Some(Gap {
                    side: Side::Sell,
                    entry,
                    stop_loss: c1.high,
                    take_profit: entry - risk * rr,
                    size,
                });
            }
        }

        None
    }

    /// Entry near a retracement level of the recent swing
    ///
    /// Not enough history to measure a swing counts as confluence.
    fn fib_confluence(&self, candles: &[Candle], entry: f64) -> bool {
        let Some((high, low)) = swing_range(candles, self.config.fib_lookback) else {
            return true;
        };
        let tolerance = entry * self.config.fib_tolerance;
        self.config
            .fib_levels
            .iter()
            .any(|&ratio| (entry - retracement(high, low, ratio)).abs() <= tolerance)
    }

    fn confidence(&self, gap: &Gap, candles: &[Candle]) -> f64 {
        let bullish = gap.side == Side::Buy;
        let price = candles.last().map(|c| c.close).unwrap_or_default();
        let mut confidence: f64 = 0.5;

        if gap.size > 0.003 {
            confidence += 0.1;
        }
        if let Some(rsi) = last_rsi(candles, self.config.rsi_period) {
            if (rsi > 50.0) == bullish {
                confidence += 0.1;
            }
        }
        if let Some(ema) = last_ema(candles, self.config.ema_period) {
            if (price > ema) == bullish {
                confidence += 0.1;
            }
        }
        if let Some(atr) = last_atr(candles, self.config.atr_period) {
            if price > 0.0 && atr / price >= self.config.atr_volatility_min {
                confidence += 0.1;
            }
        }
        if self.fib_confluence(candles, gap.entry) {
            confidence += 0.1;
        }

        confidence.min(1.0)
    }

    /// Final check before a setup leaves the scanner
    pub fn validate(&self, setup: &Setup) -> bool {
        setup.risk_reward() >= self.config.risk_reward * 0.9 && setup.confidence >= self.config.min_confidence
    }
}

impl SignalScanner for FvgScanner {
    fn name(&self) -> &str {
        "fvg"
    }

    fn min_candles(&self) -> usize {
        self.config.min_candles.max(3)
    }

    fn scan(&self, symbol: &Symbol, candles: &[Candle]) -> Option<Setup> {
        if candles.len() < self.min_candles() {
            return None;
        }
        let gap = self.detect(candles)?;
        let confidence = self.confidence(&gap, candles);
        if confidence < self.config.min_confidence {
            tracing::debug!(%symbol, "FVG {:?} below confidence: {:.2}", gap.side, confidence);
            return None;
        }

        let setup = Setup {
            symbol: symbol.clone(),
            side: gap.side,
            entry: gap.entry,
            stop_loss: gap.stop_loss,
            take_profit: gap.take_profit,
            confidence: (confidence * 100.0).round() / 100.0,
            kind: match gap.side {
                Side::Buy => "bullish_fvg".to_string(),
                Side::Sell => "bearish_fvg".to_string(),
            },
            strategy: self.name().to_string(),
        };
        self.validate(&setup).then_some(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i as i64);
        Candle::new_unchecked(t, open, high, low, close, 100.0)
    }

    /// Steady uptrend finished by a bullish gap
    fn bullish_series() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..27)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                candle(i, c - 0.1, c + 0.2, c - 0.2, c)
            })
            .collect();
        candles.push(candle(27, 114.8, 115.2, 114.6, 115.0));
        candles.push(candle(28, 115.0, 116.5, 114.9, 116.4));
        candles.push(candle(29, 116.3, 117.0, 116.0, 116.8));
        candles
    }

    fn mirrored(candles: &[Candle]) -> Vec<Candle> {
        candles
            .iter()
            .enumerate()
            .map(|(i, c)| candle(i, 300.0 - c.open, 300.0 - c.low, 300.0 - c.high, 300.0 - c.close))
            .collect()
    }

    #[test]
    fn test_bullish_gap() {
        let scanner = FvgScanner::new(FvgConfig::default());
        let setup = scanner.scan(&Symbol::new("EUR_USD"), &bullish_series()).unwrap();

        assert_eq!(setup.side, Side::Buy);
        assert_eq!(setup.kind, "bullish_fvg");
        assert_relative_eq!(setup.entry, 115.6, epsilon = 1e-9);
        assert_relative_eq!(setup.stop_loss, 114.6, epsilon = 1e-9);
        assert_relative_eq!(setup.take_profit, 118.6, epsilon = 1e-9);
        assert!(setup.confidence >= 0.8);
        assert_relative_eq!(setup.risk_reward(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bearish_gap() {
        let scanner = FvgScanner::new(FvgConfig::default());
        let setup = scanner
            .scan(&Symbol::new("EUR_USD"), &mirrored(&bullish_series()))
            .unwrap();

        assert_eq!(setup.side, Side::Sell);
        assert_relative_eq!(setup.entry, 184.4, epsilon = 1e-9);
        assert_relative_eq!(setup.stop_loss, 185.4, epsilon = 1e-9);
        assert_relative_eq!(setup.take_profit, 181.4, epsilon = 1e-9);
    }

    #[test]
    fn test_small_gap_ignored() {
        let mut candles = bullish_series();
        // gap of 0.1 on ~116 is under 0.2%
        candles[29] = candle(29, 116.3, 117.0, 115.3, 116.8);
        let scanner = FvgScanner::new(FvgConfig::default());
        assert!(scanner.scan(&Symbol::new("EUR_USD"), &candles).is_none());
    }

    #[test]
    fn test_needs_history() {
        let candles = bullish_series();
        let scanner = FvgScanner::new(FvgConfig::default());
        assert!(scanner.scan(&Symbol::new("EUR_USD"), &candles[candles.len() - 10..]).is_none());
    }

    #[test]
    fn test_confidence_threshold() {
        let scanner = FvgScanner::new(FvgConfig {
            min_confidence: 1.01,
            ..FvgConfig::default()
        });
        assert!(scanner.scan(&Symbol::new("EUR_USD"), &bullish_series()).is_none());
    }
}
