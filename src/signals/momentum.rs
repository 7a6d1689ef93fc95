//! Momentum scanner
//!
//! Long when RSI is strong, price holds above the 21 EMA, the last bar trades
//! well above average volume and most recent candles close green. Shorts
//! mirror every condition. Stop is a fixed percentage, target a multiple of
//! the risk.

use serde::{Deserialize, Serialize};

use super::{Setup, SignalScanner};
use crate::indicators::{average_volume, last_ema, last_rsi};
use crate::types::{Candle, Side, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub min_confidence: f64,
    pub risk_reward: f64,
    pub stop_loss_pct: f64,
    pub rsi_period: usize,
    pub ema_period: usize,
    pub volume_period: usize,
    pub rsi_bullish: f64,
    pub rsi_bearish: f64,
    pub min_volume_multiplier: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            risk_reward: 4.0,
            stop_loss_pct: 0.02,
            rsi_period: 14,
            ema_period: 21,
            volume_period: 20,
            rsi_bullish: 55.0,
            rsi_bearish: 45.0,
            min_volume_multiplier: 1.5,
        }
    }
}

/// Readings behind one momentum decision
#[derive(Debug, Clone, Copy)]
struct Reading {
    rsi: f64,
    volume_ratio: f64,
    /// (price - ema) / price
    ema_distance: f64,
    green: usize,
    red: usize,
}

pub struct MomentumScanner {
    config: MomentumConfig,
}

impl MomentumScanner {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    fn read(&self, candles: &[Candle]) -> Option<Reading> {
        let last = candles.last()?;
        let rsi = last_rsi(candles, self.config.rsi_period)?;
        let ema = last_ema(candles, self.config.ema_period)?;
        let avg_volume = average_volume(candles, self.config.volume_period)?;
        if avg_volume <= 0.0 || last.close <= 0.0 {
            return None;
        }
        let recent = &candles[candles.len().saturating_sub(3)..];
        Some(Reading {
            rsi,
            volume_ratio: last.volume / avg_volume,
            ema_distance: (last.close - ema) / last.close,
            green: recent.iter().filter(|c| c.is_green()).count(),
            red: recent.iter().filter(|c| c.is_red()).count(),
        })
    }

    fn direction(&self, r: &Reading) -> Option<Side> {
        if r.volume_ratio <= self.config.min_volume_multiplier {
            return None;
        }
        if r.rsi > self.config.rsi_bullish && r.ema_distance > 0.0 && r.green >= 2 {
            Some(Side::Buy)
        } else if r.rsi < self.config.rsi_bearish && r.ema_distance < 0.0 && r.red >= 2 {
            Some(Side::Sell)
        } else {
            None
        }
    }

    fn confidence(&self, side: Side, r: &Reading) -> f64 {
        let mut confidence: f64 = 0.5;
        let strong_rsi = match side {
            Side::Buy => r.rsi > 60.0,
            Side::Sell => r.rsi < 40.0,
        };
        if strong_rsi {
            confidence += 0.1;
        }
        if r.volume_ratio > 2.0 {
            confidence += 0.1;
        }
        if r.ema_distance.abs() > 0.01 {
            confidence += 0.1;
        }
        if self.config.risk_reward > 4.5 {
            confidence += 0.05;
        }
        confidence.min(1.0)
    }
}

impl SignalScanner for MomentumScanner {
    fn name(&self) -> &str {
        "momentum"
    }

    fn min_candles(&self) -> usize {
        self.config
            .ema_period
            .max(self.config.rsi_period + 1)
            .max(self.config.volume_period + 1)
    }

    fn scan(&self, symbol: &Symbol, candles: &[Candle]) -> Option<Setup> {
        if candles.len() < self.min_candles() {
            return None;
        }
        let reading = self.read(candles)?;
        let side = self.direction(&reading)?;
        let confidence = self.confidence(side, &reading);
        if confidence < self.config.min_confidence {
            tracing::debug!(%symbol, "Momentum {:?} below confidence: {:.2}", side, confidence);
            return None;
        }

        let entry = candles.last()?.close;
        let risk = entry * self.config.stop_loss_pct;
        let (stop_loss, take_profit, kind) = match side {
            Side::Buy => (entry - risk, entry + risk * self.config.risk_reward, "bullish_momentum"),
            Side::Sell => (entry + risk, entry - risk * self.config.risk_reward, "bearish_momentum"),
        };

        Some(Setup {
            symbol: symbol.clone(),
            side,
            entry,
            stop_loss,
            take_profit,
            confidence: (confidence * 100.0).round() / 100.0,
            kind: kind.to_string(),
            strategy: self.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn series(step: f64, last_volume: f64) -> Vec<Candle> {
        (0..30)
            .map(|i| {
                let close = 100.0 + i as f64 * step;
                let open = close - step * 0.6;
                let volume = if i == 29 { last_volume } else { 100.0 };
                Candle::new_unchecked(
                    Utc::now(),
                    open,
                    open.max(close) + 0.2,
                    open.min(close) - 0.2,
                    close,
                    volume,
                )
            })
            .collect()
    }

    #[test]
    fn test_bullish_momentum() {
        let scanner = MomentumScanner::new(MomentumConfig::default());
        let setup = scanner.scan(&Symbol::new("BTC-USD"), &series(0.5, 250.0)).unwrap();

        assert_eq!(setup.side, Side::Buy);
        assert_eq!(setup.kind, "bullish_momentum");
        assert_relative_eq!(setup.entry, 114.5, epsilon = 1e-9);
        assert_relative_eq!(setup.stop_loss, 114.5 * 0.98, epsilon = 1e-9);
        assert_relative_eq!(setup.risk_reward(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(setup.confidence, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_bearish_momentum() {
        let scanner = MomentumScanner::new(MomentumConfig::default());
        let setup = scanner.scan(&Symbol::new("BTC-USD"), &series(-0.5, 250.0)).unwrap();

        assert_eq!(setup.side, Side::Sell);
        assert!(setup.stop_loss > setup.entry && setup.take_profit < setup.entry);
    }

    #[test]
    fn test_needs_volume_surge() {
        let scanner = MomentumScanner::new(MomentumConfig::default());
        assert!(scanner.scan(&Symbol::new("BTC-USD"), &series(0.5, 140.0)).is_none());
    }

    #[test]
    fn test_low_confidence_rejected() {
        // surge of 1.8x: no volume bonus, 0.7 < 0.75
        let scanner = MomentumScanner::new(MomentumConfig::default());
        assert!(scanner.scan(&Symbol::new("BTC-USD"), &series(0.5, 180.0)).is_none());
    }
}
