//! Signal scanners
//!
//! Every scanner looks at a window of completed candles and either returns a
//! fully priced [`Setup`] (entry, stop, target, confidence) or nothing. The
//! engine never needs to know which pattern produced a setup.

pub mod fvg;
pub mod momentum;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::types::{Candle, Side, Symbol};

pub use fvg::{FvgConfig, FvgScanner};
pub use momentum::{MomentumConfig, MomentumScanner};

/// Priced trade setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub symbol: Symbol,
    pub side: Side,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Pattern label, e.g. `bullish_fvg`
    pub kind: String,
    /// Scanner that produced it
    pub strategy: String,
}

impl Setup {
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry).abs()
    }

    pub fn risk_reward(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            self.reward() / risk
        } else {
            0.0
        }
    }

    /// Same bracket shifted so the entry sits at `price`
    pub fn repriced(&self, price: f64) -> Setup {
        let offset = price - self.entry;
        Setup {
            entry: price,
            stop_loss: self.stop_loss + offset,
            take_profit: self.take_profit + offset,
            ..self.clone()
        }
    }

    /// Stop and target on the correct sides of the entry
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.entry, self.stop_loss, self.take_profit]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0);
        finite
            && match self.side {
                Side::Buy => self.stop_loss < self.entry && self.entry < self.take_profit,
                Side::Sell => self.take_profit < self.entry && self.entry < self.stop_loss,
            }
    }
}

/// Signal scanner
pub trait SignalScanner: Send + Sync {
    fn name(&self) -> &str;

    /// Candles needed before `scan` can return anything
    fn min_candles(&self) -> usize;

    /// Look for a setup ending at the last candle
    fn scan(&self, symbol: &Symbol, candles: &[Candle]) -> Option<Setup>;
}

/// Build a scanner by name
pub fn create(name: &str, config: &ScannerConfig) -> Result<Box<dyn SignalScanner>> {
    match name {
        "fvg" => Ok(Box::new(FvgScanner::new(config.fvg.clone()))),
        "momentum" => Ok(Box::new(MomentumScanner::new(config.momentum.clone()))),
        other => bail!("Unknown scanner '{}'. Available: fvg, momentum", other),
    }
}

/// `scanner` section of the config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
    /// Candles requested per instrument each cycle
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default)]
    pub fvg: FvgConfig,
    #[serde(default)]
    pub momentum: MomentumConfig,
}

fn default_enabled() -> Vec<String> {
    vec!["fvg".to_string(), "momentum".to_string()]
}

fn default_lookback() -> usize {
    100
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            lookback: default_lookback(),
            fvg: FvgConfig::default(),
            momentum: MomentumConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn build(&self) -> Result<Vec<Box<dyn SignalScanner>>> {
        self.enabled.iter().map(|name| create(name, self)).collect()
    }
}

/// Highest-confidence setup any scanner finds
pub fn best_setup(
    scanners: &[Box<dyn SignalScanner>],
    symbol: &Symbol,
    candles: &[Candle],
) -> Option<Setup> {
    scanners
        .iter()
        .filter(|s| candles.len() >= s.min_candles())
        .filter_map(|s| s.scan(symbol, candles))
        .filter(Setup::is_well_formed)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup(side: Side, entry: f64, sl: f64, tp: f64) -> Setup {
        Setup {
            symbol: Symbol::new("EUR_USD"),
            side,
            entry,
            stop_loss: sl,
            take_profit: tp,
            confidence: 0.8,
            kind: "test".into(),
            strategy: "test".into(),
        }
    }

    #[test]
    fn test_risk_reward() {
        let s = setup(Side::Buy, 1.10, 1.09, 1.13);
        assert_relative_eq!(s.risk_reward(), 3.0, epsilon = 1e-9);
        assert!(s.is_well_formed());
        assert!(!setup(Side::Sell, 1.10, 1.09, 1.13).is_well_formed());
        assert_eq!(setup(Side::Buy, 1.10, 1.10, 1.13).risk_reward(), 0.0);
    }

    #[test]
    fn test_repriced_keeps_distances() {
        let s = setup(Side::Sell, 1.10, 1.11, 1.07).repriced(1.1020);
        assert_relative_eq!(s.stop_loss, 1.1120, epsilon = 1e-12);
        assert_relative_eq!(s.take_profit, 1.0720, epsilon = 1e-12);
        assert_relative_eq!(s.risk_reward(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_create_unknown_scanner() {
        let config = ScannerConfig::default();
        assert_eq!(config.build().unwrap().len(), 2);
        assert!(create("ichimoku", &config).is_err());
    }
}
