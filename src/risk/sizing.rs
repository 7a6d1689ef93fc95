//! Position sizing
//!
//! Fixed-fractional risk:
//! ```text
//! size = capital * risk_per_trade * loss_multiplier / (|entry - stop| * conversion)
//! ```
//! where `conversion` turns a quote-currency price move into account
//! currency (1 when the account is in the quote currency, 1/price when it is
//! in the base currency). The result is capped by the margin a single
//! position may use and rounded down to the venue's lot size.

use super::{Rejection, RiskConfig};
use crate::signals::Setup;
use crate::venues::InstrumentSpec;

pub fn validate_risk_reward(setup: &Setup, min: f64) -> Result<(), Rejection> {
    let ratio = setup.risk_reward();
    if ratio < min {
        return Err(Rejection::RiskReward { ratio, min });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: RiskConfig,
}

impl PositionSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Risk multiplier after a losing streak
    pub fn loss_multiplier(&self, consecutive_losses: usize) -> f64 {
        if self.config.consecutive_loss_limit > 0 && consecutive_losses >= self.config.consecutive_loss_limit {
            self.config.consecutive_loss_multiplier
        } else {
            1.0
        }
    }

    /// Fraction of capital one position of `strategy` may tie up as margin
    pub fn position_cap(&self, strategy: &str) -> f64 {
        let cap = self.config.max_position_pct;
        match self.config.strategy_position_caps.get(strategy) {
            Some(&strategy_cap) => cap.min(strategy_cap),
            None => cap,
        }
    }

    /// Quote-to-account conversion for a symbol at `price`
    pub fn conversion(&self, setup: &Setup) -> f64 {
        setup
            .symbol
            .quote_conversion(setup.entry, &self.config.account_currency)
            .unwrap_or_else(|| {
                tracing::warn!(
                    symbol = %setup.symbol,
                    "No direct conversion to {}, sizing with factor 1.0",
                    self.config.account_currency
                );
                1.0
            })
    }

    /// Venue-rounded size for `setup`
    pub fn size(
        &self,
        setup: &Setup,
        capital: f64,
        consecutive_losses: usize,
        spec: &InstrumentSpec,
    ) -> Result<f64, Rejection> {
        if capital <= 0.0 {
            return Err(Rejection::NoCapital);
        }

        let stop_distance = (setup.entry - setup.stop_loss).abs();
        if stop_distance <= 0.0 || !stop_distance.is_finite() {
            return Err(Rejection::SizeTooSmall(0.0));
        }
        if let Some(pip) = spec.pip_size {
            let pips = stop_distance / pip;
            if pips < self.config.min_stop_pips {
                return Err(Rejection::StopTooTight {
                    pips,
                    min: self.config.min_stop_pips,
                });
            }
        }

        let conversion = self.conversion(setup);
        let risk_amount = capital * self.config.risk_per_trade * self.loss_multiplier(consecutive_losses);
        let mut size = risk_amount / (stop_distance * conversion);

        let leverage = if spec.pip_size.is_some() {
            self.config.forex_leverage.max(1.0)
        } else {
            1.0
        };
        let max_notional = capital * self.position_cap(&setup.strategy) * leverage;
        let notional = size * setup.entry * conversion;
        if notional > max_notional {
            tracing::debug!(
                symbol = %setup.symbol,
                "Position capped: notional {:.2} > {:.2}",
                notional,
                max_notional
            );
            size = max_notional / (setup.entry * conversion);
        }

        spec.round_size_f64(size).ok_or(Rejection::SizeTooSmall(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Symbol};
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn setup(symbol: &str, entry: f64, sl: f64, tp: f64, strategy: &str) -> Setup {
        Setup {
            symbol: Symbol::new(symbol),
            side: if sl < entry { Side::Buy } else { Side::Sell },
            entry,
            stop_loss: sl,
            take_profit: tp,
            confidence: 0.8,
            kind: "test".into(),
            strategy: strategy.into(),
        }
    }

    fn btc_spec() -> InstrumentSpec {
        InstrumentSpec {
            symbol: Symbol::new("BTC-USD"),
            size_increment: dec!(0.00000001),
            min_size: dec!(0.00001),
            price_increment: dec!(0.01),
            pip_size: None,
        }
    }

    #[test]
    fn test_forex_units() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("EUR_USD", 1.1000, 1.0980, 1.1060, "fvg");
        // 3000 * 1% / 0.0020 = 15000 units, floored to whole units
        let size = sizer.size(&s, 3000.0, 0, &InstrumentSpec::forex(&s.symbol)).unwrap();
        assert!((size - 15000.0).abs() <= 1.0, "{}", size);
        assert_eq!(size.fract(), 0.0);
    }

    #[test]
    fn test_jpy_quote_converted() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("USD_JPY", 150.00, 149.70, 150.90, "fvg");
        // 30 USD risk over 0.30 JPY per unit at 1/150: 30 / (0.30 / 150) = 15000
        let size = sizer.size(&s, 3000.0, 0, &InstrumentSpec::forex(&s.symbol)).unwrap();
        assert!((size - 15000.0).abs() <= 1.0, "{}", size);
    }

    #[test]
    fn test_tight_forex_stop_rejected() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("EUR_USD", 1.1000, 1.0997, 1.1010, "fvg");
        assert!(matches!(
            sizer.size(&s, 3000.0, 0, &InstrumentSpec::forex(&s.symbol)),
            Err(Rejection::StopTooTight { .. })
        ));
    }

    #[test]
    fn test_momentum_cap() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("BTC-USD", 50_000.0, 49_000.0, 54_000.0, "momentum");
        // uncapped: 30 / 1000 = 0.03 BTC = 1500 USD; 5% cap is 150 USD
        let size = sizer.size(&s, 3000.0, 0, &btc_spec()).unwrap();
        assert_relative_eq!(size, 0.003, epsilon = 1e-9);
    }

    #[test]
    fn test_losing_streak_reduces_risk() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("EUR_USD", 1.1000, 1.0980, 1.1060, "fvg");
        let spec = InstrumentSpec::forex(&s.symbol);
        let normal = sizer.size(&s, 3000.0, 2, &spec).unwrap();
        let reduced = sizer.size(&s, 3000.0, 3, &spec).unwrap();
        assert!((reduced - normal * 0.75).abs() <= 1.0);
    }

    #[test]
    fn test_rejections() {
        let sizer = PositionSizer::new(RiskConfig::default());
        let s = setup("BTC-USD", 50_000.0, 49_000.0, 54_000.0, "fvg");
        assert_eq!(sizer.size(&s, 0.0, 0, &btc_spec()), Err(Rejection::NoCapital));

        let poor = setup("EUR_USD", 1.1000, 1.0980, 1.1020, "fvg");
        assert!(validate_risk_reward(&poor, 1.5).is_err());
        assert!(validate_risk_reward(&s, 1.5).is_ok());
    }
}
