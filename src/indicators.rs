//! Technical indicators
//!
//! Thin wrappers around the `ta` crate. Every function returns one value per
//! input, `None` during the warmup period.

use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex, SimpleMovingAverage};
use ta::Next;

use crate::types::Candle;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let v = indicator.next(value);
            (i + 1 >= period).then_some(v)
        })
        .collect()
}

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let v = indicator.next(value);
            (i + 1 >= period).then_some(v)
        })
        .collect()
}

/// Calculate Relative Strength Index
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    // first value is only a seed; RSI needs `period` price changes
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let v = indicator.next(value);
            (i >= period).then_some(v)
        })
        .collect()
}

pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let hc = (high[i] - close[i - 1]).abs();
                let lc = (low[i] - close[i - 1]).abs();
                hl.max(hc).max(lc)
            }
        })
        .collect()
}

/// Average True Range with Wilder's smoothing
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(tr.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            atr_value = Some(tr[..period].iter().sum::<f64>() / period as f64);
            result.push(atr_value);
        } else {
            atr_value = atr_value.map(|prev| (prev * (period - 1) as f64 + tr[i]) / period as f64);
            result.push(atr_value);
        }
    }

    result
}

/// Last value of an indicator series, if warmed up
pub fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Latest RSI over candle closes
pub fn last_rsi(candles: &[Candle], period: usize) -> Option<f64> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    last(&rsi(&closes, period))
}

/// Latest EMA over candle closes
pub fn last_ema(candles: &[Candle], period: usize) -> Option<f64> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    last(&ema(&closes, period))
}

/// Latest ATR over candles
pub fn last_atr(candles: &[Candle], period: usize) -> Option<f64> {
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    last(&atr(&high, &low, &close, period))
}

/// Mean volume of the `period` candles before the last one
pub fn average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - 1 - period..candles.len() - 1];
    Some(window.iter().map(|c| c.volume).sum::<f64>() / period as f64)
}

/// (swing high, swing low) over the last `lookback` candles
pub fn swing_range(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || candles.len() < lookback {
        return None;
    }
    let window = &candles[candles.len() - lookback..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

/// Retracement level `ratio` of a swing, measured down from the high
pub fn retracement(high: f64, low: f64, ratio: f64) -> f64 {
    high - (high - low) * ratio
}
