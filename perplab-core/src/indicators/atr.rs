//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|).
//! ATR is the Wilder-smoothed TR (alpha = 1/period, seed = mean of the first
//! `period` true ranges). TR[0] has no previous close and is excluded from the
//! seed, so the first valid ATR sits at index `period`.

use super::{last_finite, Indicator};
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// TR series. TR[0] = high - low.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; candles.len()];
    for (i, c) in candles.iter().enumerate() {
        tr[i] = if i == 0 {
            c.high - c.low
        } else {
            let pc = candles[i - 1].close;
            (c.high - c.low).max((c.high - pc).abs()).max((c.low - pc).abs())
        };
    }
    tr
}

/// Wilder smoothing. The seed is the mean of the first run of `period`
/// consecutive finite values; a NaN after the seed taints the rest.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let mut run = 0;
    let mut seed_end = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_finite() {
            run += 1;
            if run == period {
                seed_end = Some(i + 1);
                break;
            }
        } else {
            run = 0;
        }
    }
    let Some(seed_end) = seed_end else {
        return result;
    };

    let seed = values[seed_end - period..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let alpha = 1.0 / period as f64;
    let mut prev = seed;
    for i in seed_end..n {
        if !values[i].is_finite() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// ATR series with TR[0] masked.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut tr = true_range(candles);
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    wilder_smooth(&tr, period)
}

/// ATR at the last candle.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    last_finite(&atr_series(candles, period))
}

/// ATR as a fraction of the last close.
pub fn atr_percent(candles: &[Candle], period: usize) -> Option<f64> {
    let close = candles.last()?.close;
    if close <= 0.0 {
        return None;
    }
    atr(candles, period).map(|a| a / close)
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        atr_series(candles, self.period)
    }
}
