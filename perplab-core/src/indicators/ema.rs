//! Exponential and simple moving averages.
//!
//! EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: EMA[period-1] = SMA of the first `period` values.

use super::{last_finite, Indicator};
use crate::domain::{closes, Candle};

/// EMA of an arbitrary value series. NaN taints everything after it.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    let seed_window = &values[..period];
    if seed_window.iter().any(|v| !v.is_finite()) {
        return result;
    }
    let seed = seed_window.iter().sum::<f64>() / period as f64;
    result[period - 1] = seed;

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..n {
        if !values[i].is_finite() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// Rolling simple mean over `period` values.
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            result[i] = window.iter().sum::<f64>() / period as f64;
        }
    }
    result
}

/// EMA of closes at the last candle.
pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    last_finite(&ema_series(&closes(candles), period))
}

/// SMA of closes at the last candle.
pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    last_finite(&sma_series(&closes(candles), period))
}

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        ema_series(&closes(candles), self.period)
    }
}

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        sma_series(&closes(candles), self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn ema_seeded_by_sma() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let e = ema_series(&values, 3);
        assert!(e[0].is_nan() && e[1].is_nan());
        assert_approx(e[2], 2.0, DEFAULT_EPSILON);
        // alpha = 0.5
        assert_approx(e[3], 3.0, DEFAULT_EPSILON);
        assert_approx(e[4], 4.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_rolling() {
        let s = sma_series(&[2.0, 4.0, 6.0, 8.0], 2);
        assert!(s[0].is_nan());
        assert_approx(s[1], 3.0, DEFAULT_EPSILON);
        assert_approx(s[3], 7.0, DEFAULT_EPSILON);
    }

    #[test]
    fn point_functions_need_period_plus_one() {
        let candles = make_candles(&[10.0, 11.0, 12.0]);
        assert_eq!(ema(&candles, 3), None);
        assert_eq!(sma(&candles, 3), None);
        let candles = make_candles(&[10.0, 11.0, 12.0, 13.0]);
        assert_approx(sma(&candles, 3).unwrap(), 12.0, DEFAULT_EPSILON);
        assert!(ema(&candles, 3).is_some());
    }

    #[test]
    fn nan_taints_tail() {
        let e = ema_series(&[1.0, 1.0, f64::NAN, 1.0], 2);
        assert_approx(e[1], 1.0, DEFAULT_EPSILON);
        assert!(e[2].is_nan() && e[3].is_nan());
    }

    #[test]
    fn indicator_names() {
        assert_eq!(Ema::new(20).name(), "ema_20");
        assert_eq!(Sma::new(50).name(), "sma_50");
    }
}
