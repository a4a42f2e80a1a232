//! Relative Strength Index (RSI), Wilder-smoothed.
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss).
//! avg_loss == 0 → 100; avg_gain == 0 → 0; both zero → 50.

use super::{last_finite, Indicator};
use crate::domain::{closes, Candle};

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain == 0.0, avg_loss == 0.0) {
        (true, true) => 50.0,
        (_, true) => 100.0,
        (true, _) => 0.0,
        _ => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    }
}

/// RSI of a value series. First valid value at index `period`.
pub fn rsi_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = values[i] - values[i - 1];
        if !ch.is_finite() {
            return result;
        }
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let ch = values[i] - values[i - 1];
        if !ch.is_finite() {
            return result;
        }
        let (gain, loss) = if ch > 0.0 { (ch, 0.0) } else { (0.0, -ch) };
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

/// RSI of closes at the last candle.
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    last_finite(&rsi_series(&closes(candles), period))
}

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        rsi_series(&closes(candles), self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn all_gains_is_100() {
        let candles = make_candles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_approx(rsi(&candles, 3).unwrap(), 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn all_losses_is_0() {
        let candles = make_candles(&[5.0, 4.0, 3.0, 2.0, 1.0]);
        assert_approx(rsi(&candles, 3).unwrap(), 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn flat_is_50() {
        let candles = make_candles(&[5.0; 6]);
        assert_approx(rsi(&candles, 3).unwrap(), 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn wilder_update() {
        // changes: +2, -1, +1, -2
        let s = rsi_series(&[10.0, 12.0, 11.0, 12.0, 10.0], 3);
        // seed: gain = 3/3 = 1, loss = 1/3
        assert_approx(s[3], 100.0 - 100.0 / (1.0 + 3.0), DEFAULT_EPSILON);
        // next: gain = 2/3, loss = (2 + 2/3)/3 = 8/9
        let rs: f64 = (2.0 / 3.0) / (8.0 / 9.0);
        assert_approx(s[4], 100.0 - 100.0 / (1.0 + rs), DEFAULT_EPSILON);
    }

    #[test]
    fn sentinel_on_short_window() {
        assert_eq!(rsi(&make_candles(&[1.0, 2.0, 3.0]), 3), None);
    }
}
