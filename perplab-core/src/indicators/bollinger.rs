//! Bollinger Bands — SMA ± k · population stddev over the trailing window.

use serde::{Deserialize, Serialize};

use super::stats::{mean, population_std};
use crate::domain::{closes, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle.
    pub width: f64,
}

fn bands_of(window: &[f64], k: f64) -> Option<BollingerBands> {
    let middle = mean(window)?;
    let sd = population_std(window)?;
    let upper = middle + k * sd;
    let lower = middle - k * sd;
    let width = if middle != 0.0 {
        (upper - lower) / middle
    } else {
        0.0
    };
    Some(BollingerBands {
        upper,
        middle,
        lower,
        width,
    })
}

/// Bands at the last candle.
pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> Option<BollingerBands> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let c = closes(candles);
    bands_of(&c[c.len() - period..], k)
}

/// Bands at every index (None during warmup).
pub fn bollinger_series(candles: &[Candle], period: usize, k: f64) -> Vec<Option<BollingerBands>> {
    let c = closes(candles);
    (0..c.len())
        .map(|i| {
            if period == 0 || i + 1 < period {
                None
            } else {
                bands_of(&c[i + 1 - period..=i], k)
            }
        })
        .collect()
}

/// Band width at every index, NaN during warmup.
pub fn bollinger_width_series(candles: &[Candle], period: usize, k: f64) -> Vec<f64> {
    bollinger_series(candles, period, k)
        .into_iter()
        .map(|b| b.map_or(f64::NAN, |b| b.width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn population_stddev_bands() {
        // last 4 closes: 2, 4, 4, 4 → mean 3.5, pop var = (2.25+0.25*3)/4 = 0.75
        let candles = make_candles(&[9.0, 2.0, 4.0, 4.0, 4.0]);
        let b = bollinger(&candles, 4, 2.0).unwrap();
        let sd = 0.75f64.sqrt();
        assert_approx(b.middle, 3.5, DEFAULT_EPSILON);
        assert_approx(b.upper, 3.5 + 2.0 * sd, DEFAULT_EPSILON);
        assert_approx(b.lower, 3.5 - 2.0 * sd, DEFAULT_EPSILON);
        assert_approx(b.width, 4.0 * sd / 3.5, DEFAULT_EPSILON);
    }

    #[test]
    fn flat_prices_have_zero_width() {
        let candles = make_candles(&[10.0; 25]);
        let b = bollinger(&candles, 20, 2.0).unwrap();
        assert_approx(b.width, 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn width_series_warmup() {
        let candles = make_candles(&[1.0, 2.0, 3.0, 4.0]);
        let w = bollinger_width_series(&candles, 3, 2.0);
        assert!(w[0].is_nan() && w[1].is_nan());
        assert!(w[2].is_finite());
    }

    #[test]
    fn sentinel_on_short_window() {
        assert!(bollinger(&make_candles(&[1.0, 2.0]), 2, 2.0).is_none());
    }
}
