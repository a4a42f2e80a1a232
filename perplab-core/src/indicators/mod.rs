//! Indicator library.
//!
//! Pure numeric functions over a candle window. Two shapes are exposed:
//! - series functions / `Indicator::compute`, returning a `Vec<f64>` aligned with
//!   the input and padded with `f64::NAN` during warmup;
//! - point functions (`atr`, `rsi`, `adx`, ...) returning the value at the last
//!   candle, or `None` when the window is shorter than `period + 1`.
//!
//! Nothing here panics on short or degenerate input.
//!
//! # Look-ahead contamination guard
//! No value at index t may depend on candles after t. `tests/lookahead_test.rs`
//! checks every series function on truncated vs. full windows.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod cvd;
pub mod ema;
pub mod keltner;
pub mod rsi;
pub mod squeeze;
pub mod stats;
pub mod swing;
pub mod volume;

pub use adx::{adx, adx_series, Adx, AdxMode, AdxReading};
pub use atr::{atr, atr_percent, atr_series, true_range, wilder_smooth, Atr};
pub use bollinger::{bollinger, bollinger_series, bollinger_width_series, BollingerBands};
pub use cvd::{cvd_series, cvd_slope, volume_delta};
pub use ema::{ema, ema_series, sma, sma_series, Ema, Sma};
pub use keltner::{keltner, keltner_series, KeltnerChannel};
pub use rsi::{rsi, rsi_series, Rsi};
pub use squeeze::{squeeze, squeeze_series, SqueezeParams, SqueezeState};
pub use stats::{beta, mean, pct_return, percentile_rank, population_std, returns, z_score};
pub use swing::{find_swings, last_two, SwingKind, SwingPoint};
pub use volume::relative_volume;

use crate::domain::Candle;

/// A named series indicator.
///
/// Output has the same length as the input; the first `lookback()` values are NaN.
pub trait Indicator: Send + Sync {
    /// e.g. "ema_20", "atr_14".
    fn name(&self) -> &str;

    /// Candles consumed before the first valid output.
    fn lookback(&self) -> usize;

    fn compute(&self, candles: &[Candle]) -> Vec<f64>;

    /// Value at the last candle, `None` during warmup or on NaN.
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.lookback() + 1 {
            return None;
        }
        last_finite(&self.compute(candles))
    }
}

/// Last element of a series if it is finite.
pub fn last_finite(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

/// Element `back` positions from the end (0 = last), if finite.
pub fn finite_back(series: &[f64], back: usize) -> Option<f64> {
    let idx = series.len().checked_sub(back + 1)?;
    series.get(idx).copied().filter(|v| v.is_finite())
}

/// Synthetic candles from close prices for testing.
///
/// open = prev close (or close for the first), high/low = body ± 1.0,
/// volume = 1000, 15-minute bars starting 2024-01-01.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    let data: Vec<(f64, f64, f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            (open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect();
    make_ohlc(&data)
}

/// Synthetic candles from (open, high, low, close) tuples, volume 1000.
#[cfg(test)]
pub fn make_ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    use crate::domain::Timeframe;
    use chrono::TimeZone;

    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| {
            let open_time = base + Timeframe::M15.duration() * i as i32;
            Candle {
                symbol: "TEST".to_string(),
                timeframe: Timeframe::M15,
                open_time,
                close_time: open_time + Timeframe::M15.duration(),
                open,
                high,
                low,
                close,
                volume: 1000.0,
                trade_count: None,
            }
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
