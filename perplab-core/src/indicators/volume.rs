//! Relative volume.

use crate::domain::Candle;

/// Last candle's volume divided by the mean volume of the `lookback` candles
/// before it.
pub fn relative_volume(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let n = candles.len();
    let base: f64 = candles[n - 1 - lookback..n - 1]
        .iter()
        .map(|c| c.volume)
        .sum::<f64>()
        / lookback as f64;
    if base <= 0.0 || !base.is_finite() {
        return None;
    }
    Some(candles[n - 1].volume / base)
}
