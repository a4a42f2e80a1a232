//! Cumulative volume delta approximated from bar shape.
//!
//! Buy volume = volume · close_location, sell volume = the rest, so the
//! per-bar delta is `volume · (2 · close_location - 1)`.

use crate::domain::Candle;

pub fn volume_delta(candle: &Candle) -> f64 {
    candle.volume * (2.0 * candle.close_location() - 1.0)
}

/// Running sum of per-bar deltas.
pub fn cvd_series(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .scan(0.0, |acc, c| {
            *acc += volume_delta(c);
            Some(*acc)
        })
        .collect()
}

/// CVD change over the last `lookback` bars divided by the volume traded in
/// them, in [-1, 1]. Positive = net buying.
pub fn cvd_slope(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let window = &candles[candles.len() - lookback..];
    let total: f64 = window.iter().map(|c| c.volume).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let delta: f64 = window.iter().map(volume_delta).sum();
    Some(delta / total)
}
