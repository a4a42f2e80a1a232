//! Keltner Channel — EMA(close) ± multiplier · ATR.

use serde::{Deserialize, Serialize};

use super::atr::atr_series;
use super::ema::ema_series;
use crate::domain::{closes, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeltnerChannel {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Channel at every index (None during warmup).
pub fn keltner_series(
    candles: &[Candle],
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
) -> Vec<Option<KeltnerChannel>> {
    let mid = ema_series(&closes(candles), ema_period);
    let atr = atr_series(candles, atr_period);
    mid.iter()
        .zip(atr.iter())
        .map(|(&m, &a)| {
            if m.is_finite() && a.is_finite() {
                Some(KeltnerChannel {
                    upper: m + multiplier * a,
                    middle: m,
                    lower: m - multiplier * a,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Channel at the last candle.
pub fn keltner(
    candles: &[Candle],
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
) -> Option<KeltnerChannel> {
    if candles.len() < ema_period.max(atr_period) + 1 {
        return None;
    }
    keltner_series(candles, ema_period, atr_period, multiplier)
        .last()
        .copied()
        .flatten()
}
