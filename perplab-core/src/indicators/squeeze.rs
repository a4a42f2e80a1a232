//! Volatility squeeze: Bollinger Bands strictly inside the Keltner Channel.

use serde::{Deserialize, Serialize};

use super::bollinger::bollinger_series;
use super::keltner::keltner_series;
use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeParams {
    pub bb_period: usize,
    pub bb_k: f64,
    pub kc_ema_period: usize,
    pub kc_atr_period: usize,
    pub kc_multiplier: f64,
}

impl Default for SqueezeParams {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_k: 2.0,
            kc_ema_period: 20,
            kc_atr_period: 20,
            kc_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqueezeState {
    pub in_squeeze: bool,
    /// Trailing run of squeezed bars ending at the last candle (0 if not squeezed).
    pub consecutive_bars: usize,
    /// The previous bar was squeezed and the last one is not.
    pub just_released: bool,
}

/// Squeeze flag per candle; warmup bars are `false`.
pub fn squeeze_series(candles: &[Candle], params: &SqueezeParams) -> Vec<bool> {
    let bb = bollinger_series(candles, params.bb_period, params.bb_k);
    let kc = keltner_series(
        candles,
        params.kc_ema_period,
        params.kc_atr_period,
        params.kc_multiplier,
    );
    bb.iter()
        .zip(kc.iter())
        .map(|(b, k)| match (b, k) {
            (Some(b), Some(k)) => b.upper < k.upper && b.lower > k.lower,
            _ => false,
        })
        .collect()
}

pub fn squeeze(candles: &[Candle], params: &SqueezeParams) -> Option<SqueezeState> {
    let warmup = params
        .bb_period
        .max(params.kc_ema_period)
        .max(params.kc_atr_period);
    if candles.len() < warmup + 1 {
        return None;
    }
    let flags = squeeze_series(candles, params);
    let consecutive_bars = flags.iter().rev().take_while(|&&f| f).count();
    let in_squeeze = consecutive_bars > 0;
    let prev = flags.len().checked_sub(2).map(|i| flags[i]).unwrap_or(false);
    Some(SqueezeState {
        in_squeeze,
        consecutive_bars,
        just_released: prev && !in_squeeze,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_ohlc;

    fn params() -> SqueezeParams {
        SqueezeParams {
            bb_period: 5,
            bb_k: 2.0,
            kc_ema_period: 5,
            kc_atr_period: 5,
            kc_multiplier: 1.5,
        }
    }

    #[test]
    fn flat_closes_with_wide_bars_are_squeezed() {
        // Closes never move (BB width 0) while ranges stay wide (ATR 2).
        let candles = make_ohlc(&[(100.0, 101.0, 99.0, 100.0); 12]);
        let s = squeeze(&candles, &params()).unwrap();
        assert!(s.in_squeeze);
        assert_eq!(s.consecutive_bars, 7);
        assert!(!s.just_released);
    }

    #[test]
    fn large_close_swings_break_the_squeeze() {
        let mut data = vec![(100.0, 101.0, 99.0, 100.0); 10];
        data.push((100.0, 121.0, 99.0, 120.0));
        let candles = make_ohlc(&data);
        let s = squeeze(&candles, &params()).unwrap();
        assert!(!s.in_squeeze);
        assert!(s.just_released);
    }

    #[test]
    fn sentinel_on_short_window() {
        let candles = make_ohlc(&[(100.0, 101.0, 99.0, 100.0); 5]);
        assert!(squeeze(&candles, &params()).is_none());
    }
}
