//! Regime classification and the counter-trend filter.

use serde::{Deserialize, Serialize};

use crate::domain::{closes, Candle, Direction, Regime, Timeframe};
use crate::indicators::{adx, ema_series, AdxMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub timeframe: Timeframe,
    pub ema_period: usize,
    pub slope_lookback: usize,
    /// EMA slope (fractional change over `slope_lookback`) below which the market is sideways.
    pub flat_slope: f64,
    pub adx_period: usize,
    pub adx_mode: AdxMode,
    /// ADX at or above this makes a trend "strong".
    pub strong_adx: f64,
    pub block_strong_counter_trend: bool,
    pub block_weak_counter_trend: bool,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H4,
            ema_period: 50,
            slope_lookback: 10,
            flat_slope: 0.005,
            adx_period: 14,
            adx_mode: AdxMode::SingleBarDx,
            strong_adx: 25.0,
            block_strong_counter_trend: true,
            block_weak_counter_trend: false,
        }
    }
}

/// Classify the regime at the last candle; `None` while indicators warm up.
pub fn classify_regime(candles: &[Candle], config: &RegimeConfig) -> Option<Regime> {
    let ema = ema_series(&closes(candles), config.ema_period);
    let n = ema.len();
    if n <= config.slope_lookback {
        return None;
    }
    let now = ema[n - 1];
    let then = ema[n - 1 - config.slope_lookback];
    if !now.is_finite() || !then.is_finite() || then <= 0.0 {
        return None;
    }
    let slope = now / then - 1.0;
    if slope.abs() < config.flat_slope {
        return Some(Regime::Sideways);
    }
    let strong = adx(candles, config.adx_period, config.adx_mode)?.adx >= config.strong_adx;
    Some(match (slope > 0.0, strong) {
        (true, true) => Regime::StrongUptrend,
        (true, false) => Regime::WeakUptrend,
        (false, true) => Regime::StrongDowntrend,
        (false, false) => Regime::WeakDowntrend,
    })
}

/// Whether `direction` may be entered in `regime`. An unknown regime allows.
pub fn regime_allows(regime: Option<Regime>, direction: Direction, config: &RegimeConfig) -> bool {
    let Some(regime) = regime else {
        return true;
    };
    match (regime, direction) {
        (Regime::StrongDowntrend, Direction::Long) | (Regime::StrongUptrend, Direction::Short) => {
            !config.block_strong_counter_trend
        }
        (Regime::WeakDowntrend, Direction::Long) | (Regime::WeakUptrend, Direction::Short) => {
            !config.block_weak_counter_trend
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{make_candles, make_ohlc};

    fn config() -> RegimeConfig {
        RegimeConfig {
            ema_period: 5,
            slope_lookback: 3,
            adx_period: 5,
            ..RegimeConfig::default()
        }
    }

    #[test]
    fn steady_rally_is_strong_uptrend() {
        let data: Vec<_> = (0..30)
            .map(|i| {
                let c = 100.0 + 2.0 * i as f64;
                (c - 2.0, c + 0.5, c - 2.5, c)
            })
            .collect();
        assert_eq!(classify_regime(&make_ohlc(&data), &config()), Some(Regime::StrongUptrend));
    }

    #[test]
    fn flat_market_is_sideways() {
        let candles = make_candles(&[100.0; 30]);
        assert_eq!(classify_regime(&candles, &config()), Some(Regime::Sideways));
    }

    #[test]
    fn short_history_is_unknown() {
        assert_eq!(classify_regime(&make_candles(&[100.0; 4]), &config()), None);
    }

    #[test]
    fn counter_trend_tiers() {
        let cfg = RegimeConfig::default();
        assert!(!regime_allows(Some(Regime::StrongDowntrend), Direction::Long, &cfg));
        assert!(regime_allows(Some(Regime::WeakDowntrend), Direction::Long, &cfg));
        assert!(regime_allows(Some(Regime::StrongDowntrend), Direction::Short, &cfg));
        assert!(regime_allows(None, Direction::Long, &cfg));

        let strict = RegimeConfig {
            block_weak_counter_trend: true,
            ..cfg
        };
        assert!(!regime_allows(Some(Regime::WeakUptrend), Direction::Short, &strict));
        assert!(regime_allows(Some(Regime::Sideways), Direction::Short, &strict));
    }
}
