//! Funding-extreme reversal.
//!
//! An extreme funding rate (by absolute level or Z-score against the settled
//! history, or a recent extreme remembered by the overlay) marks a crowded
//! side. Once the crowd's momentum slows and price sits near the swing
//! extreme, fade the crowd. A Z-score at or beyond `extreme_z_bypass` waives
//! the reversal-zone requirement. RSI must still show the stretch.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, rsi, z_score};
use crate::patterns::{detect_reversal_pattern, high_low};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingExtremeConfig {
    pub timeframe: Timeframe,
    pub abs_threshold: f64,
    pub z_threshold: f64,
    /// Settled rates required before a Z-score is trusted.
    pub history_min: usize,
    pub extreme_z_bypass: f64,
    /// Accept the overlay's cached extreme when the live rate has normalized.
    pub use_cache: bool,
    pub momentum_lookback: usize,
    pub swing_lookback: usize,
    pub zone_atr: f64,
    pub rsi_period: usize,
    /// Shorts need RSI at or above this; longs at or below `rsi_long_max`.
    pub rsi_short_min: f64,
    pub rsi_long_max: f64,
    pub atr_period: usize,
    pub stop_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for FundingExtremeConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            abs_threshold: 0.001,
            z_threshold: 2.5,
            history_min: 30,
            extreme_z_bypass: 10.0,
            use_cache: true,
            momentum_lookback: 3,
            swing_lookback: 24,
            zone_atr: 1.0,
            rsi_period: 14,
            rsi_short_min: 50.0,
            rsi_long_max: 50.0,
            atr_period: 14,
            stop_atr: 1.5,
            tp1_r: 1.5,
            tp2_r: 3.0,
            exit_plan: ExitPlan {
                tp1_fraction: 0.5,
                trail_atr_multiple: 2.0,
                time_stop_bars: 24,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FundingExtremeReversal {
    config: FundingExtremeConfig,
}

impl FundingExtremeReversal {
    pub fn new(config: FundingExtremeConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for FundingExtremeReversal {
    fn name(&self) -> &str {
        "funding_extreme"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::HourSwing
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let rate = w.funding_rate.ok_or(NoSignal("no_funding"))?;
        let z = if w.funding_history.len() >= c.history_min {
            z_score(rate, &w.funding_history)
        } else {
            None
        };

        let live_extreme = rate.abs() >= c.abs_threshold || z.is_some_and(|z| z.abs() >= c.z_threshold);
        let (crowd_positive, z, from_cache) = if live_extreme {
            (rate > 0.0, z, false)
        } else {
            let cached = w
                .funding_extreme
                .filter(|_| c.use_cache)
                .ok_or(NoSignal("funding_not_extreme"))?;
            (cached.is_positive(), Some(cached.z_score), true)
        };
        // Positive funding: longs are paying, so the crowd is long and we fade it.
        let direction = if crowd_positive { Direction::Short } else { Direction::Long };
        let crowd = direction.opposite().sign();

        let candles = w.candles(c.timeframe);
        let k = c.momentum_lookback;
        gate(k > 0 && candles.len() > 2 * k, "insufficient_data")?;
        let n = candles.len();
        let recent = candles[n - 1].close - candles[n - 1 - k].close;
        let prior = candles[n - 1 - k].close - candles[n - 1 - 2 * k].close;
        gate(recent * crowd < prior * crowd, "momentum_not_slowing")?;

        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        let swing = &candles[n.saturating_sub(c.swing_lookback)..];
        let (swing_high, swing_low) = high_low(swing).ok_or(INSUFFICIENT_DATA)?;
        let entry = w.current_price;
        let distance = match direction {
            Direction::Short => swing_high - entry,
            Direction::Long => entry - swing_low,
        };
        let in_zone = distance <= c.zone_atr * atr;
        let bypass = z.is_some_and(|z| z.abs() >= c.extreme_z_bypass);
        gate(in_zone || bypass, "not_in_reversal_zone")?;

        let rsi = rsi(candles, c.rsi_period).ok_or(INSUFFICIENT_DATA)?;
        let confirmed = match direction {
            Direction::Short => rsi >= c.rsi_short_min,
            Direction::Long => rsi <= c.rsi_long_max,
        };
        gate(confirmed, "rsi_unconfirmed")?;

        let stop = entry - direction.sign() * c.stop_atr * atr;

        let mut confidence = Confidence::base(55.0);
        confidence.bonus(z.is_some_and(|z| z.abs() >= c.z_threshold), 10.0);
        confidence.bonus(rate.abs() >= 2.0 * c.abs_threshold, 10.0);
        let pattern = detect_reversal_pattern(candles);
        confidence.bonus(pattern.map(|p| p.direction) == Some(direction), 5.0);

        let draft = SignalDraft {
            direction,
            timeframe: c.timeframe,
            entry,
            stop,
            tp1: r_target(entry, stop, direction, c.tp1_r),
            tp2: Some(r_target(entry, stop, direction, c.tp2_r)),
            atr,
            confidence,
        };
        let mut signal = draft
            .finish(self.family(), self.name(), w, c.exit_plan)
            .with_diagnostic("funding_rate", rate)
            .with_diagnostic("swing_distance_atr", distance / atr)
            .with_diagnostic("rsi", rsi);
        if let Some(z) = z {
            signal = signal.with_diagnostic("funding_zscore", z);
        }
        if from_cache {
            signal = signal.with_diagnostic("from_cache", 1.0);
        }
        if bypass && !in_zone {
            signal = signal.with_diagnostic("extreme_zscore_bypass", 1.0);
        }
        tracing::debug!(symbol = %w.symbol, %direction, rate, ?z, from_cache, "funding extreme reversal");
        Ok(signal)
    }
}
