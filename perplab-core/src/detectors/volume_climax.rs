//! Volume climax fade.
//!
//! The candle before last is a climax: volume at least `volume_mult` times
//! normal and a range of at least `range_atr_mult` ATR. It must cap an
//! exhausted move (stretched RSI or a long same-colored run), and the last
//! candle must fail to extend it. The trade fades the climax.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{closes, Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, relative_volume, rsi_series};
use crate::patterns::count_consecutive_bars;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeClimaxConfig {
    pub timeframe: Timeframe,
    pub volume_lookback: usize,
    pub volume_mult: f64,
    pub range_atr_mult: f64,
    pub atr_period: usize,
    pub rsi_period: usize,
    pub rsi_high: f64,
    pub rsi_low: f64,
    pub require_exhaustion: bool,
    /// Same-colored bars, climax included, that count as exhaustion on their own.
    pub exhaustion_min_run: usize,
    pub stop_buffer_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for VolumeClimaxConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            volume_lookback: 20,
            volume_mult: 3.0,
            range_atr_mult: 2.0,
            atr_period: 14,
            rsi_period: 14,
            rsi_high: 75.0,
            rsi_low: 25.0,
            require_exhaustion: true,
            exhaustion_min_run: 4,
            stop_buffer_atr: 0.5,
            tp1_r: 1.5,
            tp2_r: 2.5,
            exit_plan: ExitPlan {
                tp1_fraction: 0.5,
                trail_atr_multiple: 1.5,
                time_stop_bars: 12,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeClimax {
    config: VolumeClimaxConfig,
}

impl VolumeClimax {
    pub fn new(config: VolumeClimaxConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for VolumeClimax {
    fn name(&self) -> &str {
        "volume_climax"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Reversal
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let candles = w.candles(c.timeframe);
        let n = candles.len();
        gate(n >= c.volume_lookback.max(c.atr_period + 1).max(c.rsi_period + 1) + 2, "insufficient_data")?;

        let upto_climax = &candles[..n - 1];
        let climax = &candles[n - 2];
        let confirm = &candles[n - 1];

        let rel_vol = relative_volume(upto_climax, c.volume_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(rel_vol >= c.volume_mult, "no_climax_volume")?;
        let climax_atr = atr(upto_climax, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        gate(climax.range() >= c.range_atr_mult * climax_atr, "climax_range")?;

        // A buying climax is faded short, a selling climax long.
        let (climax_dir, direction) = if climax.is_bullish() {
            (Direction::Long, Direction::Short)
        } else if climax.is_bearish() {
            (Direction::Short, Direction::Long)
        } else {
            return Err(NoSignal("no_climax"));
        };

        let rsi = rsi_series(&closes(upto_climax), c.rsi_period);
        let climax_rsi = rsi.last().copied().filter(|v| v.is_finite()).ok_or(INSUFFICIENT_DATA)?;
        let rsi_stretched = match climax_dir {
            Direction::Long => climax_rsi >= c.rsi_high,
            Direction::Short => climax_rsi <= c.rsi_low,
        };
        let run = count_consecutive_bars(upto_climax, climax_dir);
        let exhausted = rsi_stretched || run >= c.exhaustion_min_run;
        gate(exhausted || !c.require_exhaustion, "no_exhaustion")?;

        let contained = match climax_dir {
            Direction::Long => confirm.high <= climax.high && confirm.close < climax.close,
            Direction::Short => confirm.low >= climax.low && confirm.close > climax.close,
        };
        gate(contained, "climax_extended")?;

        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        let entry = w.current_price;
        let stop = match direction {
            Direction::Long => climax.low - c.stop_buffer_atr * atr,
            Direction::Short => climax.high + c.stop_buffer_atr * atr,
        };
        gate((entry - stop) * direction.sign() > 0.0, "stop_beyond_entry")?;

        let mut confidence = Confidence::base(50.0);
        confidence.bonus(rsi_stretched, 10.0);
        confidence.bonus(run >= c.exhaustion_min_run, 5.0);
        confidence.bonus(rel_vol >= 1.5 * c.volume_mult, 10.0);
        let wick_rejection = match climax_dir {
            Direction::Long => climax.upper_wick() >= climax.body() * 0.5,
            Direction::Short => climax.lower_wick() >= climax.body() * 0.5,
        };
        confidence.bonus(wick_rejection, 5.0);

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
        let signal = draft
            .finish(self.family(), self.name(), w, c.exit_plan)
            .with_diagnostic("climax_rel_volume", rel_vol)
            .with_diagnostic("climax_range_atr", climax.range() / climax_atr)
            .with_diagnostic("climax_rsi", climax_rsi)
            .with_diagnostic("exhaustion_run", run as f64);
        tracing::debug!(symbol = %w.symbol, %direction, rel_vol, climax_rsi, run, "volume climax detected");
        Ok(signal)
    }
}
