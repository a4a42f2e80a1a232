//! Volatility-compression breakout.
//!
//! Bollinger width sits in the bottom `width_percentile` of its own trailing
//! history for at least `min_compression_bars` bars; the compression bars form
//! a box, and the current close breaks it on expanded volume.

use serde::{Deserialize, Serialize};

use super::{gate, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, bollinger_width_series, percentile_rank, relative_volume, squeeze_series, SqueezeParams};
use crate::patterns::high_low;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeBreakoutConfig {
    pub timeframe: Timeframe,
    pub bb_period: usize,
    pub bb_k: f64,
    /// Trailing width history used for the percentile.
    pub width_history: usize,
    /// Width percentile (0..1) at or below which a bar counts as compressed.
    pub width_percentile: f64,
    pub min_compression_bars: usize,
    pub volume_lookback: usize,
    pub volume_mult: f64,
    pub atr_period: usize,
    /// Keltner squeeze adds confidence when it was on at the prior bar.
    pub squeeze: SqueezeParams,
    /// TP1 at this many box heights (at least one ATR) beyond entry.
    pub tp1_box_mult: f64,
    pub tp2_box_mult: f64,
    pub exit_plan: ExitPlan,
}

impl Default for SqueezeBreakoutConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            bb_period: 20,
            bb_k: 2.0,
            width_history: 100,
            width_percentile: 0.2,
            min_compression_bars: 6,
            volume_lookback: 20,
            volume_mult: 1.5,
            atr_period: 14,
            squeeze: SqueezeParams::default(),
            tp1_box_mult: 1.0,
            tp2_box_mult: 2.0,
            exit_plan: ExitPlan {
                tp1_fraction: 0.4,
                trail_atr_multiple: 2.0,
                time_stop_bars: 36,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqueezeBreakout {
    config: SqueezeBreakoutConfig,
}

impl SqueezeBreakout {
    pub fn new(config: SqueezeBreakoutConfig) -> Self {
        Self { config }
    }

    /// Bars (ending just before the last candle) whose width percentile is in the compression zone.
    fn compressed_run(&self, widths: &[f64]) -> usize {
        let c = &self.config;
        let n = widths.len();
        let mut run = 0;
        for i in (0..n.saturating_sub(1)).rev() {
            if i < c.width_history {
                break;
            }
            let history: Vec<f64> = widths[i - c.width_history..i]
                .iter()
                .copied()
                .filter(|w| w.is_finite())
                .collect();
            match percentile_rank(widths[i], &history) {
                Some(p) if p <= c.width_percentile => run += 1,
                _ => break,
            }
        }
        run
    }
}

impl SignalDetector for SqueezeBreakout {
    fn name(&self) -> &str {
        "squeeze_breakout"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::CycleRider
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let candles = w.candles(c.timeframe);
        gate(
            candles.len() > c.width_history + c.bb_period + c.min_compression_bars,
            "insufficient_data",
        )?;

        let widths = bollinger_width_series(candles, c.bb_period, c.bb_k);
        let run = self.compressed_run(&widths);
        gate(run >= c.min_compression_bars, "no_compression")?;

        let n = candles.len();
        let boxed = &candles[n - 1 - run..n - 1];
        let (box_high, box_low) = high_low(boxed).ok_or(INSUFFICIENT_DATA)?;
        let last = &candles[n - 1];
        let direction = if last.close > box_high {
            Direction::Long
        } else if last.close < box_low {
            Direction::Short
        } else {
            return Err(NoSignal("inside_box"));
        };

        let rel_vol = relative_volume(candles, c.volume_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(rel_vol >= c.volume_mult, "breakout_volume")?;
        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;

        let height = box_high - box_low;
        let entry = w.current_price;
        let d = direction.sign();
        let stop = (box_high + box_low) / 2.0;
        gate((entry - stop) * d > 0.0, "stop_beyond_entry")?;

        let keltner_squeeze = squeeze_series(candles, &c.squeeze)
            .get(n.saturating_sub(2))
            .copied()
            .unwrap_or(false);
        let mut confidence = Confidence::base(55.0);
        confidence.bonus(keltner_squeeze, 10.0);
        confidence.bonus(rel_vol >= 2.0 * c.volume_mult, 10.0);
        confidence.bonus(run >= 2 * c.min_compression_bars, 5.0);

        let draft = SignalDraft {
            direction,
            timeframe: c.timeframe,
            entry,
            stop,
            tp1: entry + d * height.max(atr) * c.tp1_box_mult,
            tp2: Some(entry + d * height.max(atr) * c.tp2_box_mult),
            atr,
            confidence,
        };
        let signal = draft
            .finish(self.family(), self.name(), w, c.exit_plan)
            .with_diagnostic("compression_bars", run as f64)
            .with_diagnostic("box_high", box_high)
            .with_diagnostic("box_low", box_low)
            .with_diagnostic("rel_volume", rel_vol);
        tracing::debug!(symbol = %w.symbol, %direction, run, rel_vol, "compression breakout detected");
        Ok(signal)
    }
}
