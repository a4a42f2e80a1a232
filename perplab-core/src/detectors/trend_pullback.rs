//! Trend pullback / breakout.
//!
//! Higher timeframe: close > EMA(fast) > EMA(slow) (mirrored for shorts) and
//! ADX at or above `min_adx`. Lower timeframe: either a shallow pullback whose
//! extreme tags the LTF EMA, or a close through the prior range high/low on
//! expanded volume.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{adx, atr, ema, relative_volume, AdxMode};
use crate::patterns::{detect_reversal_pattern, high_low, is_pullback, trend_strength, PullbackParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendPullbackConfig {
    pub htf: Timeframe,
    pub ltf: Timeframe,
    pub htf_ema_fast: usize,
    pub htf_ema_slow: usize,
    pub adx_period: usize,
    pub adx_mode: AdxMode,
    pub min_adx: f64,
    pub ltf_ema: usize,
    pub atr_period: usize,
    pub pullback: PullbackParams,
    /// Max distance, in ATR, between the pullback extreme and the LTF EMA.
    pub ema_touch_atr: f64,
    pub breakout_lookback: usize,
    pub volume_lookback: usize,
    pub breakout_volume_mult: f64,
    pub stop_buffer_atr: f64,
    pub breakout_stop_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for TrendPullbackConfig {
    fn default() -> Self {
        Self {
            htf: Timeframe::H4,
            ltf: Timeframe::M15,
            htf_ema_fast: 20,
            htf_ema_slow: 50,
            adx_period: 14,
            adx_mode: AdxMode::SingleBarDx,
            min_adx: 25.0,
            ltf_ema: 20,
            atr_period: 14,
            pullback: PullbackParams::default(),
            ema_touch_atr: 1.0,
            breakout_lookback: 20,
            volume_lookback: 20,
            breakout_volume_mult: 1.5,
            stop_buffer_atr: 0.5,
            breakout_stop_atr: 1.5,
            tp1_r: 1.5,
            tp2_r: 3.0,
            exit_plan: ExitPlan::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendPullback {
    config: TrendPullbackConfig,
}

impl TrendPullback {
    pub fn new(config: TrendPullbackConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for TrendPullback {
    fn name(&self) -> &str {
        "trend_pullback"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::TrendRider
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let htf = w.candles(c.htf);
        let ltf = w.candles(c.ltf);

        let htf_close = htf.last().ok_or(INSUFFICIENT_DATA)?.close;
        let fast = ema(htf, c.htf_ema_fast).ok_or(INSUFFICIENT_DATA)?;
        let slow = ema(htf, c.htf_ema_slow).ok_or(INSUFFICIENT_DATA)?;
        let direction = if htf_close > fast && fast > slow {
            Direction::Long
        } else if htf_close < fast && fast < slow {
            Direction::Short
        } else {
            return Err(NoSignal("no_htf_trend"));
        };
        let reading = adx(htf, c.adx_period, c.adx_mode).ok_or(INSUFFICIENT_DATA)?;
        gate(reading.adx >= c.min_adx, "adx_below_min")?;

        let atr = atr(ltf, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        let ltf_ema = ema(ltf, c.ltf_ema).ok_or(INSUFFICIENT_DATA)?;
        let entry = w.current_price;
        let d = direction.sign();

        let (strategy, stop, mut confidence) = if is_pullback(ltf, direction, atr, &c.pullback) {
            let (hi, lo) = high_low(&ltf[ltf.len() - 3..]).ok_or(INSUFFICIENT_DATA)?;
            let extreme = if direction == Direction::Long { lo } else { hi };
            gate((extreme - ltf_ema).abs() <= c.ema_touch_atr * atr, "pullback_off_ema")?;
            let stop = extreme - d * c.stop_buffer_atr * atr;
            let mut conf = Confidence::base(55.0);
            let pattern = detect_reversal_pattern(ltf);
            conf.bonus(pattern.map(|p| p.direction) == Some(direction), 10.0);
            ("trend_pullback", stop, conf)
        } else {
            gate(ltf.len() > c.breakout_lookback, "insufficient_data")?;
            let prior = &ltf[ltf.len() - 1 - c.breakout_lookback..ltf.len() - 1];
            let (hi, lo) = high_low(prior).ok_or(INSUFFICIENT_DATA)?;
            let last_close = ltf[ltf.len() - 1].close;
            let broke = match direction {
                Direction::Long => last_close > hi,
                Direction::Short => last_close < lo,
            };
            gate(broke, "no_pullback_or_breakout")?;
            let rel_vol = relative_volume(ltf, c.volume_lookback).ok_or(INSUFFICIENT_DATA)?;
            gate(rel_vol >= c.breakout_volume_mult, "breakout_volume")?;
            let stop = entry - d * c.breakout_stop_atr * atr;
            let mut conf = Confidence::base(50.0);
            conf.bonus(rel_vol >= 2.0 * c.breakout_volume_mult, 10.0);
            ("trend_breakout", stop, conf)
        };
        gate((entry - stop) * d > 0.0, "stop_beyond_entry")?;

        confidence.bonus(reading.adx >= c.min_adx + 15.0, 10.0);
        let ltf_structure = trend_strength(ltf, c.breakout_lookback.max(5)).and_then(|t| t.direction);
        confidence.bonus(ltf_structure == Some(direction), 5.0);

        let draft = SignalDraft {
            direction,
            timeframe: c.ltf,
            entry,
            stop,
            tp1: r_target(entry, stop, direction, c.tp1_r),
            tp2: Some(r_target(entry, stop, direction, c.tp2_r)),
            atr,
            confidence,
        };
        let signal = draft
            .finish(self.family(), strategy, w, c.exit_plan)
            .with_diagnostic("adx", reading.adx)
            .with_diagnostic("htf_ema_fast", fast)
            .with_diagnostic("htf_ema_slow", slow)
            .with_diagnostic("ltf_ema", ltf_ema);
        tracing::debug!(symbol = %w.symbol, strategy, %direction, adx = reading.adx, "trend setup detected");
        Ok(signal)
    }
}
