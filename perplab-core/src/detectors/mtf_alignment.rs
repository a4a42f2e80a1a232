//! Multi-timeframe alignment.
//!
//! The higher timeframe sets the direction: its structure score must sit in a
//! band (trending, but not parabolic), its trailing same-colored run must be
//! short (not too late), and its close must be on the right side of its EMA.
//! The mid timeframe must agree, and the lower timeframe must offer a pullback
//! with order flow (CVD) still leaning the trend's way. Adverse funding and
//! exhausted lower-timeframe RSI veto the entry.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, cvd_slope, ema, rsi};
use crate::patterns::{count_consecutive_bars, high_low, is_pullback, trend_strength, PullbackParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtfAlignmentConfig {
    pub htf: Timeframe,
    pub mtf: Timeframe,
    pub ltf: Timeframe,
    pub trend_lookback: usize,
    pub min_trend_strength: f64,
    pub max_trend_strength: f64,
    /// Longest trailing HTF run of trend-colored candles still worth joining.
    pub max_consecutive_bars: usize,
    pub htf_ema: usize,
    pub pullback: PullbackParams,
    pub atr_period: usize,
    pub cvd_lookback: usize,
    pub min_cvd_slope: f64,
    /// Largest funding rate the trade may pay (positive for longs, negative for shorts).
    pub max_adverse_funding: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub stop_buffer_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for MtfAlignmentConfig {
    fn default() -> Self {
        Self {
            htf: Timeframe::H4,
            mtf: Timeframe::H1,
            ltf: Timeframe::M15,
            trend_lookback: 20,
            min_trend_strength: 0.4,
            max_trend_strength: 0.9,
            max_consecutive_bars: 5,
            htf_ema: 50,
            pullback: PullbackParams::default(),
            atr_period: 14,
            cvd_lookback: 10,
            min_cvd_slope: 0.0,
            max_adverse_funding: 0.0005,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            stop_buffer_atr: 0.5,
            tp1_r: 1.5,
            tp2_r: 3.0,
            exit_plan: ExitPlan {
                tp1_fraction: 0.3,
                trail_atr_multiple: 2.0,
                time_stop_bars: 96,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MtfAlignment {
    config: MtfAlignmentConfig,
}

impl MtfAlignment {
    pub fn new(config: MtfAlignmentConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for MtfAlignment {
    fn name(&self) -> &str {
        "mtf_alignment"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::HourSwing
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let htf = w.candles(c.htf);
        let mtf = w.candles(c.mtf);
        let ltf = w.candles(c.ltf);

        let htf_trend = trend_strength(htf, c.trend_lookback).ok_or(INSUFFICIENT_DATA)?;
        let direction = htf_trend.direction.ok_or(NoSignal("htf_no_trend"))?;
        let strength = htf_trend.strength();
        gate(
            (c.min_trend_strength..=c.max_trend_strength).contains(&strength),
            "htf_strength_band",
        )?;
        let run = count_consecutive_bars(htf, direction);
        gate(run <= c.max_consecutive_bars, "htf_too_late")?;
        let htf_close = htf.last().ok_or(INSUFFICIENT_DATA)?.close;
        let htf_ema = ema(htf, c.htf_ema).ok_or(INSUFFICIENT_DATA)?;
        gate((htf_close - htf_ema) * direction.sign() > 0.0, "htf_ema")?;

        let mtf_trend = trend_strength(mtf, c.trend_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(mtf_trend.direction == Some(direction), "mtf_misaligned")?;

        let atr = atr(ltf, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        gate(is_pullback(ltf, direction, atr, &c.pullback), "no_ltf_pullback")?;
        let cvd = cvd_slope(ltf, c.cvd_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(cvd * direction.sign() >= c.min_cvd_slope, "cvd_disagrees")?;

        if let Some(rate) = w.funding_rate {
            gate(rate * direction.sign() <= c.max_adverse_funding, "adverse_funding")?;
        }
        let ltf_rsi = rsi(ltf, c.rsi_period).ok_or(INSUFFICIENT_DATA)?;
        let exhausted = match direction {
            Direction::Long => ltf_rsi >= c.rsi_overbought,
            Direction::Short => ltf_rsi <= c.rsi_oversold,
        };
        gate(!exhausted, "rsi_exhausted")?;

        let (hi, lo) = high_low(&ltf[ltf.len() - 3..]).ok_or(INSUFFICIENT_DATA)?;
        let extreme = if direction == Direction::Long { lo } else { hi };
        let entry = w.current_price;
        let stop = extreme - direction.sign() * c.stop_buffer_atr * atr;
        gate((entry - stop) * direction.sign() > 0.0, "stop_beyond_entry")?;

        let mut confidence = Confidence::base(60.0);
        confidence.bonus(mtf_trend.strength() >= c.min_trend_strength, 10.0);
        confidence.bonus(cvd * direction.sign() >= 0.2, 10.0);
        confidence.bonus(run <= 2, 5.0);

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
            .finish(self.family(), self.name(), w, c.exit_plan)
            .with_diagnostic("htf_strength", strength)
            .with_diagnostic("mtf_strength", mtf_trend.strength())
            .with_diagnostic("htf_run", run as f64)
            .with_diagnostic("cvd_slope", cvd)
            .with_diagnostic("ltf_rsi", ltf_rsi);
        tracing::debug!(symbol = %w.symbol, %direction, strength, cvd, "timeframes aligned");
        Ok(signal)
    }
}
