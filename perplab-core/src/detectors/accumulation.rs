//! Accumulation / distribution.
//!
//! A graded box with repeated tests of its edges, CVD leaning one way, and a
//! final candle that wicks through the edge and closes back inside: a
//! "spring" below support (long) or an "upthrust" above resistance (short).

use serde::{Deserialize, Serialize};

use super::{gate, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, cvd_slope};
use crate::patterns::{detect_box, BoxGrade, BoxParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationConfig {
    pub timeframe: Timeframe,
    #[serde(rename = "box")]
    pub box_params: BoxParams,
    pub atr_period: usize,
    /// Tests required on the side being sprung.
    pub min_tests: usize,
    /// Deepest allowed wick through the edge, in ATR.
    pub max_penetration_atr: f64,
    pub cvd_lookback: usize,
    pub min_cvd_slope: f64,
    pub stop_buffer_atr: f64,
    pub exit_plan: ExitPlan,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            box_params: BoxParams {
                lookback: 40,
                max_height_atr: 5.0,
                touch_tolerance_atr: 0.3,
            },
            atr_period: 14,
            min_tests: 2,
            max_penetration_atr: 1.0,
            cvd_lookback: 20,
            min_cvd_slope: 0.05,
            stop_buffer_atr: 0.3,
            exit_plan: ExitPlan {
                tp1_fraction: 0.5,
                trail_atr_multiple: 2.5,
                time_stop_bars: 72,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccumulationDistribution {
    config: AccumulationConfig,
}

impl AccumulationDistribution {
    pub fn new(config: AccumulationConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for AccumulationDistribution {
    fn name(&self) -> &str {
        "accumulation_distribution"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::CycleRider
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let candles = w.candles(c.timeframe);
        gate(candles.len() > c.box_params.lookback, "insufficient_data")?;
        let n = candles.len();
        let prior = &candles[..n - 1];
        let last = &candles[n - 1];

        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        let range = detect_box(prior, atr, &c.box_params).ok_or(NoSignal("no_box"))?;
        let cvd = cvd_slope(candles, c.cvd_lookback).ok_or(INSUFFICIENT_DATA)?;
        let max_pen = c.max_penetration_atr * atr;

        let spring = last.low < range.support
            && range.support - last.low <= max_pen
            && last.close > range.support
            && last.lower_wick() > last.body();
        let upthrust = last.high > range.resistance
            && last.high - range.resistance <= max_pen
            && last.close < range.resistance
            && last.upper_wick() > last.body();

        let (direction, strategy, tests) = if spring {
            (Direction::Long, "spring", range.support_tests)
        } else if upthrust {
            (Direction::Short, "upthrust", range.resistance_tests)
        } else {
            return Err(NoSignal("no_spring_or_upthrust"));
        };
        gate(tests >= c.min_tests, "too_few_tests")?;
        gate(cvd * direction.sign() >= c.min_cvd_slope, "cvd_disagrees")?;

        let d = direction.sign();
        let entry = w.current_price;
        let (stop, tp1, tp2) = match direction {
            Direction::Long => (
                last.low - c.stop_buffer_atr * atr,
                range.resistance,
                range.resistance + range.height(),
            ),
            Direction::Short => (
                last.high + c.stop_buffer_atr * atr,
                range.support,
                range.support - range.height(),
            ),
        };
        gate((entry - stop) * d > 0.0, "stop_beyond_entry")?;
        gate((tp1 - entry) * d > 0.0, "target_behind_entry")?;

        let mut confidence = Confidence::base(50.0);
        confidence.bonus(range.grade == BoxGrade::A, 20.0);
        confidence.bonus(range.grade == BoxGrade::B, 10.0);
        confidence.bonus(cvd.abs() >= 2.0 * c.min_cvd_slope, 10.0);
        confidence.bonus(tests >= c.min_tests + 2, 5.0);

        let draft = SignalDraft {
            direction,
            timeframe: c.timeframe,
            entry,
            stop,
            tp1,
            tp2: Some(tp2),
            atr,
            confidence,
        };
        let grade_code = match range.grade {
            BoxGrade::A => 1.0,
            BoxGrade::B => 2.0,
            BoxGrade::C => 3.0,
        };
        let signal = draft
            .finish(self.family(), strategy, w, c.exit_plan)
            .with_diagnostic("box_support", range.support)
            .with_diagnostic("box_resistance", range.resistance)
            .with_diagnostic("box_grade", grade_code)
            .with_diagnostic("level_tests", tests as f64)
            .with_diagnostic("cvd_slope", cvd);
        tracing::debug!(symbol = %w.symbol, strategy, grade = ?range.grade, cvd, "box reversal detected");
        Ok(signal)
    }
}
