//! Relative-strength rotation.
//!
//! When the reference asset's fast EMA has just crossed its slow EMA (a
//! "turn"), rotate into the symbols leading the move: rank every symbol in
//! the universe by alpha (return minus beta times the reference return) and
//! take longs from the top of the ranking after a turn up, shorts from the
//! bottom after a turn down. The symbol itself must be pulling back with
//! order flow on its side.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, MarketWindow, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{closes, Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{atr, beta, cvd_slope, ema_series, pct_return, returns};
use crate::patterns::{high_low, is_pullback, PullbackParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeStrengthConfig {
    pub timeframe: Timeframe,
    pub reference_symbol: String,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// The cross must have happened within this many bars.
    pub turn_lookback: usize,
    pub return_lookback: usize,
    pub beta_lookback: usize,
    pub top_n: usize,
    pub pullback: PullbackParams,
    pub atr_period: usize,
    pub cvd_lookback: usize,
    pub min_cvd_slope: f64,
    pub stop_buffer_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for RelativeStrengthConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            reference_symbol: "BTCUSDT".to_string(),
            ema_fast: 9,
            ema_slow: 21,
            turn_lookback: 3,
            return_lookback: 24,
            beta_lookback: 72,
            top_n: 3,
            pullback: PullbackParams::default(),
            atr_period: 14,
            cvd_lookback: 10,
            min_cvd_slope: 0.0,
            stop_buffer_atr: 0.5,
            tp1_r: 1.5,
            tp2_r: 3.0,
            exit_plan: ExitPlan {
                tp1_fraction: 0.3,
                trail_atr_multiple: 2.0,
                time_stop_bars: 48,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelativeStrengthRotation {
    config: RelativeStrengthConfig,
}

impl RelativeStrengthRotation {
    pub fn new(config: RelativeStrengthConfig) -> Self {
        Self { config }
    }

    /// Direction of a fast/slow EMA cross inside the last `turn_lookback` bars.
    fn reference_turn(&self, reference: &[f64]) -> Option<Direction> {
        let c = &self.config;
        let fast = ema_series(reference, c.ema_fast);
        let slow = ema_series(reference, c.ema_slow);
        let n = reference.len();
        if n < c.turn_lookback + 1 {
            return None;
        }
        let spread = |i: usize| fast[i] - slow[i];
        let (before, now) = (spread(n - 1 - c.turn_lookback), spread(n - 1));
        if !before.is_finite() || !now.is_finite() {
            return None;
        }
        if before < 0.0 && now > 0.0 {
            Some(Direction::Long)
        } else if before > 0.0 && now < 0.0 {
            Some(Direction::Short)
        } else {
            None
        }
    }

    fn alpha(&self, window: &MarketWindow, reference: &[f64], reference_return: f64) -> Option<f64> {
        let c = &self.config;
        let asset = closes(window.candles(c.timeframe));
        let ret = pct_return(&asset, c.return_lookback)?;
        let tail = |xs: &[f64]| returns(&xs[xs.len().saturating_sub(c.beta_lookback + 1)..]);
        let b = beta(&tail(&asset), &tail(reference)).unwrap_or(1.0);
        Some(ret - b * reference_return)
    }
}

impl SignalDetector for RelativeStrengthRotation {
    fn name(&self) -> &str {
        "relative_strength"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::HourSwing
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        gate(w.symbol != c.reference_symbol, "reference_symbol")?;
        let reference_window = ctx
            .universe
            .get(&c.reference_symbol)
            .ok_or(NoSignal("no_reference"))?;
        let reference = closes(reference_window.candles(c.timeframe));
        let direction = self.reference_turn(&reference).ok_or(NoSignal("no_reference_turn"))?;
        let reference_return = pct_return(&reference, c.return_lookback).ok_or(INSUFFICIENT_DATA)?;

        let own_alpha = self.alpha(w, &reference, reference_return).ok_or(INSUFFICIENT_DATA)?;
        let mut ranked: Vec<(f64, &str)> = ctx
            .universe
            .values()
            .filter(|other| other.symbol != c.reference_symbol && other.symbol != w.symbol)
            .filter_map(|other| Some((self.alpha(other, &reference, reference_return)?, other.symbol.as_str())))
            .collect();
        ranked.push((own_alpha, w.symbol.as_str()));
        // Best alpha first for longs, worst first for shorts; ties by symbol.
        ranked.sort_by(|a, b| {
            let by_alpha = match direction {
                Direction::Long => b.0.total_cmp(&a.0),
                Direction::Short => a.0.total_cmp(&b.0),
            };
            by_alpha.then_with(|| a.1.cmp(b.1))
        });
        let rank = ranked
            .iter()
            .position(|(_, s)| *s == w.symbol)
            .ok_or(INSUFFICIENT_DATA)?;
        gate(rank < c.top_n, "alpha_rank")?;

        let candles = w.candles(c.timeframe);
        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;
        gate(is_pullback(candles, direction, atr, &c.pullback), "no_pullback")?;
        let cvd = cvd_slope(candles, c.cvd_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(cvd * direction.sign() >= c.min_cvd_slope, "cvd_disagrees")?;

        let (hi, lo) = high_low(&candles[candles.len() - 3..]).ok_or(INSUFFICIENT_DATA)?;
        let extreme = if direction == Direction::Long { lo } else { hi };
        let entry = w.current_price;
        let stop = extreme - direction.sign() * c.stop_buffer_atr * atr;
        gate((entry - stop) * direction.sign() > 0.0, "stop_beyond_entry")?;

        let mut confidence = Confidence::base(55.0);
        confidence.bonus(rank == 0, 10.0);
        confidence.bonus(own_alpha * direction.sign() > 0.0, 10.0);
        confidence.bonus(cvd * direction.sign() >= 0.2, 5.0);

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
            .with_diagnostic("alpha", own_alpha)
            .with_diagnostic("alpha_rank", rank as f64)
            .with_diagnostic("reference_return", reference_return)
            .with_diagnostic("cvd_slope", cvd);
        tracing::debug!(symbol = %w.symbol, %direction, rank, alpha = own_alpha, "rotation candidate");
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{base_time, candles_ending, line};
    use std::collections::BTreeMap;

    type Bar = (f64, f64, f64, f64, f64);

    fn config() -> RelativeStrengthConfig {
        RelativeStrengthConfig {
            ema_fast: 3,
            ema_slow: 6,
            return_lookback: 10,
            beta_lookback: 20,
            top_n: 1,
            atr_period: 5,
            ..RelativeStrengthConfig::default()
        }
    }

    fn reference() -> Vec<Bar> {
        let mut data = line(100.0, -0.5, 40, 0.3);
        data.push((80.0, 83.3, 79.9, 83.0, 1000.0));
        data.push((83.0, 86.3, 82.8, 86.0, 1000.0));
        data
    }

    fn leader() -> Vec<Bar> {
        let mut data = line(100.0, 0.5, 39, 0.3);
        data.push((119.5, 119.7, 118.5, 118.7, 800.0));
        data.push((118.7, 118.9, 117.8, 118.0, 700.0));
        data.push((118.0, 118.4, 117.7, 118.3, 600.0));
        data
    }

    fn universe() -> BTreeMap<String, MarketWindow> {
        let now = base_time() + chrono::Duration::days(3);
        [
            ("BTCUSDT", reference()),
            ("AVAXUSDT", leader()),
            ("DOTUSDT", line(100.0, 0.0, 42, 0.3)),
            ("LTCUSDT", line(100.0, -0.3, 42, 0.3)),
        ]
        .into_iter()
        .map(|(symbol, data)| {
            let candles = candles_ending(symbol, Timeframe::H1, now, &data);
            let price = candles.last().unwrap().close;
            let w = MarketWindow::new(symbol, now, price).with_frame(Timeframe::H1, candles);
            (symbol.to_string(), w)
        })
        .collect()
    }

    fn run(symbol: &str) -> Detection {
        let universe = universe();
        let w = &universe[symbol];
        RelativeStrengthRotation::new(config()).evaluate(&DetectionContext::new(w, &universe))
    }

    #[test]
    fn leader_after_reference_turn_goes_long() {
        let sig = run("AVAXUSDT").unwrap();
        assert_eq!(sig.direction, Direction::Long);
        assert_eq!(sig.diagnostics["alpha_rank"], 0.0);
        assert!(sig.diagnostics["reference_return"] > 0.0);
        assert!(sig.stop_loss < 117.7);
    }

    #[test]
    fn laggard_is_outside_top_rank() {
        assert_eq!(run("LTCUSDT").unwrap_err(), NoSignal("alpha_rank"));
    }

    #[test]
    fn reference_never_trades_itself() {
        assert_eq!(run("BTCUSDT").unwrap_err(), NoSignal("reference_symbol"));
    }

    #[test]
    fn missing_reference_is_no_signal() {
        let mut universe = universe();
        universe.remove("BTCUSDT");
        let w = &universe["AVAXUSDT"];
        let err = RelativeStrengthRotation::new(config())
            .evaluate(&DetectionContext::new(w, &universe))
            .unwrap_err();
        assert_eq!(err, NoSignal("no_reference"));
    }
}
