//! RSI divergence.
//!
//! Price prints a lower swing low while RSI prints a higher one (bullish), or
//! a higher swing high against a lower RSI high (bearish). The newer swing must
//! be recent, volume must be at least `min_rel_volume` of normal, the market
//! must not be trending hard (ADX at most `max_adx`), and the last candles must
//! form a reversal pattern pointing the trade's way.

use serde::{Deserialize, Serialize};

use super::{gate, r_target, Confidence, DetectionContext, Detection, NoSignal, SignalDetector, SignalDraft, INSUFFICIENT_DATA};
use crate::domain::{closes, Direction, ExitPlan, StrategyFamily, Timeframe};
use crate::indicators::{adx, atr, find_swings, last_two, relative_volume, rsi_series, AdxMode, SwingKind};
use crate::patterns::{detect_reversal_pattern, ReversalPattern};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    pub timeframe: Timeframe,
    pub rsi_period: usize,
    pub swing_strength: usize,
    /// Only swings inside the last `lookback` candles are compared.
    pub lookback: usize,
    pub max_bars_since_swing: usize,
    /// Minimum RSI improvement between the two swings.
    pub min_rsi_gap: f64,
    pub volume_lookback: usize,
    pub min_rel_volume: f64,
    pub adx_period: usize,
    pub adx_mode: AdxMode,
    pub max_adx: f64,
    pub atr_period: usize,
    pub stop_buffer_atr: f64,
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub exit_plan: ExitPlan,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            rsi_period: 14,
            swing_strength: 2,
            lookback: 60,
            max_bars_since_swing: 4,
            min_rsi_gap: 2.0,
            volume_lookback: 20,
            min_rel_volume: 1.2,
            adx_period: 14,
            adx_mode: AdxMode::SingleBarDx,
            max_adx: 35.0,
            atr_period: 14,
            stop_buffer_atr: 0.5,
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
pub struct RsiDivergence {
    config: DivergenceConfig,
}

impl RsiDivergence {
    pub fn new(config: DivergenceConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for RsiDivergence {
    fn name(&self) -> &str {
        "rsi_divergence"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Reversal
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
        let c = &self.config;
        let w = ctx.window;
        let candles = w.candles(c.timeframe);
        let n = candles.len();
        gate(n > c.rsi_period + 2 * c.swing_strength + 1, "insufficient_data")?;

        let rsi = rsi_series(&closes(candles), c.rsi_period);
        let start = n.saturating_sub(c.lookback);
        let swings: Vec<_> = find_swings(candles, c.swing_strength)
            .into_iter()
            .filter(|s| s.index >= start && rsi[s.index].is_finite())
            .collect();

        let bullish = last_two(&swings, SwingKind::Low)
            .filter(|(old, new)| new.price < old.price && rsi[new.index] - rsi[old.index] >= c.min_rsi_gap);
        let bearish = last_two(&swings, SwingKind::High)
            .filter(|(old, new)| new.price > old.price && rsi[old.index] - rsi[new.index] >= c.min_rsi_gap);

        // Prefer whichever divergence completed more recently.
        let (direction, old, new) = match (bullish, bearish) {
            (Some(b), Some(s)) if s.1.index > b.1.index => (Direction::Short, s.0, s.1),
            (Some(b), _) => (Direction::Long, b.0, b.1),
            (None, Some(s)) => (Direction::Short, s.0, s.1),
            (None, None) => return Err(NoSignal("no_divergence")),
        };
        gate(n - 1 - new.index <= c.max_bars_since_swing, "divergence_stale")?;

        let pattern = detect_reversal_pattern(candles).ok_or(NoSignal("no_reversal_candle"))?;
        gate(pattern.direction == direction, "no_reversal_candle")?;

        let rel_vol = relative_volume(candles, c.volume_lookback).ok_or(INSUFFICIENT_DATA)?;
        gate(rel_vol >= c.min_rel_volume, "low_volume")?;
        let reading = adx(candles, c.adx_period, c.adx_mode).ok_or(INSUFFICIENT_DATA)?;
        gate(reading.adx <= c.max_adx, "adx_too_strong")?;
        let atr = atr(candles, c.atr_period).ok_or(INSUFFICIENT_DATA)?;

        let entry = w.current_price;
        let stop = new.price - direction.sign() * c.stop_buffer_atr * atr;
        gate((entry - stop) * direction.sign() > 0.0, "stop_beyond_entry")?;

        let rsi_gap = (rsi[new.index] - rsi[old.index]).abs();
        let mut confidence = Confidence::base(50.0);
        confidence.bonus(rsi_gap >= 5.0, 10.0);
        confidence.bonus(
            matches!(
                pattern.pattern,
                ReversalPattern::BullishEngulfing
                    | ReversalPattern::BearishEngulfing
                    | ReversalPattern::MorningStar
                    | ReversalPattern::EveningStar
            ),
            10.0,
        );
        let extreme_rsi = match direction {
            Direction::Long => rsi[old.index] <= 30.0,
            Direction::Short => rsi[old.index] >= 70.0,
        };
        confidence.bonus(extreme_rsi, 10.0);

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
            .with_diagnostic("rsi_old", rsi[old.index])
            .with_diagnostic("rsi_new", rsi[new.index])
            .with_diagnostic("swing_price", new.price)
            .with_diagnostic("rel_volume", rel_vol)
            .with_diagnostic("adx", reading.adx);
        tracing::debug!(symbol = %w.symbol, %direction, pattern = ?pattern.pattern, rsi_gap, "rsi divergence detected");
        Ok(signal)
    }
}
