//! Reversal candle classification from body/wick ratios of the last 1–3 candles.

use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalPattern {
    Hammer,
    InvertedHammer,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalSignal {
    pub pattern: ReversalPattern,
    /// Direction the pattern points to.
    pub direction: Direction,
}

/// Wick at least this many bodies long.
const WICK_BODY_RATIO: f64 = 2.0;
/// Opposite wick no more than this share of the range.
const MAX_OPPOSITE_WICK: f64 = 0.25;
/// Star body no more than this share of the first candle's body.
const STAR_BODY_RATIO: f64 = 0.3;

fn is_hammer_shape(c: &Candle) -> bool {
    let range = c.range();
    range > 0.0 && c.lower_wick() >= WICK_BODY_RATIO * c.body() && c.upper_wick() <= MAX_OPPOSITE_WICK * range
}

fn is_inverted_shape(c: &Candle) -> bool {
    let range = c.range();
    range > 0.0 && c.upper_wick() >= WICK_BODY_RATIO * c.body() && c.lower_wick() <= MAX_OPPOSITE_WICK * range
}

fn star(candles: &[Candle]) -> Option<ReversalSignal> {
    let [a, b, c] = candles else {
        return None;
    };
    if a.body() <= 0.0 || b.body() > STAR_BODY_RATIO * a.body() {
        return None;
    }
    let mid = (a.open + a.close) / 2.0;
    if a.is_bearish() && c.is_bullish() && c.close > mid {
        return Some(ReversalSignal {
            pattern: ReversalPattern::MorningStar,
            direction: Direction::Long,
        });
    }
    if a.is_bullish() && c.is_bearish() && c.close < mid {
        return Some(ReversalSignal {
            pattern: ReversalPattern::EveningStar,
            direction: Direction::Short,
        });
    }
    None
}

fn engulfing(prev: &Candle, last: &Candle) -> Option<ReversalSignal> {
    if last.body() <= prev.body() {
        return None;
    }
    if prev.is_bearish() && last.is_bullish() && last.open <= prev.close && last.close >= prev.open {
        return Some(ReversalSignal {
            pattern: ReversalPattern::BullishEngulfing,
            direction: Direction::Long,
        });
    }
    if prev.is_bullish() && last.is_bearish() && last.open >= prev.close && last.close <= prev.open {
        return Some(ReversalSignal {
            pattern: ReversalPattern::BearishEngulfing,
            direction: Direction::Short,
        });
    }
    None
}

/// Classify the tail of `candles`. Three-candle stars win over engulfing,
/// which wins over single-candle hammers.
///
/// Hammer shapes take their direction from the move into them: after a
/// decline they point up, after a rally they point down.
pub fn detect_reversal_pattern(candles: &[Candle]) -> Option<ReversalSignal> {
    let n = candles.len();
    if n < 2 {
        return None;
    }
    if n >= 3 {
        if let Some(sig) = star(&candles[n - 3..]) {
            return Some(sig);
        }
    }
    if let Some(sig) = engulfing(&candles[n - 2], &candles[n - 1]) {
        return Some(sig);
    }

    let last = &candles[n - 1];
    let lookback = n.min(4);
    let prior_move = candles[n - 2].close - candles[n - lookback].open;
    let direction = if prior_move < 0.0 {
        Direction::Long
    } else if prior_move > 0.0 {
        Direction::Short
    } else {
        return None;
    };
    if is_hammer_shape(last) {
        return Some(ReversalSignal {
            pattern: ReversalPattern::Hammer,
            direction,
        });
    }
    if is_inverted_shape(last) {
        return Some(ReversalSignal {
            pattern: ReversalPattern::InvertedHammer,
            direction,
        });
    }
    None
}
