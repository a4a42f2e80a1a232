//! Box ranges, support/resistance tests and pullbacks.

use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Direction};

/// Highest high and lowest low of a window.
pub fn high_low(candles: &[Candle]) -> Option<(f64, f64)> {
    if candles.is_empty() {
        return None;
    }
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

/// The last `lookback` candles span less than `atr · k`.
pub fn is_in_box_range(candles: &[Candle], lookback: usize, atr: f64, k: f64) -> bool {
    if lookback == 0 || candles.len() < lookback || atr <= 0.0 {
        return false;
    }
    match high_low(&candles[candles.len() - lookback..]) {
        Some((high, low)) => high - low < atr * k,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSide {
    /// Lows probing a floor.
    Support,
    /// Highs probing a ceiling.
    Resistance,
}

/// Candles whose low (support) or high (resistance) falls within `tolerance` of `level`.
pub fn count_level_tests(candles: &[Candle], level: f64, tolerance: f64, side: LevelSide) -> usize {
    candles
        .iter()
        .filter(|c| {
            let probe = match side {
                LevelSide::Support => c.low,
                LevelSide::Resistance => c.high,
            };
            (probe - level).abs() <= tolerance
        })
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoxGrade {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxParams {
    pub lookback: usize,
    /// Maximum box height in ATR units.
    pub max_height_atr: f64,
    /// Touch band around support/resistance in ATR units.
    pub touch_tolerance_atr: f64,
}

impl Default for BoxParams {
    fn default() -> Self {
        Self {
            lookback: 30,
            max_height_atr: 4.0,
            touch_tolerance_atr: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxRange {
    pub support: f64,
    pub resistance: f64,
    pub height_atr: f64,
    pub support_tests: usize,
    pub resistance_tests: usize,
    pub grade: BoxGrade,
}

impl BoxRange {
    pub fn height(&self) -> f64 {
        self.resistance - self.support
    }

    pub fn midpoint(&self) -> f64 {
        (self.resistance + self.support) / 2.0
    }
}

/// Box over the last `params.lookback` candles, if it is tight enough.
///
/// Grade A: height at most 60% of the cap with ≥3 tests on both sides.
/// Grade B: ≥2 tests on both sides. Everything else that fits is C.
pub fn detect_box(candles: &[Candle], atr: f64, params: &BoxParams) -> Option<BoxRange> {
    if params.lookback == 0 || candles.len() < params.lookback || atr <= 0.0 {
        return None;
    }
    let window = &candles[candles.len() - params.lookback..];
    let (resistance, support) = high_low(window)?;
    let height_atr = (resistance - support) / atr;
    if height_atr >= params.max_height_atr {
        return None;
    }
    let tol = atr * params.touch_tolerance_atr;
    let support_tests = count_level_tests(window, support, tol, LevelSide::Support);
    let resistance_tests = count_level_tests(window, resistance, tol, LevelSide::Resistance);
    let grade = if height_atr <= 0.6 * params.max_height_atr && support_tests >= 3 && resistance_tests >= 3 {
        BoxGrade::A
    } else if support_tests >= 2 && resistance_tests >= 2 {
        BoxGrade::B
    } else {
        BoxGrade::C
    };
    Some(BoxRange {
        support,
        resistance,
        height_atr,
        support_tests,
        resistance_tests,
        grade,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullbackParams {
    pub min_depth_atr: f64,
    pub max_depth_atr: f64,
}

impl Default for PullbackParams {
    fn default() -> Self {
        Self {
            min_depth_atr: 0.5,
            max_depth_atr: 2.5,
        }
    }
}

/// A counter-move against `trend` whose last-3-bar range, in ATR units, lies in
/// `[min_depth, max_depth]` and whose final candle shows the counter-move fading
/// (smaller body than the one before, or closing back in the trend direction).
pub fn is_pullback(candles: &[Candle], trend: Direction, atr: f64, params: &PullbackParams) -> bool {
    if candles.len() < 3 || atr <= 0.0 {
        return false;
    }
    let last3 = &candles[candles.len() - 3..];
    let Some((high, low)) = high_low(last3) else {
        return false;
    };
    let depth = (high - low) / atr;
    if depth < params.min_depth_atr || depth > params.max_depth_atr {
        return false;
    }
    let counter_move = match trend {
        Direction::Long => last3[2].close < last3[0].open,
        Direction::Short => last3[2].close > last3[0].open,
    };
    let prev = &last3[1];
    let last = &last3[2];
    let closes_with_trend = match trend {
        Direction::Long => last.is_bullish(),
        Direction::Short => last.is_bearish(),
    };
    let weakening = last.body() < prev.body() || closes_with_trend;
    counter_move && weakening
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_ohlc;

    fn boxed() -> Vec<Candle> {
        // Oscillates between ~99 and ~101 with repeated touches.
        let mut data = Vec::new();
        for i in 0..12 {
            if i % 2 == 0 {
                data.push((100.0, 101.0, 99.5, 100.8));
            } else {
                data.push((100.8, 100.9, 99.0, 99.2));
            }
        }
        make_ohlc(&data)
    }

    #[test]
    fn box_detected_with_grade_a() {
        let candles = boxed();
        let params = BoxParams {
            lookback: 12,
            max_height_atr: 4.0,
            touch_tolerance_atr: 0.1,
        };
        let b = detect_box(&candles, 1.0, &params).unwrap();
        assert_eq!(b.resistance, 101.0);
        assert_eq!(b.support, 99.0);
        assert_eq!(b.support_tests, 6);
        assert_eq!(b.resistance_tests, 12);
        assert_eq!(b.grade, BoxGrade::A);
    }

    #[test]
    fn wide_range_is_not_a_box() {
        let candles = boxed();
        let params = BoxParams {
            lookback: 12,
            max_height_atr: 1.5,
            touch_tolerance_atr: 0.1,
        };
        assert!(detect_box(&candles, 1.0, &params).is_none());
        assert!(!is_in_box_range(&candles, 12, 1.0, 1.5));
        assert!(is_in_box_range(&candles, 12, 1.0, 2.5));
    }

    #[test]
    fn level_tests_by_side() {
        let candles = boxed();
        assert_eq!(count_level_tests(&candles, 99.0, 0.05, LevelSide::Support), 6);
        assert_eq!(count_level_tests(&candles, 99.0, 0.05, LevelSide::Resistance), 0);
    }

    #[test]
    fn long_pullback_with_fading_last_bar() {
        let candles = make_ohlc(&[
            (110.0, 110.5, 108.0, 108.5),
            (108.5, 109.0, 107.0, 107.5),
            (107.5, 108.0, 107.2, 107.8),
        ]);
        assert!(is_pullback(&candles, Direction::Long, 2.0, &PullbackParams::default()));
        assert!(!is_pullback(&candles, Direction::Short, 2.0, &PullbackParams::default()));
    }

    #[test]
    fn pullback_depth_bounds() {
        let candles = make_ohlc(&[
            (110.0, 110.5, 108.0, 108.5),
            (108.5, 109.0, 107.0, 107.5),
            (107.5, 108.0, 107.2, 107.8),
        ]);
        // Range 3.5 over ATR 0.5 = 7 ATR: too deep.
        assert!(!is_pullback(&candles, Direction::Long, 0.5, &PullbackParams::default()));
    }
}
