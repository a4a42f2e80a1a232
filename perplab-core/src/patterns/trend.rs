//! Run-length and trend-structure scoring.

use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Direction};

/// Trailing run of same-colored candles: bullish for `Long`, bearish for `Short`.
pub fn count_consecutive_bars(candles: &[Candle], direction: Direction) -> usize {
    candles
        .iter()
        .rev()
        .take_while(|c| match direction {
            Direction::Long => c.is_bullish(),
            Direction::Short => c.is_bearish(),
        })
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendStrength {
    /// Fraction of bar pairs printing a higher high and higher low.
    pub up_fraction: f64,
    /// Fraction printing a lower high and lower low.
    pub down_fraction: f64,
    pub direction: Option<Direction>,
}

impl TrendStrength {
    /// Dominant fraction when a direction is assigned, else 0.
    pub fn strength(&self) -> f64 {
        match self.direction {
            Some(Direction::Long) => self.up_fraction,
            Some(Direction::Short) => self.down_fraction,
            None => 0.0,
        }
    }
}

/// Minimum dominant fraction before a direction is assigned.
pub const MIN_TREND_FRACTION: f64 = 0.3;

/// Score structure over the last `lookback` bar-to-bar transitions.
pub fn trend_strength(candles: &[Candle], lookback: usize) -> Option<TrendStrength> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let window = &candles[candles.len() - lookback - 1..];
    let (mut up, mut down) = (0usize, 0usize);
    for pair in window.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.high > prev.high && cur.low > prev.low {
            up += 1;
        } else if cur.high < prev.high && cur.low < prev.low {
            down += 1;
        }
    }
    let up_fraction = up as f64 / lookback as f64;
    let down_fraction = down as f64 / lookback as f64;
    let direction = if up_fraction > MIN_TREND_FRACTION && up_fraction > down_fraction {
        Some(Direction::Long)
    } else if down_fraction > MIN_TREND_FRACTION && down_fraction > up_fraction {
        Some(Direction::Short)
    } else {
        None
    };
    Some(TrendStrength {
        up_fraction,
        down_fraction,
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{make_candles, make_ohlc};

    #[test]
    fn consecutive_runs() {
        let candles = make_candles(&[10.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(count_consecutive_bars(&candles, Direction::Long), 3);
        assert_eq!(count_consecutive_bars(&candles, Direction::Short), 0);
    }

    #[test]
    fn staircase_up_is_long() {
        let candles = make_candles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let t = trend_strength(&candles, 5).unwrap();
        assert_eq!(t.direction, Some(Direction::Long));
        assert_eq!(t.strength(), 1.0);
    }

    #[test]
    fn weak_structure_gets_no_direction() {
        // One HH/HL out of four transitions: 0.25 ≤ 0.3
        let candles = make_ohlc(&[
            (10.0, 11.0, 9.0, 10.0),
            (10.0, 12.0, 10.0, 11.0),
            (11.0, 12.0, 10.0, 11.0),
            (11.0, 12.0, 10.0, 11.0),
            (11.0, 12.0, 10.0, 11.0),
        ]);
        let t = trend_strength(&candles, 4).unwrap();
        assert_eq!(t.up_fraction, 0.25);
        assert_eq!(t.direction, None);
    }

    #[test]
    fn dominant_must_beat_opposing() {
        // Two up, two down transitions → tie → no direction.
        let candles = make_ohlc(&[
            (10.0, 11.0, 9.0, 10.0),
            (10.0, 12.0, 10.0, 11.0),
            (11.0, 13.0, 11.0, 12.0),
            (12.0, 12.0, 10.0, 11.0),
            (11.0, 11.0, 9.0, 10.0),
        ]);
        let t = trend_strength(&candles, 4).unwrap();
        assert_eq!(t.up_fraction, t.down_fraction);
        assert_eq!(t.direction, None);
    }

    #[test]
    fn sentinel_on_short_window() {
        assert!(trend_strength(&make_candles(&[1.0, 2.0]), 2).is_none());
    }
}
