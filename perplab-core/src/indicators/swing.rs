//! Swing-point finder (fractal pivots).
//!
//! A swing high at `i` has a high strictly above the `strength` highs before it
//! and at or above the `strength` highs after it; swing lows mirror that. The
//! last `strength` candles can never be pivots, which keeps the finder free of
//! look-ahead: a pivot only exists once its right side has closed.

use serde::{Deserialize, Serialize};

use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub kind: SwingKind,
    pub price: f64,
}

/// Swings in index order.
pub fn find_swings(candles: &[Candle], strength: usize) -> Vec<SwingPoint> {
    let n = candles.len();
    let mut swings = Vec::new();
    if strength == 0 || n < 2 * strength + 1 {
        return swings;
    }
    for i in strength..n - strength {
        let h = candles[i].high;
        let l = candles[i].low;
        let left = &candles[i - strength..i];
        let right = &candles[i + 1..=i + strength];
        if left.iter().all(|c| c.high < h) && right.iter().all(|c| c.high <= h) {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::High,
                price: h,
            });
        }
        if left.iter().all(|c| c.low > l) && right.iter().all(|c| c.low >= l) {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::Low,
                price: l,
            });
        }
    }
    swings
}

/// The last two swings of one kind, oldest first.
pub fn last_two(swings: &[SwingPoint], kind: SwingKind) -> Option<(SwingPoint, SwingPoint)> {
    let mut it = swings.iter().rev().filter(|s| s.kind == kind);
    let newer = *it.next()?;
    let older = *it.next()?;
    Some((older, newer))
}
