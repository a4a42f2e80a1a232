//! Cost model: commission, slippage and funding.
//!
//! Commission is charged once per realized fill and covers both sides of that
//! slice (`notional * rate * 2`). Slippage moves a market exit against the
//! position; TP1 is a resting limit and fills at its level. Funding is paid on
//! the notional still open for each whole 8-hour period held.

use serde::{Deserialize, Serialize};

use crate::domain::{Direction, FundingPoint};

/// How far a market fill lands from the reference price, as a fraction of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    Fixed { rate: f64 },
    /// `max(min_rate, atr / price * atr_mult)`.
    AtrScaled { min_rate: f64, atr_mult: f64 },
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::AtrScaled {
            min_rate: 0.0002,
            atr_mult: 0.1,
        }
    }
}

impl SlippageModel {
    pub fn rate(&self, price: f64, atr: f64) -> f64 {
        match *self {
            SlippageModel::Fixed { rate } => rate.max(0.0),
            SlippageModel::AtrScaled { min_rate, atr_mult } => {
                let atr_pct = if price > 0.0 && atr.is_finite() { atr / price } else { 0.0 };
                min_rate.max(atr_pct * atr_mult).max(0.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Per-side taker rate.
    pub commission_rate: f64,
    pub slippage: SlippageModel,
    /// Fill a stop that the bar gapped through at the bar's open instead of
    /// at the stop level.
    pub gap_fills_at_open: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            commission_rate: 0.0004,
            slippage: SlippageModel::default(),
            gap_fills_at_open: false,
        }
    }
}

impl CostConfig {
    pub fn frictionless() -> Self {
        Self {
            commission_rate: 0.0,
            slippage: SlippageModel::Fixed { rate: 0.0 },
            gap_fills_at_open: false,
        }
    }

    /// Round-trip commission for a fill of `notional`.
    pub fn commission(&self, notional: f64) -> f64 {
        notional * self.commission_rate * 2.0
    }

    /// Market exit price for closing a `direction` position at `price`.
    ///
    /// Longs sell lower, shorts buy back higher.
    pub fn exit_price(&self, direction: Direction, price: f64, atr: f64) -> f64 {
        let rate = self.slippage.rate(price, atr);
        price * (1.0 - direction.sign() * rate)
    }
}

/// Funding paid by a position of `notional` at one settlement.
///
/// Positive means paid: longs pay a positive rate, shorts receive it.
pub fn funding_payment(direction: Direction, rate: f64, notional: f64) -> f64 {
    direction.sign() * rate * notional
}

/// Total funding over a run of settlements at a constant notional.
pub fn funding_over(direction: Direction, settlements: &[FundingPoint], notional: f64) -> f64 {
    settlements
        .iter()
        .map(|p| funding_payment(direction, p.rate, notional))
        .sum()
}
