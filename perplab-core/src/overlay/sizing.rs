//! Volatility-based position sizing.
//!
//! # Formula
//! ```text
//! risk_usd      = equity * risk_per_trade * scale
//! stop_distance = |entry - stop| / entry
//! notional      = clamp(risk_usd / stop_distance, min_position_usd, max_position_usd)
//! leverage      = ceil(notional / (max_margin_pct * equity)), at least 1
//! ```
//! A leverage above `max_leverage` is rejected rather than capped, since the
//! margin bound would otherwise be broken.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub risk_per_trade: f64,
    pub min_position_usd: f64,
    pub max_position_usd: f64,
    pub max_leverage: u32,
    /// Margin of one position as a fraction of equity.
    pub max_margin_pct: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            min_position_usd: 10.0,
            max_position_usd: 100_000.0,
            max_leverage: 20,
            max_margin_pct: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub notional: f64,
    pub leverage: u32,
    pub margin: f64,
    /// Dollar loss if the stop fills exactly.
    pub risk_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingRejection {
    #[error("equity {0} is not positive")]
    NoEquity(f64),
    #[error("stop distance is zero or not finite")]
    ZeroStopDistance,
    #[error("notional {notional:.2} needs {required}x leverage, max {max}x")]
    LeverageExceeded { notional: f64, required: u32, max: u32 },
    #[error("size bounds are inverted: min {min} > max {max}")]
    InvertedBounds { min: f64, max: f64 },
}

impl SizingRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            SizingRejection::NoEquity(_) => "sizing:no_equity",
            SizingRejection::ZeroStopDistance => "sizing:zero_stop_distance",
            SizingRejection::LeverageExceeded { .. } => "sizing:leverage",
            SizingRejection::InvertedBounds { .. } => "sizing:bounds",
        }
    }
}

pub fn size_position(
    config: &SizingConfig,
    equity: f64,
    entry: f64,
    stop: f64,
    scale: f64,
) -> Result<PositionSize, SizingRejection> {
    if equity <= 0.0 || !equity.is_finite() {
        return Err(SizingRejection::NoEquity(equity));
    }
    if config.min_position_usd > config.max_position_usd {
        return Err(SizingRejection::InvertedBounds {
            min: config.min_position_usd,
            max: config.max_position_usd,
        });
    }
    let stop_distance = (entry - stop).abs() / entry;
    if !stop_distance.is_finite() || stop_distance <= 0.0 {
        return Err(SizingRejection::ZeroStopDistance);
    }
    let risk_budget = equity * config.risk_per_trade * scale;
    let notional = (risk_budget / stop_distance).clamp(config.min_position_usd, config.max_position_usd);

    let margin_cap = config.max_margin_pct * equity;
    let required = if margin_cap > 0.0 {
        (notional / margin_cap).ceil().max(1.0)
    } else {
        f64::INFINITY
    };
    if required > f64::from(config.max_leverage) {
        return Err(SizingRejection::LeverageExceeded {
            notional,
            required: if required.is_finite() { required as u32 } else { u32::MAX },
            max: config.max_leverage,
        });
    }
    let leverage = required as u32;
    Ok(PositionSize {
        notional,
        leverage,
        margin: notional / f64::from(leverage),
        risk_usd: notional * stop_distance,
    })
}
