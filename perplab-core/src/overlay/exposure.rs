//! Portfolio exposure caps.
//!
//! [`ExposureState`] is a view rebuilt from the open positions whenever it is
//! needed; nothing mutates it directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{Direction, Position};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub max_positions: usize,
    pub max_same_direction: usize,
    /// Largest notional in one symbol, as a multiple of equity.
    pub max_symbol_notional: f64,
    /// Largest total notional, as a multiple of equity.
    pub max_total_notional: f64,
    /// Size multiplier as same-direction utilization reaches its cap.
    pub min_scale: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_same_direction: 4,
            max_symbol_notional: 2.0,
            max_total_notional: 6.0,
            min_scale: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExposureState {
    pub open_count: usize,
    pub long_count: usize,
    pub short_count: usize,
    pub symbol_notional: BTreeMap<String, f64>,
    pub total_notional: f64,
}

impl ExposureState {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut state = Self::default();
        for p in positions.into_iter().filter(|p| p.is_open()) {
            state.open_count += 1;
            match p.direction {
                Direction::Long => state.long_count += 1,
                Direction::Short => state.short_count += 1,
            }
            *state.symbol_notional.entry(p.symbol.clone()).or_insert(0.0) += p.remaining_notional;
            state.total_notional += p.remaining_notional;
        }
        state
    }

    pub fn direction_count(&self, direction: Direction) -> usize {
        match direction {
            Direction::Long => self.long_count,
            Direction::Short => self.short_count,
        }
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.symbol_notional.contains_key(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExposureRejection {
    #[error("{open} open positions, cap {cap}")]
    MaxPositions { open: usize, cap: usize },
    #[error("{count} {direction} positions, cap {cap}")]
    MaxSameDirection { direction: Direction, count: usize, cap: usize },
    #[error("already holding {0}")]
    DuplicateSymbol(String),
    #[error("{symbol} notional {share:.2}x equity exceeds {cap:.2}x")]
    SymbolNotional { symbol: String, share: f64, cap: f64 },
    #[error("total notional {share:.2}x equity exceeds {cap:.2}x")]
    TotalNotional { share: f64, cap: f64 },
}

impl ExposureRejection {
    /// Scan-stats key.
    pub fn reason(&self) -> &'static str {
        match self {
            ExposureRejection::MaxPositions { .. } => "exposure:max_positions",
            ExposureRejection::MaxSameDirection { .. } => "exposure:max_same_direction",
            ExposureRejection::DuplicateSymbol(_) => "exposure:duplicate_symbol",
            ExposureRejection::SymbolNotional { .. } => "exposure:symbol_notional",
            ExposureRejection::TotalNotional { .. } => "exposure:total_notional",
        }
    }
}

/// Direction-free caps, checked before any detector runs for `symbol`.
pub fn check_capacity(config: &ExposureConfig, state: &ExposureState, symbol: &str) -> Result<(), ExposureRejection> {
    if state.open_count >= config.max_positions {
        return Err(ExposureRejection::MaxPositions {
            open: state.open_count,
            cap: config.max_positions,
        });
    }
    if state.holds(symbol) {
        return Err(ExposureRejection::DuplicateSymbol(symbol.to_string()));
    }
    Ok(())
}

/// All count caps. On success returns the size multiplier
/// `1 - u·(1 - min_scale)`, `u` being same-direction utilization.
pub fn check_slot(
    config: &ExposureConfig,
    state: &ExposureState,
    symbol: &str,
    direction: Direction,
) -> Result<f64, ExposureRejection> {
    check_capacity(config, state, symbol)?;
    let count = state.direction_count(direction);
    if count >= config.max_same_direction {
        return Err(ExposureRejection::MaxSameDirection {
            direction,
            count,
            cap: config.max_same_direction,
        });
    }
    let utilization = count as f64 / config.max_same_direction.max(1) as f64;
    Ok(1.0 - utilization * (1.0 - config.min_scale.clamp(0.0, 1.0)))
}

/// Notional caps, checked once the position is sized.
pub fn check_notional(
    config: &ExposureConfig,
    state: &ExposureState,
    symbol: &str,
    notional: f64,
    equity: f64,
) -> Result<(), ExposureRejection> {
    if equity <= 0.0 {
        return Err(ExposureRejection::TotalNotional {
            share: f64::INFINITY,
            cap: config.max_total_notional,
        });
    }
    let held = state.symbol_notional.get(symbol).copied().unwrap_or(0.0);
    let symbol_share = (held + notional) / equity;
    if symbol_share > config.max_symbol_notional {
        return Err(ExposureRejection::SymbolNotional {
            symbol: symbol.to_string(),
            share: symbol_share,
            cap: config.max_symbol_notional,
        });
    }
    let total_share = (state.total_notional + notional) / equity;
    if total_share > config.max_total_notional {
        return Err(ExposureRejection::TotalNotional {
            share: total_share,
            cap: config.max_total_notional,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    fn state(longs: usize, shorts: usize) -> ExposureState {
        let mut s = ExposureState {
            open_count: longs + shorts,
            long_count: longs,
            short_count: shorts,
            ..ExposureState::default()
        };
        for i in 0..longs + shorts {
            s.symbol_notional.insert(format!("SYM{i}"), 1000.0);
            s.total_notional += 1000.0;
        }
        s
    }

    #[test]
    fn sixth_position_rejected_at_cap_five() {
        let config = ExposureConfig {
            max_same_direction: 5,
            ..ExposureConfig::default()
        };
        let err = check_slot(&config, &state(3, 2), "NEW", Direction::Short).unwrap_err();
        assert_eq!(err.reason(), "exposure:max_positions");
        assert!(check_slot(&config, &state(2, 2), "NEW", Direction::Short).is_ok());
    }

    #[test]
    fn duplicate_and_direction_caps() {
        let config = ExposureConfig::default();
        assert_eq!(
            check_slot(&config, &state(1, 0), "SYM0", Direction::Long).unwrap_err(),
            ExposureRejection::DuplicateSymbol("SYM0".into())
        );
        let config = ExposureConfig {
            max_same_direction: 2,
            ..config
        };
        assert_eq!(
            check_slot(&config, &state(2, 0), "NEW", Direction::Long).unwrap_err().reason(),
            "exposure:max_same_direction"
        );
    }

    #[test]
    fn scale_shrinks_with_utilization() {
        let config = ExposureConfig::default();
        assert_approx(check_slot(&config, &state(0, 0), "NEW", Direction::Long).unwrap(), 1.0, DEFAULT_EPSILON);
        assert_approx(check_slot(&config, &state(2, 0), "NEW", Direction::Long).unwrap(), 0.75, DEFAULT_EPSILON);
        assert_approx(check_slot(&config, &state(2, 0), "NEW", Direction::Short).unwrap(), 1.0, DEFAULT_EPSILON);
    }

    #[test]
    fn notional_shares() {
        let config = ExposureConfig::default();
        let s = state(2, 0);
        assert!(check_notional(&config, &s, "NEW", 15_000.0, 10_000.0).is_ok());
        assert_eq!(
            check_notional(&config, &s, "NEW", 25_000.0, 10_000.0).unwrap_err().reason(),
            "exposure:symbol_notional"
        );
        let tight = ExposureConfig {
            max_total_notional: 1.5,
            ..config
        };
        assert_eq!(
            check_notional(&tight, &s, "NEW", 14_000.0, 10_000.0).unwrap_err().reason(),
            "exposure:total_notional"
        );
    }
}
