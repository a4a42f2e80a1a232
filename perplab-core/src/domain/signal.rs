//! Trading signals — immutable detector output, consumed by arbitration and sizing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::candle::Timeframe;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("LONG"),
            Direction::Short => f.write_str("SHORT"),
        }
    }
}

/// Strategy family a detector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    /// Trend pullback / breakout.
    TrendRider,
    /// Volatility compression and accumulation/distribution cycles.
    CycleRider,
    /// Counter-move setups: divergence and volume climax.
    Reversal,
    /// Multi-timeframe, rotation and funding setups on the hourly swing horizon.
    HourSwing,
}

impl fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyFamily::TrendRider => "trend_rider",
            StrategyFamily::CycleRider => "cycle_rider",
            StrategyFamily::Reversal => "reversal",
            StrategyFamily::HourSwing => "hour_swing",
        };
        f.write_str(s)
    }
}

/// Classified market trend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    StrongUptrend,
    WeakUptrend,
    Sideways,
    WeakDowntrend,
    StrongDowntrend,
}

/// Exit parameters stamped on a signal by its detector and carried into the position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitPlan {
    /// Fraction of initial notional closed at TP1 (1.0 closes the whole position).
    pub tp1_fraction: f64,
    /// Trailing-stop distance in ATR units once TP1 has filled.
    pub trail_atr_multiple: f64,
    /// Bars held on the signal timeframe before a forced time exit.
    pub time_stop_bars: usize,
}

impl Default for ExitPlan {
    fn default() -> Self {
        Self {
            tp1_fraction: 0.3,
            trail_atr_multiple: 2.0,
            time_stop_bars: 48,
        }
    }
}

/// A detected trade setup.
///
/// Produced once per detector call and never mutated afterwards; the overlay
/// works on a copy of `exit_plan` when it tightens a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub family: StrategyFamily,
    /// Sub-strategy tag, e.g. `trend_pullback`, `spring`, `funding_extreme`.
    pub strategy: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    /// 0..=100.
    pub confidence: f64,
    pub risk_reward: Option<f64>,
    pub regime: Option<Regime>,
    /// ATR on the signal timeframe at detection time.
    pub atr: f64,
    pub exit_plan: ExitPlan,
    pub generated_at: DateTime<Utc>,
    pub diagnostics: BTreeMap<String, f64>,
}

impl TradingSignal {
    /// `|entry - stop| / entry`, or 0.0 for a degenerate entry.
    pub fn stop_distance_pct(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.entry_price - self.stop_loss).abs() / self.entry_price
    }

    /// Reward-to-risk to TP1.
    pub fn reward_risk(&self) -> Option<f64> {
        let risk = (self.entry_price - self.stop_loss).abs();
        if risk <= 0.0 {
            return None;
        }
        Some((self.take_profit_1 - self.entry_price).abs() / risk)
    }

    /// Reason the signal cannot be traded, if any: non-finite prices, zero ATR,
    /// zero stop distance, or stop/target on the wrong side of entry.
    pub fn invalid_reason(&self) -> Option<&'static str> {
        let prices = [self.entry_price, self.stop_loss, self.take_profit_1, self.atr];
        if prices.iter().any(|p| !p.is_finite()) {
            return Some("non_finite_price");
        }
        if self.atr <= 0.0 {
            return Some("zero_atr");
        }
        if self.stop_distance_pct() <= 0.0 {
            return Some("zero_stop_distance");
        }
        let d = self.direction.sign();
        if (self.entry_price - self.stop_loss) * d <= 0.0 {
            return Some("stop_wrong_side");
        }
        if (self.take_profit_1 - self.entry_price) * d <= 0.0 {
            return Some("target_wrong_side");
        }
        None
    }

    pub fn with_diagnostic(mut self, key: &str, value: f64) -> Self {
        self.diagnostics.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_signal(direction: Direction) -> TradingSignal {
        let (stop, tp1) = match direction {
            Direction::Long => (98.0, 104.0),
            Direction::Short => (102.0, 96.0),
        };
        TradingSignal {
            family: StrategyFamily::TrendRider,
            strategy: "trend_pullback".into(),
            symbol: "ETHUSDT".into(),
            timeframe: Timeframe::M15,
            direction,
            entry_price: 100.0,
            stop_loss: stop,
            take_profit_1: tp1,
            take_profit_2: None,
            confidence: 70.0,
            risk_reward: Some(2.0),
            regime: None,
            atr: 2.0,
            exit_plan: ExitPlan::default(),
            generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            diagnostics: BTreeMap::new(),
        }
    }

    #[test]
    fn stop_distance_and_reward_risk() {
        let s = sample_signal(Direction::Long);
        assert!((s.stop_distance_pct() - 0.02).abs() < 1e-12);
        assert!((s.reward_risk().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn valid_signals_pass() {
        assert_eq!(sample_signal(Direction::Long).invalid_reason(), None);
        assert_eq!(sample_signal(Direction::Short).invalid_reason(), None);
    }

    #[test]
    fn zero_stop_distance_is_invalid() {
        let mut s = sample_signal(Direction::Long);
        s.stop_loss = s.entry_price;
        assert_eq!(s.invalid_reason(), Some("zero_stop_distance"));
    }

    #[test]
    fn zero_atr_is_invalid() {
        let mut s = sample_signal(Direction::Short);
        s.atr = 0.0;
        assert_eq!(s.invalid_reason(), Some("zero_atr"));
    }

    #[test]
    fn wrong_side_stop_is_invalid() {
        let mut s = sample_signal(Direction::Short);
        s.stop_loss = 99.0;
        assert_eq!(s.invalid_reason(), Some("stop_wrong_side"));
    }

    #[test]
    fn direction_helpers() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
        assert_eq!(serde_json::to_string(&Direction::Short).unwrap(), "\"SHORT\"");
    }
}
