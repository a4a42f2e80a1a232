//! Position — one open (or closed) trade evolved by the lifecycle simulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::candle::Timeframe;
use super::signal::{Direction, ExitPlan, StrategyFamily};

/// Stable position identity, assigned in open order by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Terminal close reason. Every position ends with exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Sl,
    TrailingSl,
    Tp1Full,
    TimeStop,
    EndOfBacktest,
    Emergency,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Sl => "SL",
            CloseReason::TrailingSl => "TRAILING_SL",
            CloseReason::Tp1Full => "TP1_FULL",
            CloseReason::TimeStop => "TIME_STOP",
            CloseReason::EndOfBacktest => "END_OF_BACKTEST",
            CloseReason::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. `Opened` → `Partial` → `Closed`, or `Opened` → `Closed` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Opened,
    Partial,
    Closed(CloseReason),
}

/// A realized exit fill: the TP1 partial or the final close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitFill {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub notional: f64,
    /// Net of the commission charged on this fill.
    pub pnl: f64,
    pub commission: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub strategy: String,
    pub family: StrategyFamily,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub state: PositionState,

    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_notional: f64,
    pub remaining_notional: f64,
    pub leverage: u32,

    /// Active hard stop. Moves to entry on TP1 and never loosens.
    pub stop_price: f64,
    pub initial_stop: f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    pub tp1_hit: bool,
    /// Set when TP1 fills; ratchets toward price afterwards.
    pub trailing_stop: Option<f64>,
    pub exit_plan: ExitPlan,
    pub entry_atr: f64,

    /// Whole signal-timeframe bars elapsed since entry.
    pub bars_held: usize,
    pub exits: Vec<ExitFill>,
    /// Exit PnL net of commission, minus funding paid.
    pub realized_pnl: f64,
    pub commission_paid: f64,
    /// Positive = paid, negative = received.
    pub funding_paid: f64,
    pub slippage_cost: f64,
    /// End of the last whole funding period charged, counted from entry.
    pub funding_accrued_until: DateTime<Utc>,
    pub last_bar_close: DateTime<Utc>,
    pub last_price: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !matches!(self.state, PositionState::Closed(_))
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.state {
            PositionState::Closed(r) => Some(r),
            _ => None,
        }
    }

    pub fn exited_notional(&self) -> f64 {
        self.exits.iter().map(|p| p.notional).sum()
    }

    /// `remaining + Σ exits == initial` within a relative tolerance.
    pub fn notional_conserved(&self, rel_tol: f64) -> bool {
        let total = self.remaining_notional + self.exited_notional();
        (total - self.initial_notional).abs() <= rel_tol * self.initial_notional.abs().max(1.0)
    }

    /// The stop that would trigger right now: the tighter of hard and trailing.
    pub fn effective_stop(&self) -> f64 {
        match (self.trailing_stop, self.direction) {
            (Some(t), Direction::Long) => self.stop_price.max(t),
            (Some(t), Direction::Short) => self.stop_price.min(t),
            (None, _) => self.stop_price,
        }
    }

    /// True when the trailing stop, not the hard stop, is the binding level.
    pub fn trailing_is_binding(&self) -> bool {
        match (self.trailing_stop, self.direction) {
            (Some(t), Direction::Long) => t > self.stop_price,
            (Some(t), Direction::Short) => t < self.stop_price,
            (None, _) => false,
        }
    }

    /// Gross PnL of moving `notional` from entry to `price`.
    pub fn gross_pnl_at(&self, price: f64, notional: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) / self.entry_price * notional
    }

    /// Dollar risk at entry: notional times the initial stop distance.
    pub fn initial_risk_usd(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.initial_notional * (self.entry_price - self.initial_stop).abs() / self.entry_price
    }

    pub fn margin(&self) -> f64 {
        self.remaining_notional / f64::from(self.leverage.max(1))
    }
}
