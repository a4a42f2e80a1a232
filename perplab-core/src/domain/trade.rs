//! Closed-trade record emitted to the reporting sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candle::Timeframe;
use super::position::{CloseReason, Position, PositionId};
use super::signal::{Direction, StrategyFamily};

/// A completed round trip. Built once, when the position closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: PositionId,
    pub symbol: String,
    pub strategy: String,
    pub family: StrategyFamily,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub close_reason: CloseReason,
    pub initial_notional: f64,
    pub leverage: u32,
    /// Net PnL: partials + final segment - commission - funding.
    pub pnl: f64,
    pub commission: f64,
    pub funding: f64,
    pub slippage: f64,
    pub tp1_hit: bool,
    pub bars_held: usize,
    /// `pnl / initial risk`; 0.0 when risk is zero.
    pub r_multiple: f64,
}

impl TradeRecord {
    /// Build from a closed position. Returns `None` if the position is still open.
    pub fn from_position(position: &Position, exit_time: DateTime<Utc>, exit_price: f64) -> Option<Self> {
        let close_reason = position.close_reason()?;
        let risk = position.initial_risk_usd();
        let r_multiple = if risk > 0.0 {
            position.realized_pnl / risk
        } else {
            0.0
        };
        Some(Self {
            position_id: position.id,
            symbol: position.symbol.clone(),
            strategy: position.strategy.clone(),
            family: position.family,
            timeframe: position.timeframe,
            direction: position.direction,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time,
            exit_price,
            close_reason,
            initial_notional: position.initial_notional,
            leverage: position.leverage,
            pnl: position.realized_pnl,
            commission: position.commission_paid,
            funding: position.funding_paid,
            slippage: position.slippage_cost,
            tp1_hit: position.tp1_hit,
            bars_held: position.bars_held,
            r_multiple,
        })
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn holding_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_minutes() as f64 / 60.0
    }
}
