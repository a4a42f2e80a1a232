//! Position lifecycle state machine.
//!
//! `Opened` → `Partial` → `Closed`. Each bar runs the checks in a fixed order:
//!
//! 1. stop or trailing-stop breach (`SL` / `TRAILING_SL`)
//! 2. TP1 touch while `Opened`
//! 3. trailing ratchet while `Partial`
//! 4. time stop
//!
//! End of data is not a bar; the engine calls [`PositionSimulator::force_close`].
//! A bar that touches both the stop and TP1 is resolved as a stop: the
//! intrabar path is unknown and the worst case is assumed.

use chrono::{DateTime, Utc};

use super::cost::{funding_payment, CostConfig};
use crate::domain::{
    funding_interval, Candle, CloseReason, Direction, ExitFill, FundingPoint, Position, PositionId, PositionState,
    TradingSignal,
};
use crate::overlay::PositionSize;

/// Something that happened to a position during one step.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Tp1Filled { price: f64, notional: f64, pnl: f64 },
    TrailingMoved { from: Option<f64>, to: f64 },
    FundingSettled { periods: usize, paid: f64 },
    Closed { reason: CloseReason, price: f64, pnl: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Change in the position's realized PnL during this step.
    pub realized: f64,
    pub events: Vec<LifecycleEvent>,
}

impl StepOutcome {
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.events.iter().find_map(|e| match e {
            LifecycleEvent::Closed { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    fn absorb(&mut self, other: StepOutcome) {
        self.realized += other.realized;
        self.events.extend(other.events);
    }
}

/// Build a fresh position from an accepted, sized signal. Entry fills at the
/// signal price.
pub fn open_position(id: PositionId, signal: &TradingSignal, size: &PositionSize, now: DateTime<Utc>) -> Position {
    Position {
        id,
        symbol: signal.symbol.clone(),
        strategy: signal.strategy.clone(),
        family: signal.family,
        timeframe: signal.timeframe,
        direction: signal.direction,
        state: PositionState::Opened,
        entry_time: now,
        entry_price: signal.entry_price,
        initial_notional: size.notional,
        remaining_notional: size.notional,
        leverage: size.leverage,
        stop_price: signal.stop_loss,
        initial_stop: signal.stop_loss,
        take_profit_1: signal.take_profit_1,
        take_profit_2: signal.take_profit_2,
        tp1_hit: false,
        trailing_stop: None,
        exit_plan: signal.exit_plan,
        entry_atr: signal.atr,
        bars_held: 0,
        exits: Vec::new(),
        realized_pnl: 0.0,
        commission_paid: 0.0,
        funding_paid: 0.0,
        slippage_cost: 0.0,
        funding_accrued_until: now,
        last_bar_close: now,
        last_price: signal.entry_price,
    }
}

/// Stateless apart from the cost model; positions carry all lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct PositionSimulator {
    cost: CostConfig,
}

impl PositionSimulator {
    pub fn new(cost: CostConfig) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> &CostConfig {
        &self.cost
    }

    /// Charge each 8-hour period held that has fully elapsed by `now`, on the
    /// notional still open. Periods are counted from entry; a period is
    /// charged at the last settlement that falls inside it, and a period with
    /// no settlement costs nothing. Callers may pass a wider slice.
    pub fn accrue_funding(&self, position: &mut Position, settlements: &[FundingPoint], now: DateTime<Utc>) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        if !position.is_open() {
            return outcome;
        }
        let mut periods = 0;
        let mut paid = 0.0;
        while position.funding_accrued_until + funding_interval() <= now {
            let start = position.funding_accrued_until;
            let end = start + funding_interval();
            if let Some(p) = settlements.iter().rev().find(|p| p.time > start && p.time <= end) {
                paid += funding_payment(position.direction, p.rate, position.remaining_notional);
            }
            position.funding_accrued_until = end;
            periods += 1;
        }
        if periods == 0 {
            return outcome;
        }
        position.funding_paid += paid;
        position.realized_pnl -= paid;
        outcome.realized = -paid;
        outcome.events.push(LifecycleEvent::FundingSettled { periods, paid });
        tracing::debug!(id = %position.id, symbol = %position.symbol, periods, paid, "funding settled");
        outcome
    }

    /// Advance an open position through one closed bar of its symbol.
    pub fn step(&self, position: &mut Position, bar: &Candle) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        if !position.is_open() || bar.close_time <= position.entry_time {
            return outcome;
        }
        position.last_price = bar.close;
        position.last_bar_close = bar.close_time;
        let elapsed = (bar.close_time - position.entry_time).num_minutes();
        position.bars_held = (elapsed / position.timeframe.minutes()).max(0) as usize;

        let sign = position.direction.sign();

        let stop = position.effective_stop();
        let breached = match position.direction {
            Direction::Long => bar.low <= stop,
            Direction::Short => bar.high >= stop,
        };
        if breached {
            let level = match position.direction {
                Direction::Long if self.cost.gap_fills_at_open => stop.min(bar.open),
                Direction::Short if self.cost.gap_fills_at_open => stop.max(bar.open),
                _ => stop,
            };
            let reason = if position.trailing_is_binding() {
                CloseReason::TrailingSl
            } else {
                CloseReason::Sl
            };
            outcome.absorb(self.close(position, reason, bar.close_time, level));
            return outcome;
        }

        if position.state == PositionState::Opened {
            let tp1 = position.take_profit_1;
            let touched = match position.direction {
                Direction::Long => bar.high >= tp1,
                Direction::Short => bar.low <= tp1,
            };
            if touched {
                outcome.absorb(self.fill_tp1(position, bar));
                if !position.is_open() {
                    return outcome;
                }
            }
        } else if position.state == PositionState::Partial {
            let candidate = bar.close - sign * position.entry_atr * position.exit_plan.trail_atr_multiple;
            let from = position.trailing_stop;
            let to = match (from, position.direction) {
                (Some(t), Direction::Long) => t.max(candidate),
                (Some(t), Direction::Short) => t.min(candidate),
                (None, _) => candidate,
            };
            if from != Some(to) {
                tracing::debug!(id = %position.id, symbol = %position.symbol, ?from, to, "trailing stop ratcheted");
                position.trailing_stop = Some(to);
                outcome.events.push(LifecycleEvent::TrailingMoved { from, to });
            }
        }

        let limit = position.exit_plan.time_stop_bars;
        if limit > 0 && position.bars_held >= limit {
            outcome.absorb(self.close(position, CloseReason::TimeStop, bar.close_time, bar.close));
        }
        outcome
    }

    /// Close whatever is left at `price` (slippage applied), e.g. at end of data.
    pub fn force_close(
        &self,
        position: &mut Position,
        reason: CloseReason,
        time: DateTime<Utc>,
        price: f64,
    ) -> StepOutcome {
        if !position.is_open() {
            return StepOutcome::default();
        }
        self.close(position, reason, time, price)
    }

    fn fill_tp1(&self, position: &mut Position, bar: &Candle) -> StepOutcome {
        let price = position.take_profit_1;
        let fraction = position.exit_plan.tp1_fraction.clamp(0.0, 1.0);
        let notional = (position.initial_notional * fraction).min(position.remaining_notional);
        let commission = self.cost.commission(notional);
        let pnl = position.gross_pnl_at(price, notional) - commission;

        position.exits.push(ExitFill {
            time: bar.close_time,
            price,
            notional,
            pnl,
            commission,
        });
        position.remaining_notional -= notional;
        position.realized_pnl += pnl;
        position.commission_paid += commission;
        position.tp1_hit = true;

        let mut outcome = StepOutcome {
            realized: pnl,
            events: vec![LifecycleEvent::Tp1Filled { price, notional, pnl }],
        };
        tracing::info!(
            id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy,
            price,
            notional,
            pnl,
            "tp1 filled"
        );

        if position.remaining_notional <= position.initial_notional * 1e-12 {
            position.remaining_notional = 0.0;
            outcome.absorb(self.finish(position, CloseReason::Tp1Full, bar.close_time, price, 0.0));
            return outcome;
        }

        position.stop_price = match position.direction {
            Direction::Long => position.stop_price.max(position.entry_price),
            Direction::Short => position.stop_price.min(position.entry_price),
        };
        let trail = bar.close - position.direction.sign() * position.entry_atr * position.exit_plan.trail_atr_multiple;
        position.trailing_stop = Some(trail);
        position.state = PositionState::Partial;
        outcome.events.push(LifecycleEvent::TrailingMoved { from: None, to: trail });
        outcome
    }

    /// Market exit of the remaining notional.
    fn close(&self, position: &mut Position, reason: CloseReason, time: DateTime<Utc>, price: f64) -> StepOutcome {
        let fill = self.cost.exit_price(position.direction, price, position.entry_atr);
        self.settle(position, reason, time, price, fill)
    }

    /// Close the remainder at a fill that already happened elsewhere (a live
    /// emergency close). No slippage is added on top.
    pub fn close_at_fill(&self, position: &mut Position, reason: CloseReason, time: DateTime<Utc>, fill: f64) -> StepOutcome {
        if !position.is_open() {
            return StepOutcome::default();
        }
        self.settle(position, reason, time, fill, fill)
    }

    fn settle(
        &self,
        position: &mut Position,
        reason: CloseReason,
        time: DateTime<Utc>,
        reference: f64,
        fill: f64,
    ) -> StepOutcome {
        let notional = position.remaining_notional;
        let slippage = position.gross_pnl_at(reference, notional) - position.gross_pnl_at(fill, notional);
        let commission = self.cost.commission(notional);
        let pnl = position.gross_pnl_at(fill, notional) - commission;

        position.exits.push(ExitFill {
            time,
            price: fill,
            notional,
            pnl,
            commission,
        });
        position.remaining_notional = 0.0;
        position.realized_pnl += pnl;
        position.commission_paid += commission;
        position.slippage_cost += slippage;
        position.last_price = reference;
        self.finish(position, reason, time, fill, pnl)
    }

    fn finish(&self, position: &mut Position, reason: CloseReason, time: DateTime<Utc>, price: f64, pnl: f64) -> StepOutcome {
        position.state = PositionState::Closed(reason);
        position.last_bar_close = time;
        tracing::info!(
            id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy,
            reason = %reason,
            price,
            total_pnl = position.realized_pnl,
            "position closed"
        );
        StepOutcome {
            realized: pnl,
            events: vec![LifecycleEvent::Closed { reason, price, pnl }],
        }
    }
}
