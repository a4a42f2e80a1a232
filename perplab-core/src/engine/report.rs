//! End-of-run aggregates and the reporting sink.
//!
//! Metrics are pure functions over the closed-trade list; the engine supplies
//! balances and drawdown, which need the tick-by-tick path.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use super::RunReport;
use crate::domain::TradeRecord;

/// Aggregate performance of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub return_pct: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// `gross_profit / gross_loss`; `+inf` with winners and no losers.
    #[serde(with = "infinite_as_string")]
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub tp1_hit_rate: f64,
    pub avg_r_multiple: f64,
    pub max_consecutive_losses: usize,
    pub total_funding: f64,
    pub total_commission: f64,
    pub by_close_reason: BTreeMap<String, usize>,
}

impl PerformanceSummary {
    pub fn compute(trades: &[TradeRecord], initial_balance: f64, final_balance: f64, max_drawdown_pct: f64) -> Self {
        let wins = trades.iter().filter(|t| t.is_winner()).count();
        let losses = trades.iter().filter(|t| t.pnl < 0.0).count();
        let mut by_close_reason = BTreeMap::new();
        for t in trades {
            *by_close_reason.entry(t.close_reason.to_string()).or_insert(0) += 1;
        }
        Self {
            trade_count: trades.len(),
            wins,
            losses,
            win_rate: win_rate(trades),
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            initial_balance,
            final_balance,
            return_pct: if initial_balance > 0.0 {
                (final_balance - initial_balance) / initial_balance * 100.0
            } else {
                0.0
            },
            avg_win: mean_of(trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl)),
            avg_loss: mean_of(trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl)),
            gross_profit: gross_profit(trades),
            gross_loss: gross_loss(trades),
            profit_factor: profit_factor(trades),
            max_drawdown_pct,
            tp1_hit_rate: tp1_hit_rate(trades),
            avg_r_multiple: mean_of(trades.iter().map(|t| t.r_multiple)),
            max_consecutive_losses: max_consecutive_losses(trades),
            total_funding: trades.iter().map(|t| t.funding).sum(),
            total_commission: trades.iter().map(|t| t.commission).sum(),
            by_close_reason,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

pub fn gross_profit(trades: &[TradeRecord]) -> f64 {
    trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum()
}

/// Sum of losing PnL as a positive number.
pub fn gross_loss(trades: &[TradeRecord]) -> f64 {
    trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum()
}

/// `gross_profit / gross_loss`. Infinite when there are winners and no
/// losers, 0.0 when there are neither.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let profit = gross_profit(trades);
    let loss = gross_loss(trades);
    if loss > 0.0 {
        profit / loss
    } else if profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

pub fn tp1_hit_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.tp1_hit).count() as f64 / trades.len() as f64
}

/// Longest run of non-winning trades in close order.
pub fn max_consecutive_losses(trades: &[TradeRecord]) -> usize {
    let mut best = 0;
    let mut current = 0;
    for t in trades {
        if t.is_winner() {
            current = 0;
        } else {
            current += 1;
            best = best.max(current);
        }
    }
    best
}

/// `f64` that writes `+inf` as the string `"inf"` so the JSON stays valid.
mod infinite_as_string {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) if s == "inf" => Ok(f64::INFINITY),
            Repr::Text(s) => Err(D::Error::custom(format!("expected a number or \"inf\", got {s:?}"))),
        }
    }
}

/// Receives results as the engine produces them. Both hooks default to no-ops.
pub trait ReportSink {
    fn on_trade_closed(&mut self, _trade: &TradeRecord) {}

    fn on_run_complete(&mut self, _report: &RunReport) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {}
