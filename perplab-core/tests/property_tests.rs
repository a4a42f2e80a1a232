//! Property tests for lifecycle and data invariants.
//!
//! Uses proptest to verify:
//! 1. Trailing monotonicity: once TP1 fills, the effective stop never loosens
//! 2. Notional conservation: remaining + Σ exits == initial after every bar
//! 3. Exactly one terminal close reason per position
//! 4. Funding sign: longs pay positive funding, shorts receive it
//! 5. Candle invariants survive resampling

use chrono::{DateTime, Duration, TimeZone, Utc};
use perplab_core::domain::{
    resample, Candle, CloseReason, Direction, ExitPlan, FundingPoint, PositionId, StrategyFamily, Timeframe,
    TradingSignal,
};
use perplab_core::lifecycle::{funding_over, funding_payment, open_position, CostConfig, PositionSimulator};
use perplab_core::overlay::PositionSize;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

fn signal(direction: Direction, trail: f64, tp1_fraction: f64) -> TradingSignal {
    let sign = direction.sign();
    TradingSignal {
        family: StrategyFamily::TrendRider,
        strategy: "trend_pullback".into(),
        symbol: "ETHUSDT".into(),
        timeframe: Timeframe::M15,
        direction,
        entry_price: 100.0,
        stop_loss: 100.0 - sign * 3.0,
        take_profit_1: 100.0 + sign * 2.0,
        take_profit_2: None,
        confidence: 60.0,
        risk_reward: None,
        regime: None,
        atr: 1.0,
        exit_plan: ExitPlan {
            tp1_fraction,
            trail_atr_multiple: trail,
            time_stop_bars: 0,
        },
        generated_at: t0(),
        diagnostics: BTreeMap::new(),
    }
}

fn size() -> PositionSize {
    PositionSize {
        notional: 1_000.0,
        leverage: 2,
        margin: 500.0,
        risk_usd: 30.0,
    }
}

/// Bars from a list of (close delta, wick) pairs, starting at 100.
fn path(moves: &[(f64, f64)]) -> Vec<Candle> {
    let mut price = 100.0_f64;
    moves
        .iter()
        .enumerate()
        .map(|(i, &(delta, wick))| {
            let open = price;
            price = (price + delta).max(1.0);
            let open_time = t0() + Duration::minutes(15 * i as i64);
            Candle {
                symbol: "ETHUSDT".into(),
                timeframe: Timeframe::M15,
                open_time,
                close_time: open_time + Duration::minutes(15),
                open,
                high: open.max(price) + wick,
                low: open.min(price) - wick,
                close: price,
                volume: 1_000.0,
                trade_count: None,
            }
        })
        .collect()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Long), Just(Direction::Short)]
}

fn arb_moves() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((-2.5..2.5_f64, 0.0..1.5_f64), 1..60)
}

// ── 1–3. Lifecycle invariants ────────────────────────────────────────

proptest! {
    #[test]
    fn stop_never_loosens_after_tp1(
        direction in arb_direction(),
        moves in arb_moves(),
        trail in 0.5..4.0_f64,
    ) {
        let sim = PositionSimulator::new(CostConfig::default());
        let sig = signal(direction, trail, 0.3);
        let mut pos = open_position(PositionId(1), &sig, &size(), t0());
        let mut last_stop: Option<f64> = None;
        for bar in path(&moves) {
            sim.step(&mut pos, &bar);
            if !pos.is_open() {
                break;
            }
            if pos.tp1_hit {
                let stop = pos.effective_stop();
                if let Some(prev) = last_stop {
                    match direction {
                        Direction::Long => prop_assert!(stop >= prev, "long stop loosened {prev} -> {stop}"),
                        Direction::Short => prop_assert!(stop <= prev, "short stop loosened {prev} -> {stop}"),
                    }
                }
                // Breakeven or better once TP1 has filled.
                prop_assert!((stop - pos.entry_price) * direction.sign() >= 0.0);
                last_stop = Some(stop);
            }
        }
    }

    #[test]
    fn notional_is_conserved_on_every_bar(
        direction in arb_direction(),
        moves in arb_moves(),
        fraction in 0.05..1.0_f64,
    ) {
        let sim = PositionSimulator::new(CostConfig::default());
        let sig = signal(direction, 2.0, fraction);
        let mut pos = open_position(PositionId(7), &sig, &size(), t0());
        for bar in path(&moves) {
            sim.step(&mut pos, &bar);
            prop_assert!(pos.notional_conserved(1e-9));
            prop_assert!(pos.remaining_notional >= 0.0);
        }
        let end = t0() + Duration::days(1);
        sim.force_close(&mut pos, CloseReason::EndOfBacktest, end, 100.0);
        prop_assert!(pos.notional_conserved(1e-9));
        prop_assert_eq!(pos.remaining_notional, 0.0);
    }

    #[test]
    fn exactly_one_terminal_reason(
        direction in arb_direction(),
        moves in arb_moves(),
    ) {
        let sim = PositionSimulator::new(CostConfig::default());
        let sig = signal(direction, 2.0, 0.3);
        let mut pos = open_position(PositionId(3), &sig, &size(), t0());
        let mut closes = 0;
        for bar in path(&moves) {
            if sim.step(&mut pos, &bar).close_reason().is_some() {
                closes += 1;
            }
        }
        let forced = sim.force_close(&mut pos, CloseReason::EndOfBacktest, t0() + Duration::days(2), 100.0);
        if forced.close_reason().is_some() {
            closes += 1;
        }
        prop_assert_eq!(closes, 1);
        prop_assert!(!pos.is_open());
        prop_assert!(pos.close_reason().is_some());
    }
}

// ── 4. Funding sign ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn longs_pay_and_shorts_receive_positive_funding(
        rate in 0.000_001..0.01_f64,
        notional in 1.0..1e6_f64,
    ) {
        prop_assert!(funding_payment(Direction::Long, rate, notional) > 0.0);
        prop_assert!(funding_payment(Direction::Short, rate, notional) < 0.0);
        prop_assert!(funding_payment(Direction::Long, -rate, notional) < 0.0);
        let long = funding_payment(Direction::Long, rate, notional);
        let short = funding_payment(Direction::Short, rate, notional);
        prop_assert!((long + short).abs() <= 1e-12 * notional);
    }

    #[test]
    fn accrued_funding_matches_settlement_sum(
        rates in prop::collection::vec(-0.002..0.002_f64, 1..12),
        direction in arb_direction(),
    ) {
        let sim = PositionSimulator::new(CostConfig::frictionless());
        let sig = signal(direction, 2.0, 0.3);
        let mut pos = open_position(PositionId(9), &sig, &size(), t0());
        let points: Vec<FundingPoint> = rates
            .iter()
            .enumerate()
            .map(|(i, &rate)| FundingPoint { time: t0() + Duration::hours(8 * (i as i64 + 1)), rate })
            .collect();
        let now = t0() + Duration::hours(8 * rates.len() as i64);
        let outcome = sim.accrue_funding(&mut pos, &points, now);
        let expected = funding_over(direction, &points, 1_000.0);
        prop_assert!((pos.funding_paid - expected).abs() < 1e-9);
        prop_assert!((outcome.realized + expected).abs() < 1e-9);

        // Accruing again over the same span charges nothing.
        let again = sim.accrue_funding(&mut pos, &points, now);
        prop_assert_eq!(again.realized, 0.0);
    }
}

// ── 5. Candle invariants ─────────────────────────────────────────────

proptest! {
    #[test]
    fn resampled_candles_stay_sane(moves in prop::collection::vec((-2.5..2.5_f64, 0.0..1.5_f64), 1..200)) {
        let m15 = path(&moves);
        prop_assert!(m15.iter().all(Candle::is_sane));
        for tf in [Timeframe::H1, Timeframe::H4] {
            let higher = resample(&m15, tf);
            prop_assert_eq!(higher.len(), m15.len() / (tf.minutes() as usize / 15));
            for c in &higher {
                prop_assert!(c.is_sane(), "{tf} candle not sane: {c:?}");
                prop_assert_eq!(c.close_time - c.open_time, tf.duration());
            }
            prop_assert!(higher.windows(2).all(|w| w[0].close_time < w[1].close_time));
        }
    }
}
