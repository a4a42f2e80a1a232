//! Criterion benchmarks for PerpLab hot paths.
//!
//! Benchmarks:
//! 1. Indicator series over a 15m window (EMA, ATR, RSI, ADX, Bollinger, squeeze)
//! 2. Full detector scan of one symbol window
//! 3. Lifecycle simulator stepping a position through a path

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use perplab_core::arbitration::{ScanStats, SignalArbiter};
use perplab_core::detectors::{default_detectors, DetectionContext, MarketWindow};
use perplab_core::domain::{
    closes, resample, Candle, Direction, ExitPlan, PositionId, StrategyFamily, Timeframe, TradingSignal,
};
use perplab_core::indicators::{
    adx_series, atr_series, bollinger_width_series, ema_series, rsi_series, squeeze_series, AdxMode, SqueezeParams,
};
use perplab_core::lifecycle::{open_position, CostConfig, PositionSimulator};
use perplab_core::overlay::{OverlayConfig, PositionSize, RiskOverlay};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_candles(n: usize) -> Vec<Candle> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.07).sin() * 8.0 + i as f64 * 0.01;
            let open = close - 0.3;
            let open_time = t0 + Duration::minutes(15 * i as i64);
            Candle {
                symbol: "BTCUSDT".into(),
                timeframe: Timeframe::M15,
                open_time,
                close_time: open_time + Duration::minutes(15),
                open,
                high: close + 1.2,
                low: open - 1.2,
                close,
                volume: 1_000.0 + (i % 37) as f64 * 25.0,
                trade_count: None,
            }
        })
        .collect()
}

// ── 1. Indicators ────────────────────────────────────────────────────

fn bench_indicators(c: &mut Criterion) {
    let mut group = c.benchmark_group("indicators");
    for n in [300usize, 3_000] {
        let candles = make_candles(n);
        let prices = closes(&candles);
        group.bench_with_input(BenchmarkId::new("ema_20", n), &prices, |b, p| {
            b.iter(|| ema_series(black_box(p), 20))
        });
        group.bench_with_input(BenchmarkId::new("rsi_14", n), &prices, |b, p| {
            b.iter(|| rsi_series(black_box(p), 14))
        });
        group.bench_with_input(BenchmarkId::new("atr_14", n), &candles, |b, c| {
            b.iter(|| atr_series(black_box(c), 14))
        });
        group.bench_with_input(BenchmarkId::new("adx_14", n), &candles, |b, c| {
            b.iter(|| adx_series(black_box(c), 14, AdxMode::WilderSmoothed))
        });
        group.bench_with_input(BenchmarkId::new("bb_width_20", n), &candles, |b, c| {
            b.iter(|| bollinger_width_series(black_box(c), 20, 2.0))
        });
        group.bench_with_input(BenchmarkId::new("squeeze", n), &candles, |b, c| {
            let params = SqueezeParams::default();
            b.iter(|| squeeze_series(black_box(c), &params))
        });
    }
    group.finish();
}

// ── 2. Detector scan ─────────────────────────────────────────────────

fn bench_detector_scan(c: &mut Criterion) {
    let m15 = make_candles(1_600);
    let now = m15[m15.len() - 1].close_time;
    let price = m15[m15.len() - 1].close;
    let window = MarketWindow::new("BTCUSDT", now, price)
        .with_frame(Timeframe::H1, resample(&m15, Timeframe::H1))
        .with_frame(Timeframe::H4, resample(&m15, Timeframe::H4))
        .with_frame(Timeframe::M15, m15[m15.len() - 300..].to_vec());
    let mut universe = BTreeMap::new();
    universe.insert(window.symbol.clone(), window.clone());

    let arbiter = SignalArbiter::new(&default_detectors());
    let overlay = RiskOverlay::new(OverlayConfig::default());

    c.bench_function("arbitrate_default_detectors", |b| {
        b.iter(|| {
            let mut stats = ScanStats::default();
            let ctx = DetectionContext::new(&window, &universe);
            black_box(arbiter.arbitrate(&ctx, &overlay, &mut stats))
        })
    });
}

// ── 3. Lifecycle ─────────────────────────────────────────────────────

fn bench_lifecycle(c: &mut Criterion) {
    let bars = make_candles(500);
    let entry = &bars[0];
    let signal = TradingSignal {
        family: StrategyFamily::TrendRider,
        strategy: "trend_pullback".into(),
        symbol: "BTCUSDT".into(),
        timeframe: Timeframe::M15,
        direction: Direction::Long,
        entry_price: entry.close,
        stop_loss: entry.close - 20.0,
        take_profit_1: entry.close + 5.0,
        take_profit_2: None,
        confidence: 60.0,
        risk_reward: None,
        regime: None,
        atr: 1.5,
        exit_plan: ExitPlan {
            time_stop_bars: 0,
            ..ExitPlan::default()
        },
        generated_at: entry.close_time,
        diagnostics: BTreeMap::new(),
    };
    let size = PositionSize {
        notional: 5_000.0,
        leverage: 3,
        margin: 5_000.0 / 3.0,
        risk_usd: 50.0,
    };
    let sim = PositionSimulator::new(CostConfig::default());

    c.bench_function("simulate_500_bars", |b| {
        b.iter(|| {
            let mut pos = open_position(PositionId(1), &signal, &size, entry.close_time);
            for bar in &bars[1..] {
                sim.step(&mut pos, black_box(bar));
            }
            black_box(pos.realized_pnl)
        })
    });
}

criterion_group!(benches, bench_indicators, bench_detector_scan, bench_lifecycle);
criterion_main!(benches);
