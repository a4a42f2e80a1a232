//! Look-ahead contamination tests for the indicator library.
//!
//! No indicator value at candle t may depend on candles after t.
//!
//! Method: compute on a truncated window (candles 0..150) and on the full
//! window (0..300). Values over 0..150 must be identical; any difference means
//! future data leaked into the past.

use chrono::{Duration, TimeZone, Utc};
use perplab_core::domain::{closes, Candle, Timeframe};
use perplab_core::indicators::*;

/// Deterministic random walk on 15m candles.
fn make_test_candles(n: usize) -> Vec<Candle> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut price = 100.0;
    (0..n)
        .map(|i| {
            let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let change = ((seed >> 33) % 200) as f64 / 100.0 - 1.0;
            let open = price;
            price = (price + change).max(10.0);
            let close = price;
            let open_time = t0 + Duration::minutes(15 * i as i64);
            Candle {
                symbol: "TESTUSDT".into(),
                timeframe: Timeframe::M15,
                open_time,
                close_time: open_time + Duration::minutes(15),
                open,
                high: open.max(close) + 0.4,
                low: open.min(close) - 0.4,
                close,
                volume: 1_000.0 + ((seed >> 40) % 500) as f64,
                trade_count: None,
            }
        })
        .collect()
}

const FULL: usize = 300;
const TRUNCATED: usize = 150;

fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

fn assert_series_prefix(name: &str, compute: impl Fn(&[Candle]) -> Vec<f64>) {
    let candles = make_test_candles(FULL);
    let full = compute(&candles);
    let truncated = compute(&candles[..TRUNCATED]);
    assert_eq!(full.len(), FULL, "{name}: full length");
    assert_eq!(truncated.len(), TRUNCATED, "{name}: truncated length");
    for i in 0..TRUNCATED {
        assert!(
            same(truncated[i], full[i]),
            "{name}: look-ahead at index {i}: truncated={} full={}",
            truncated[i],
            full[i]
        );
    }
    assert!(
        full[TRUNCATED..].iter().any(|v| v.is_finite()),
        "{name}: never produced a value"
    );
}

#[test]
fn ema_and_sma_have_no_lookahead() {
    assert_series_prefix("ema_20", |c| ema_series(&closes(c), 20));
    assert_series_prefix("sma_20", |c| sma_series(&closes(c), 20));
}

#[test]
fn rsi_has_no_lookahead() {
    assert_series_prefix("rsi_14", |c| rsi_series(&closes(c), 14));
}

#[test]
fn atr_has_no_lookahead() {
    assert_series_prefix("atr_14", |c| atr_series(c, 14));
}

#[test]
fn adx_has_no_lookahead_in_either_mode() {
    assert_series_prefix("adx_dx", |c| adx_series(c, 14, AdxMode::SingleBarDx));
    assert_series_prefix("adx_wilder", |c| adx_series(c, 14, AdxMode::WilderSmoothed));
}

#[test]
fn bands_have_no_lookahead() {
    assert_series_prefix("bb_width", |c| bollinger_width_series(c, 20, 2.0));
    assert_series_prefix("keltner_upper", |c| {
        keltner_series(c, 20, 20, 1.5)
            .into_iter()
            .map(|k| k.map_or(f64::NAN, |k| k.upper))
            .collect()
    });
}

#[test]
fn cvd_has_no_lookahead() {
    assert_series_prefix("cvd", cvd_series);
}

#[test]
fn squeeze_flags_have_no_lookahead() {
    let candles = make_test_candles(FULL);
    let params = SqueezeParams::default();
    let full = squeeze_series(&candles, &params);
    let truncated = squeeze_series(&candles[..TRUNCATED], &params);
    assert_eq!(&full[..TRUNCATED], truncated.as_slice());
}

#[test]
fn indicator_trait_latest_matches_series_at_cut() {
    let candles = make_test_candles(FULL);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(Ema::new(20)),
        Box::new(Sma::new(50)),
        Box::new(Atr::new(14)),
        Box::new(Rsi::new(14)),
        Box::new(Adx::new(14, AdxMode::SingleBarDx)),
    ];
    for ind in &indicators {
        let full = ind.compute(&candles);
        let latest = ind.latest(&candles[..TRUNCATED]);
        assert_eq!(
            latest,
            Some(full[TRUNCATED - 1]),
            "{}: latest on the prefix differs from the full series",
            ind.name()
        );
    }
}
