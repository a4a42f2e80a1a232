//! Candle — the fundamental market data unit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Candle interval. Ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeframe '{0}'")]
pub struct UnknownTimeframe(pub String);

impl FromStr for Timeframe {
    type Err = UnknownTimeframe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTimeframe(s.to_string()))
    }
}

/// OHLCV candle for a single symbol on a single timeframe.
///
/// Sequences are ordered ascending by `close_time` per (symbol, timeframe).
/// Consumers are never handed candles whose `close_time` is after the
/// simulated "now"; the replay provider enforces that cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub trade_count: Option<u64>,
}

/// Why a candle failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("{symbol} {timeframe} @ {close_time}: non-finite OHLCV field")]
    NonFinite {
        symbol: String,
        timeframe: Timeframe,
        close_time: DateTime<Utc>,
    },
    #[error("{symbol} {timeframe} @ {close_time}: high/low do not bound open/close")]
    BadRange {
        symbol: String,
        timeframe: Timeframe,
        close_time: DateTime<Utc>,
    },
    #[error("{symbol} {timeframe} @ {close_time}: close_time must be after open_time")]
    BadTimes {
        symbol: String,
        timeframe: Timeframe,
        close_time: DateTime<Utc>,
    },
    #[error("{symbol} {timeframe}: candles out of order at {close_time}")]
    OutOfOrder {
        symbol: String,
        timeframe: Timeframe,
        close_time: DateTime<Utc>,
    },
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Position of the close within the bar range: 0.0 at the low, 1.0 at the high.
    /// A zero-range bar reports 0.5.
    pub fn close_location(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            0.5
        } else {
            (self.close - self.low) / range
        }
    }

    /// Check the OHLC invariants: `high >= max(open, close)`, `low <= min(open, close)`,
    /// `close_time > open_time`, all fields finite.
    pub fn validate(&self) -> Result<(), CandleError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CandleError::NonFinite {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                close_time: self.close_time,
            });
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(CandleError::BadRange {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                close_time: self.close_time,
            });
        }
        if self.close_time <= self.open_time {
            return Err(CandleError::BadTimes {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                close_time: self.close_time,
            });
        }
        Ok(())
    }

    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Validate a whole series: every candle sane, strictly ascending close times.
pub fn validate_series(candles: &[Candle]) -> Result<(), CandleError> {
    for (i, candle) in candles.iter().enumerate() {
        candle.validate()?;
        if i > 0 && candles[i - 1].close_time >= candle.close_time {
            return Err(CandleError::OutOfOrder {
                symbol: candle.symbol.clone(),
                timeframe: candle.timeframe,
                close_time: candle.close_time,
            });
        }
    }
    Ok(())
}

/// Closing prices of a candle slice.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Aggregate an ascending series into `target` candles aligned to multiples
/// of the target duration since the Unix epoch.
///
/// Only complete buckets are emitted: a bucket is kept when its last source
/// candle closes exactly on the bucket boundary, so a trailing partial bucket
/// never leaks into the output.
pub fn resample(candles: &[Candle], target: Timeframe) -> Vec<Candle> {
    let span = target.minutes() * 60;
    let mut out: Vec<Candle> = Vec::new();
    let mut current: Option<Candle> = None;
    for c in candles {
        let start = c.open_time.timestamp().div_euclid(span) * span;
        let Some(open_time) = DateTime::<Utc>::from_timestamp(start, 0) else {
            continue;
        };
        match current.as_mut() {
            Some(bucket) if bucket.open_time == open_time => {
                bucket.high = bucket.high.max(c.high);
                bucket.low = bucket.low.min(c.low);
                bucket.close = c.close;
                bucket.volume += c.volume;
                bucket.trade_count = match (bucket.trade_count, c.trade_count) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
                bucket.close_time = c.close_time;
            }
            _ => {
                if let Some(done) = current.take().filter(|b| b.close_time == b.open_time + target.duration()) {
                    out.push(done);
                }
                current = Some(Candle {
                    symbol: c.symbol.clone(),
                    timeframe: target,
                    open_time,
                    close_time: c.close_time,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                    trade_count: c.trade_count,
                });
            }
        }
    }
    if let Some(done) = current.filter(|b| b.close_time == b.open_time + target.duration()) {
        out.push(done);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle() -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M15,
            open_time,
            close_time: open_time + Timeframe::M15.duration(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 5_000.0,
            trade_count: Some(120),
        }
    }

    #[test]
    fn candle_is_sane() {
        assert!(sample_candle().is_sane());
    }

    #[test]
    fn rejects_high_below_close() {
        let mut c = sample_candle();
        c.high = 102.0;
        assert!(matches!(c.validate(), Err(CandleError::BadRange { .. })));
    }

    #[test]
    fn rejects_inverted_times() {
        let mut c = sample_candle();
        c.close_time = c.open_time;
        assert!(matches!(c.validate(), Err(CandleError::BadTimes { .. })));
    }

    #[test]
    fn rejects_nan() {
        let mut c = sample_candle();
        c.volume = f64::NAN;
        assert!(!c.is_sane());
    }

    #[test]
    fn wick_and_body_geometry() {
        let c = sample_candle();
        assert_eq!(c.body(), 3.0);
        assert_eq!(c.range(), 7.0);
        assert_eq!(c.upper_wick(), 2.0);
        assert_eq!(c.lower_wick(), 2.0);
        assert!((c.close_location() - 5.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn series_must_ascend() {
        let a = sample_candle();
        let b = a.clone();
        assert!(matches!(
            validate_series(&[a, b]),
            Err(CandleError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn timeframe_parse_and_display() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!(Timeframe::M15.to_string(), "15m");
        assert!("7m".parse::<Timeframe>().is_err());
        assert!(Timeframe::M15 < Timeframe::H1);
    }

    #[test]
    fn timeframe_serde_uses_short_names() {
        let json = serde_json::to_string(&Timeframe::H1).unwrap();
        assert_eq!(json, "\"1h\"");
        let tf: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(tf, Timeframe::M15);
    }

    #[test]
    fn resample_keeps_only_complete_buckets() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        // Six 15m candles: one full hour plus half of the next.
        let m15: Vec<Candle> = (0..6)
            .map(|i| {
                let open_time = start + Timeframe::M15.duration() * i;
                let base = 100.0 + f64::from(i);
                Candle {
                    symbol: "BTCUSDT".into(),
                    timeframe: Timeframe::M15,
                    open_time,
                    close_time: open_time + Timeframe::M15.duration(),
                    open: base,
                    high: base + 2.0,
                    low: base - 1.0,
                    close: base + 0.5,
                    volume: 10.0,
                    trade_count: Some(3),
                }
            })
            .collect();
        let h1 = resample(&m15, Timeframe::H1);
        assert_eq!(h1.len(), 1);
        let bar = &h1[0];
        assert_eq!(bar.timeframe, Timeframe::H1);
        assert_eq!(bar.open_time, start);
        assert_eq!(bar.close_time, start + Timeframe::H1.duration());
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 103.5);
        assert_eq!(bar.volume, 40.0);
        assert_eq!(bar.trade_count, Some(12));
        assert!(bar.is_sane());
    }
}
