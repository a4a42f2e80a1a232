//! Market data provider contract and the in-memory replay implementation.
//!
//! The engine asks for data synchronously each tick and gets either a value or
//! a typed [`DataUnavailable`]; a missing value means "skip this symbol this
//! tick", never a failed run. Live and replay sources share the trait.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::domain::{Candle, FundingPoint, FundingRateSeries, Timeframe};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUnavailable {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("no {timeframe} candles for {symbol} yet")]
    NoCandles { symbol: String, timeframe: Timeframe },

    #[error("no price for {0}")]
    NoPrice(String),

    #[error("no funding data for {0}")]
    NoFunding(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// Source of market data as seen at the provider's current time.
///
/// Nothing returned may describe an instant after [`current_time`](Self::current_time).
pub trait MarketDataProvider {
    /// The most recent `count` closed candles, oldest first.
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>, DataUnavailable>;

    fn current_price(&self, symbol: &str) -> Result<f64, DataUnavailable>;

    /// Latest settled funding rate.
    fn funding_rate(&self, symbol: &str) -> Result<f64, DataUnavailable>;

    /// The last `count` settled rates, oldest first.
    fn funding_history(&self, symbol: &str, count: usize) -> Result<Vec<f64>, DataUnavailable>;

    /// Settlements strictly after `after`, up to now.
    fn funding_settlements(&self, symbol: &str, after: DateTime<Utc>) -> Result<Vec<FundingPoint>, DataUnavailable>;

    fn current_time(&self) -> DateTime<Utc>;
}

/// Replays stored candles and funding with a time cursor.
///
/// Candles count as visible once their close time is at or before the
/// cursor; funding settlements likewise.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    candles: BTreeMap<String, BTreeMap<Timeframe, Vec<Candle>>>,
    funding: BTreeMap<String, FundingRateSeries>,
    now: DateTime<Utc>,
}

impl Default for ReplayProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayProvider {
    pub fn new() -> Self {
        Self {
            candles: BTreeMap::new(),
            funding: BTreeMap::new(),
            now: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Add candles for any symbols and timeframes; each series is re-sorted by
    /// close time and de-duplicated.
    pub fn insert_candles(&mut self, candles: impl IntoIterator<Item = Candle>) {
        let mut touched = BTreeSet::new();
        for candle in candles {
            touched.insert((candle.symbol.clone(), candle.timeframe));
            self.candles
                .entry(candle.symbol.clone())
                .or_default()
                .entry(candle.timeframe)
                .or_default()
                .push(candle);
        }
        for (symbol, timeframe) in touched {
            if let Some(series) = self.candles.get_mut(&symbol).and_then(|m| m.get_mut(&timeframe)) {
                series.sort_by_key(|c| c.close_time);
                series.dedup_by_key(|c| c.close_time);
            }
        }
    }

    pub fn with_candles(mut self, candles: impl IntoIterator<Item = Candle>) -> Self {
        self.insert_candles(candles);
        self
    }

    pub fn insert_funding(&mut self, series: FundingRateSeries) {
        self.funding.insert(series.symbol.clone(), series);
    }

    pub fn with_funding(mut self, series: FundingRateSeries) -> Self {
        self.insert_funding(series);
        self
    }

    /// Symbols with candle data, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.candles.keys().cloned().collect()
    }

    pub fn advance_to(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    /// Sorted, de-duplicated close times of every stored candle in `timeframes`.
    pub fn timeline(&self, timeframes: &[Timeframe]) -> Vec<DateTime<Utc>> {
        let mut times = BTreeSet::new();
        for frames in self.candles.values() {
            for tf in timeframes {
                if let Some(series) = frames.get(tf) {
                    times.extend(series.iter().map(|c| c.close_time));
                }
            }
        }
        times.into_iter().collect()
    }

    fn visible(&self, symbol: &str, timeframe: Timeframe) -> Result<&[Candle], DataUnavailable> {
        let frames = self
            .candles
            .get(symbol)
            .ok_or_else(|| DataUnavailable::UnknownSymbol(symbol.to_string()))?;
        let series = frames.get(&timeframe).map(Vec::as_slice).unwrap_or(&[]);
        let end = series.partition_point(|c| c.close_time <= self.now);
        if end == 0 {
            return Err(DataUnavailable::NoCandles {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        Ok(&series[..end])
    }

    fn funding_series(&self, symbol: &str) -> Result<&FundingRateSeries, DataUnavailable> {
        self.funding
            .get(symbol)
            .ok_or_else(|| DataUnavailable::NoFunding(symbol.to_string()))
    }
}

impl MarketDataProvider for ReplayProvider {
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>, DataUnavailable> {
        let visible = self.visible(symbol, timeframe)?;
        let start = visible.len().saturating_sub(count);
        Ok(visible[start..].to_vec())
    }

    /// Close of the most recently closed candle on any timeframe; the shorter
    /// timeframe wins a tie.
    fn current_price(&self, symbol: &str) -> Result<f64, DataUnavailable> {
        let frames = self
            .candles
            .get(symbol)
            .ok_or_else(|| DataUnavailable::UnknownSymbol(symbol.to_string()))?;
        let mut latest: Option<&Candle> = None;
        for series in frames.values() {
            let end = series.partition_point(|c| c.close_time <= self.now);
            if let Some(c) = end.checked_sub(1).map(|i| &series[i]) {
                if latest.map_or(true, |l| c.close_time > l.close_time) {
                    latest = Some(c);
                }
            }
        }
        latest
            .map(|c| c.close)
            .ok_or_else(|| DataUnavailable::NoPrice(symbol.to_string()))
    }

    fn funding_rate(&self, symbol: &str) -> Result<f64, DataUnavailable> {
        self.funding_series(symbol)?
            .latest_at(self.now)
            .ok_or_else(|| DataUnavailable::NoFunding(symbol.to_string()))
    }

    fn funding_history(&self, symbol: &str, count: usize) -> Result<Vec<f64>, DataUnavailable> {
        Ok(self.funding_series(symbol)?.history_at(self.now, count))
    }

    fn funding_settlements(&self, symbol: &str, after: DateTime<Utc>) -> Result<Vec<FundingPoint>, DataUnavailable> {
        Ok(self.funding_series(symbol)?.settlements_between(after, self.now).to_vec())
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::funding_interval;
    use crate::indicators::make_candles;
    use chrono::{Duration, TimeZone};

    fn provider() -> ReplayProvider {
        let mut m15 = make_candles(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 107.0]);
        for c in &mut m15 {
            c.symbol = "SOLUSDT".into();
        }
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let funding = FundingRateSeries::new(
            "SOLUSDT",
            (0..3)
                .map(|i| FundingPoint {
                    time: t0 + funding_interval() * i,
                    rate: 0.0001 * f64::from(i + 1),
                })
                .collect(),
        );
        ReplayProvider::new().with_candles(m15).with_funding(funding)
    }

    #[test]
    fn nothing_visible_before_first_close() {
        let mut p = provider();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        p.advance_to(t0 + Duration::minutes(10));
        assert!(matches!(
            p.candles("SOLUSDT", Timeframe::M15, 10),
            Err(DataUnavailable::NoCandles { .. })
        ));
        assert!(p.current_price("SOLUSDT").is_err());
        assert_eq!(
            p.current_price("DOGEUSDT"),
            Err(DataUnavailable::UnknownSymbol("DOGEUSDT".into()))
        );
    }

    #[test]
    fn cursor_hides_the_future() {
        let mut p = provider();
        let timeline = p.timeline(&[Timeframe::M15]);
        assert_eq!(timeline.len(), 8);
        p.advance_to(timeline[2]);
        let candles = p.candles("SOLUSDT", Timeframe::M15, 100).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles.last().unwrap().close, 102.0);
        assert_eq!(p.current_price("SOLUSDT").unwrap(), 102.0);
        assert_eq!(p.candles("SOLUSDT", Timeframe::M15, 2).unwrap().len(), 2);
    }

    #[test]
    fn funding_respects_cursor() {
        let mut p = provider();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        p.advance_to(t0 + Duration::hours(9));
        assert_eq!(p.funding_rate("SOLUSDT").unwrap(), 0.0002);
        assert_eq!(p.funding_history("SOLUSDT", 10).unwrap().len(), 2);
        assert_eq!(p.funding_settlements("SOLUSDT", t0).unwrap().len(), 1);
        assert!(p.funding_rate("BTCUSDT").is_err());
    }
}
