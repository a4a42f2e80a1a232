//! Funding-rate history per symbol.
//!
//! Rates settle every 8 hours on the venues this targets. The series is kept
//! sorted by settlement time; every accessor takes the simulated "now" so no
//! caller can see a settlement that has not happened yet.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Standard perpetual funding interval.
pub const FUNDING_INTERVAL_HOURS: i64 = 8;

pub fn funding_interval() -> Duration {
    Duration::hours(FUNDING_INTERVAL_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingPoint {
    pub time: DateTime<Utc>,
    /// Per-period rate, e.g. 0.0001 = 0.01%.
    pub rate: f64,
}

/// A funding extreme seen on some earlier tick, kept by the overlay's cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingExtreme {
    pub rate: f64,
    pub z_score: f64,
    pub observed_at: DateTime<Utc>,
}

impl FundingExtreme {
    /// Longs pay when positive.
    pub fn is_positive(&self) -> bool {
        self.rate > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FundingRateSeries {
    pub symbol: String,
    points: Vec<FundingPoint>,
}

impl FundingRateSeries {
    /// Build a series; points are sorted and non-finite rates dropped.
    pub fn new(symbol: impl Into<String>, mut points: Vec<FundingPoint>) -> Self {
        points.retain(|p| p.rate.is_finite());
        points.sort_by_key(|p| p.time);
        points.dedup_by_key(|p| p.time);
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn points(&self) -> &[FundingPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Settlements with `time <= now`.
    pub fn until(&self, now: DateTime<Utc>) -> &[FundingPoint] {
        let end = self.points.partition_point(|p| p.time <= now);
        &self.points[..end]
    }

    /// Most recent settled rate at `now`.
    pub fn latest_at(&self, now: DateTime<Utc>) -> Option<f64> {
        self.until(now).last().map(|p| p.rate)
    }

    /// The last `count` settled rates at `now`, oldest first.
    pub fn history_at(&self, now: DateTime<Utc>, count: usize) -> Vec<f64> {
        let visible = self.until(now);
        let start = visible.len().saturating_sub(count);
        visible[start..].iter().map(|p| p.rate).collect()
    }

    /// Settlements in the half-open interval `(after, upto]`.
    pub fn settlements_between(&self, after: DateTime<Utc>, upto: DateTime<Utc>) -> &[FundingPoint] {
        if upto <= after {
            return &[];
        }
        let start = self.points.partition_point(|p| p.time <= after);
        let end = self.points.partition_point(|p| p.time <= upto);
        &self.points[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series() -> FundingRateSeries {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points = (0..5)
            .rev()
            .map(|i: i32| FundingPoint {
                time: t0 + funding_interval() * i,
                rate: 0.0001 * (f64::from(i) + 1.0),
            })
            .collect();
        FundingRateSeries::new("BTCUSDT", points)
    }

    #[test]
    fn sorted_on_construction() {
        let s = series();
        assert!(s.points().windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn latest_respects_now() {
        let s = series();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(s.latest_at(t0 - Duration::minutes(1)), None);
        assert_eq!(s.latest_at(t0 + Duration::hours(9)), Some(0.0002));
        assert_eq!(s.history_at(t0 + Duration::hours(16), 10).len(), 3);
    }

    #[test]
    fn settlements_are_half_open() {
        let s = series();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hits = s.settlements_between(t0, t0 + Duration::hours(16));
        assert_eq!(hits.len(), 2);
        assert!(s.settlements_between(t0, t0).is_empty());
    }
}
