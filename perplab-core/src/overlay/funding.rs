//! Funding-rate overlay and the funding-extreme cache.
//!
//! The current rate is ranked against the settled history (tie-aware
//! percentile). It is extreme only when the rank is beyond a threshold AND the
//! absolute rate clears `min_abs_rate`, so a quiet market whose rates all sit
//! near zero never produces a false extreme. A high extreme hurts longs, a low
//! extreme hurts shorts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Direction, ExitPlan, FundingExtreme};
use crate::indicators::{percentile_rank, z_score};

/// What to do with a signal facing unfavorable extreme funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingAction {
    Allow,
    Tighten,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingOverlayConfig {
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub min_abs_rate: f64,
    /// Settled rates considered for the percentile.
    pub history_len: usize,
    pub on_extreme: FundingAction,
    pub tp1_fraction_delta: f64,
    pub max_tp1_fraction: f64,
    pub trail_multiple_delta: f64,
    pub min_trail_multiple: f64,
    /// Cache entries older than this are dropped at the start of each tick.
    pub cache_staleness_hours: i64,
    pub cache_abs_threshold: f64,
    pub cache_z_threshold: f64,
}

impl Default for FundingOverlayConfig {
    fn default() -> Self {
        Self {
            low_percentile: 0.05,
            high_percentile: 0.95,
            min_abs_rate: 0.0003,
            history_len: 90,
            on_extreme: FundingAction::Tighten,
            tp1_fraction_delta: 0.1,
            max_tp1_fraction: 0.5,
            trail_multiple_delta: 0.5,
            min_trail_multiple: 1.5,
            cache_staleness_hours: 2,
            cache_abs_threshold: 0.001,
            cache_z_threshold: 2.5,
        }
    }
}

/// Which tail the current rate sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingTail {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingAssessment {
    pub percentile: Option<f64>,
    pub tail: Option<FundingTail>,
    pub action: FundingAction,
}

/// Classify `rate` against `history` for a trade in `direction`.
pub fn assess_funding(
    config: &FundingOverlayConfig,
    direction: Direction,
    rate: Option<f64>,
    history: &[f64],
) -> FundingAssessment {
    let allow = |percentile| FundingAssessment {
        percentile,
        tail: None,
        action: FundingAction::Allow,
    };
    let Some(rate) = rate else {
        return allow(None);
    };
    let window = &history[history.len().saturating_sub(config.history_len)..];
    let Some(p) = percentile_rank(rate, window) else {
        return allow(None);
    };
    if rate.abs() < config.min_abs_rate {
        return allow(Some(p));
    }
    let tail = if p >= config.high_percentile {
        FundingTail::High
    } else if p <= config.low_percentile {
        FundingTail::Low
    } else {
        return allow(Some(p));
    };
    let unfavorable = matches!(
        (tail, direction),
        (FundingTail::High, Direction::Long) | (FundingTail::Low, Direction::Short)
    );
    FundingAssessment {
        percentile: Some(p),
        tail: Some(tail),
        action: if unfavorable { config.on_extreme } else { FundingAction::Allow },
    }
}

/// Bank profit earlier and trail closer: TP1 fraction up (capped), trail
/// multiple down (floored). Values already past a bound are left alone.
pub fn tighten_exit_plan(plan: ExitPlan, config: &FundingOverlayConfig) -> ExitPlan {
    ExitPlan {
        tp1_fraction: (plan.tp1_fraction + config.tp1_fraction_delta).min(config.max_tp1_fraction.max(plan.tp1_fraction)),
        trail_atr_multiple: (plan.trail_atr_multiple - config.trail_multiple_delta)
            .max(config.min_trail_multiple.min(plan.trail_atr_multiple)),
        ..plan
    }
}

/// Per-symbol memory of recent funding extremes, owned by the overlay.
#[derive(Debug, Clone, Default)]
pub struct FundingExtremeCache {
    entries: BTreeMap<String, FundingExtreme>,
}

impl FundingExtremeCache {
    /// Remember `rate` if it is extreme by level or Z-score.
    pub fn observe(
        &mut self,
        config: &FundingOverlayConfig,
        symbol: &str,
        rate: f64,
        history: &[f64],
        now: DateTime<Utc>,
    ) {
        let z = z_score(rate, history).unwrap_or(0.0);
        if rate.abs() >= config.cache_abs_threshold || z.abs() >= config.cache_z_threshold {
            tracing::debug!(symbol, rate, z, "funding extreme cached");
            self.entries.insert(
                symbol.to_string(),
                FundingExtreme {
                    rate,
                    z_score: z,
                    observed_at: now,
                },
            );
        }
    }

    pub fn get(&self, symbol: &str) -> Option<FundingExtreme> {
        self.entries.get(symbol).copied()
    }

    /// Drop entries older than the staleness window.
    pub fn expire(&mut self, now: DateTime<Utc>, staleness: Duration) {
        self.entries.retain(|symbol, e| {
            let keep = now - e.observed_at <= staleness;
            if !keep {
                tracing::trace!(symbol = %symbol, "funding extreme expired");
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};
    use chrono::TimeZone;

    fn history() -> Vec<f64> {
        // 0.00001, 0.00002, ... 0.0002: a quiet market.
        (1..=20).map(|i| i as f64 / 100_000.0).collect()
    }

    #[test]
    fn quiet_market_top_percentile_is_not_extreme() {
        let config = FundingOverlayConfig::default();
        let a = assess_funding(&config, Direction::Long, Some(0.0002), &history());
        // 19 below + 0.5 tie over 20 = 0.975: in the tail, but below min_abs_rate.
        assert_approx(a.percentile.unwrap(), 0.975, DEFAULT_EPSILON);
        assert_eq!(a.tail, None);
        assert_eq!(a.action, FundingAction::Allow);
    }

    #[test]
    fn rate_exactly_at_threshold_percentile_below_min_abs_allows() {
        let config = FundingOverlayConfig {
            high_percentile: 0.975,
            ..FundingOverlayConfig::default()
        };
        let a = assess_funding(&config, Direction::Long, Some(0.0002), &history());
        assert_eq!(a.action, FundingAction::Allow);
    }

    #[test]
    fn high_extreme_tightens_long_and_allows_short() {
        let config = FundingOverlayConfig::default();
        let mut h = history();
        h.push(0.0005);
        let long = assess_funding(&config, Direction::Long, Some(0.001), &h);
        assert_eq!(long.tail, Some(FundingTail::High));
        assert_eq!(long.action, FundingAction::Tighten);
        let short = assess_funding(&config, Direction::Short, Some(0.001), &h);
        assert_eq!(short.action, FundingAction::Allow);
    }

    #[test]
    fn low_extreme_blocks_short_when_configured() {
        let config = FundingOverlayConfig {
            on_extreme: FundingAction::Block,
            ..FundingOverlayConfig::default()
        };
        let a = assess_funding(&config, Direction::Short, Some(-0.001), &history());
        assert_eq!(a.tail, Some(FundingTail::Low));
        assert_eq!(a.action, FundingAction::Block);
    }

    #[test]
    fn missing_rate_or_history_allows() {
        let config = FundingOverlayConfig::default();
        assert_eq!(assess_funding(&config, Direction::Long, None, &history()).action, FundingAction::Allow);
        assert_eq!(assess_funding(&config, Direction::Long, Some(0.01), &[]).action, FundingAction::Allow);
    }

    #[test]
    fn tighten_respects_caps() {
        let config = FundingOverlayConfig::default();
        let t = tighten_exit_plan(ExitPlan::default(), &config);
        assert_approx(t.tp1_fraction, 0.4, DEFAULT_EPSILON);
        assert_approx(t.trail_atr_multiple, 1.5, DEFAULT_EPSILON);

        let near_caps = ExitPlan {
            tp1_fraction: 0.45,
            trail_atr_multiple: 1.7,
            time_stop_bars: 10,
        };
        let t = tighten_exit_plan(near_caps, &config);
        assert_approx(t.tp1_fraction, 0.5, DEFAULT_EPSILON);
        assert_approx(t.trail_atr_multiple, 1.5, DEFAULT_EPSILON);
        assert_eq!(t.time_stop_bars, 10);
    }

    #[test]
    fn cache_expires_after_staleness() {
        let config = FundingOverlayConfig::default();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut cache = FundingExtremeCache::default();
        cache.observe(&config, "ETHUSDT", 0.0004, &history(), t0);
        cache.observe(&config, "SOLUSDT", 0.0001, &history(), t0);
        cache.observe(&config, "BTCUSDT", 0.0015, &history(), t0);
        assert_eq!(cache.len(), 2, "z-score extreme and level extreme both cached");

        cache.expire(t0 + Duration::hours(2), Duration::hours(2));
        assert_eq!(cache.len(), 2);
        cache.expire(t0 + Duration::hours(2) + Duration::minutes(1), Duration::hours(2));
        assert!(cache.is_empty());
    }
}
