//! Regime & risk overlay.
//!
//! Sits between the detectors and the position book. A candidate signal is
//! screened (kill switch, regime, funding), then sized under the exposure
//! caps. The overlay owns the only cross-tick state outside the position set:
//! the funding-extreme cache and the kill-switch streaks. Both are aged in
//! [`RiskOverlay::begin_tick`], which the engine calls once per tick before
//! anything else.

pub mod exposure;
pub mod funding;
pub mod kill_switch;
pub mod regime;
pub mod sizing;

pub use exposure::{check_capacity, check_notional, check_slot, ExposureConfig, ExposureRejection, ExposureState};
pub use funding::{
    assess_funding, tighten_exit_plan, FundingAction, FundingAssessment, FundingExtremeCache, FundingOverlayConfig,
    FundingTail,
};
pub use kill_switch::{KillSwitch, KillSwitchConfig};
pub use regime::{classify_regime, regime_allows, RegimeConfig};
pub use sizing::{size_position, PositionSize, SizingConfig, SizingRejection};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detectors::MarketWindow;
use crate::domain::{FundingExtreme, Regime, TradeRecord, TradingSignal};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub funding: FundingOverlayConfig,
    pub regime: RegimeConfig,
    pub kill_switch: KillSwitchConfig,
    pub exposure: ExposureConfig,
    pub sizing: SizingConfig,
}

/// Why the overlay refused a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScreenRejection {
    #[error("strategy is cooling down after consecutive losses")]
    KillSwitch,
    #[error("counter-trend entry in {0:?} regime")]
    Regime(Regime),
    #[error("funding extreme against the trade")]
    FundingBlock,
}

impl ScreenRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            ScreenRejection::KillSwitch => "kill_switch",
            ScreenRejection::Regime(_) => "regime",
            ScreenRejection::FundingBlock => "funding_block",
        }
    }
}

/// Why an accepted signal could not become a position.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryRejection {
    #[error(transparent)]
    Exposure(#[from] ExposureRejection),
    #[error(transparent)]
    Sizing(#[from] SizingRejection),
}

impl EntryRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            EntryRejection::Exposure(e) => e.reason(),
            EntryRejection::Sizing(e) => e.reason(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskOverlay {
    config: OverlayConfig,
    funding_cache: FundingExtremeCache,
    kill_switch: KillSwitch,
}

impl RiskOverlay {
    pub fn new(config: OverlayConfig) -> Self {
        let kill_switch = KillSwitch::new(config.kill_switch.clone());
        Self {
            config,
            funding_cache: FundingExtremeCache::default(),
            kill_switch,
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Per-tick housekeeping: expire stale funding extremes and finished cooldowns.
    pub fn begin_tick(&mut self, now: DateTime<Utc>) {
        let staleness = Duration::hours(self.config.funding.cache_staleness_hours);
        self.funding_cache.expire(now, staleness);
        self.kill_switch.expire(now);
    }

    pub fn observe_funding(&mut self, symbol: &str, rate: f64, history: &[f64], now: DateTime<Utc>) {
        self.funding_cache
            .observe(&self.config.funding, symbol, rate, history, now);
    }

    pub fn cached_extreme(&self, symbol: &str) -> Option<FundingExtreme> {
        self.funding_cache.get(symbol)
    }

    pub fn regime(&self, window: &MarketWindow) -> Option<Regime> {
        classify_regime(window.candles(self.config.regime.timeframe), &self.config.regime)
    }

    /// Kill switch, then regime, then funding. On success the signal comes
    /// back stamped with the regime and, under TIGHTEN, a tightened exit plan.
    pub fn screen(
        &self,
        mut signal: TradingSignal,
        regime: Option<Regime>,
        window: &MarketWindow,
    ) -> Result<TradingSignal, ScreenRejection> {
        if self.kill_switch.is_blocked(&signal.strategy, window.now) {
            return Err(ScreenRejection::KillSwitch);
        }
        if let Some(r) = regime.filter(|_| !regime_allows(regime, signal.direction, &self.config.regime)) {
            return Err(ScreenRejection::Regime(r));
        }
        signal.regime = regime;

        let funding = assess_funding(
            &self.config.funding,
            signal.direction,
            window.funding_rate,
            &window.funding_history,
        );
        match funding.action {
            FundingAction::Allow => Ok(signal),
            FundingAction::Block => Err(ScreenRejection::FundingBlock),
            FundingAction::Tighten => {
                signal.exit_plan = tighten_exit_plan(signal.exit_plan, &self.config.funding);
                tracing::debug!(
                    symbol = %signal.symbol,
                    strategy = %signal.strategy,
                    tp1_fraction = signal.exit_plan.tp1_fraction,
                    trail = signal.exit_plan.trail_atr_multiple,
                    "exit plan tightened for funding"
                );
                signal = signal.with_diagnostic("funding_tightened", 1.0);
                if let Some(p) = funding.percentile {
                    signal = signal.with_diagnostic("funding_percentile", p);
                }
                Ok(signal)
            }
        }
    }

    pub fn check_capacity(&self, state: &ExposureState, symbol: &str) -> Result<(), ExposureRejection> {
        check_capacity(&self.config.exposure, state, symbol)
    }

    /// Full exposure check and sizing for an accepted signal.
    pub fn size(
        &self,
        state: &ExposureState,
        signal: &TradingSignal,
        equity: f64,
    ) -> Result<PositionSize, EntryRejection> {
        let scale = check_slot(&self.config.exposure, state, &signal.symbol, signal.direction)?;
        let size = size_position(&self.config.sizing, equity, signal.entry_price, signal.stop_loss, scale)?;
        check_notional(&self.config.exposure, state, &signal.symbol, size.notional, equity)?;
        Ok(size)
    }

    /// Feed a closed trade to the kill switch.
    pub fn record_close(&mut self, trade: &TradeRecord) {
        self.kill_switch.record_close(&trade.strategy, trade.pnl, trade.exit_time);
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }
}
