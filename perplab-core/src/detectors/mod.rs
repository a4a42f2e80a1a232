//! Strategy detectors — independent pattern recognizers behind one trait.
//!
//! Detectors are portfolio-agnostic: they see a read-only market window (and the
//! other symbols' windows, for cross-sectional setups), never positions or
//! balances. A detector either emits a [`TradingSignal`] or names the gate that
//! stopped it; insufficient history is just another gate, never an error.
//!
//! The set is closed: [`DetectorConfig`] is a tagged enum and
//! [`DetectorConfig::build`] is the only constructor the engine uses. The order
//! of the configured list is the arbitration priority.

pub mod accumulation;
pub mod divergence;
pub mod funding_extreme;
pub mod mtf_alignment;
pub mod relative_strength;
pub mod squeeze_breakout;
pub mod trend_pullback;
pub mod volume_climax;

pub use accumulation::{AccumulationConfig, AccumulationDistribution};
pub use divergence::{DivergenceConfig, RsiDivergence};
pub use funding_extreme::{FundingExtremeConfig, FundingExtremeReversal};
pub use mtf_alignment::{MtfAlignment, MtfAlignmentConfig};
pub use relative_strength::{RelativeStrengthConfig, RelativeStrengthRotation};
pub use squeeze_breakout::{SqueezeBreakout, SqueezeBreakoutConfig};
pub use trend_pullback::{TrendPullback, TrendPullbackConfig};
pub use volume_climax::{VolumeClimax, VolumeClimaxConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{Candle, Direction, ExitPlan, FundingExtreme, StrategyFamily, Timeframe, TradingSignal};

/// Everything one symbol exposes to the detectors at one instant.
///
/// Built by the engine from the data provider; candles never extend past `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketWindow {
    pub symbol: String,
    pub now: DateTime<Utc>,
    pub current_price: f64,
    pub frames: BTreeMap<Timeframe, Vec<Candle>>,
    pub funding_rate: Option<f64>,
    /// Settled rates, oldest first.
    pub funding_history: Vec<f64>,
    /// Recent extreme remembered by the overlay, already expiry-filtered.
    pub funding_extreme: Option<FundingExtreme>,
}

impl MarketWindow {
    pub fn new(symbol: impl Into<String>, now: DateTime<Utc>, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            now,
            current_price,
            frames: BTreeMap::new(),
            funding_rate: None,
            funding_history: Vec::new(),
            funding_extreme: None,
        }
    }

    pub fn with_frame(mut self, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.frames.insert(timeframe, candles);
        self
    }

    /// Candles for `timeframe`; empty when the frame was not loaded.
    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        self.frames.get(&timeframe).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Input to one detector call.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub window: &'a MarketWindow,
    /// Windows of every symbol in the universe, keyed by symbol.
    pub universe: &'a BTreeMap<String, MarketWindow>,
}

impl<'a> DetectionContext<'a> {
    pub fn new(window: &'a MarketWindow, universe: &'a BTreeMap<String, MarketWindow>) -> Self {
        Self { window, universe }
    }
}

/// The gate that stopped a detector, e.g. `"insufficient_data"`, `"adx_below_min"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoSignal(pub &'static str);

impl fmt::Display for NoSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub type Detection = Result<TradingSignal, NoSignal>;

pub(crate) const INSUFFICIENT_DATA: NoSignal = NoSignal("insufficient_data");

/// `Err(NoSignal(name))` unless `passed`.
pub(crate) fn gate(passed: bool, name: &'static str) -> Result<(), NoSignal> {
    if passed {
        Ok(())
    } else {
        Err(NoSignal(name))
    }
}

/// A strategy detector.
///
/// # Architecture invariant
/// `evaluate` receives market data only. Implementations hold configuration
/// and no mutable state, so the same detector may run for every symbol.
pub trait SignalDetector: Send + Sync {
    /// Stable tag, used as the scan-stats key (e.g. "trend_pullback").
    fn name(&self) -> &str;

    fn family(&self) -> StrategyFamily;

    /// Emit a signal or name the failed gate.
    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection;

    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<TradingSignal> {
        self.evaluate(ctx).ok()
    }
}

/// Bounded additive confidence: base + per-confirmation bonuses, capped at 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Confidence(f64);

impl Confidence {
    pub(crate) fn base(value: f64) -> Self {
        Self(value)
    }

    pub(crate) fn bonus(&mut self, condition: bool, points: f64) {
        if condition {
            self.0 += points;
        }
    }

    pub(crate) fn value(self) -> f64 {
        self.0.clamp(0.0, 100.0)
    }
}

/// Reward targets at `r` multiples of the entry-to-stop distance.
pub(crate) fn r_target(entry: f64, stop: f64, direction: Direction, r: f64) -> f64 {
    entry + direction.sign() * (entry - stop).abs() * r
}

/// Common signal assembly.
pub(crate) struct SignalDraft {
    pub direction: Direction,
    pub timeframe: Timeframe,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
    pub atr: f64,
    pub confidence: Confidence,
}

impl SignalDraft {
    pub(crate) fn finish(
        self,
        family: StrategyFamily,
        strategy: &str,
        window: &MarketWindow,
        exit_plan: ExitPlan,
    ) -> TradingSignal {
        let mut signal = TradingSignal {
            family,
            strategy: strategy.to_string(),
            symbol: window.symbol.clone(),
            timeframe: self.timeframe,
            direction: self.direction,
            entry_price: self.entry,
            stop_loss: self.stop,
            take_profit_1: self.tp1,
            take_profit_2: self.tp2,
            confidence: self.confidence.value(),
            risk_reward: None,
            regime: None,
            atr: self.atr,
            exit_plan,
            generated_at: window.now,
            diagnostics: BTreeMap::new(),
        };
        signal.risk_reward = signal.reward_risk();
        signal
    }
}

/// Tagged detector configuration, `[[detectors]] kind = "..."` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    TrendPullback(TrendPullbackConfig),
    SqueezeBreakout(SqueezeBreakoutConfig),
    Accumulation(AccumulationConfig),
    Divergence(DivergenceConfig),
    VolumeClimax(VolumeClimaxConfig),
    MtfAlignment(MtfAlignmentConfig),
    RelativeStrength(RelativeStrengthConfig),
    FundingExtreme(FundingExtremeConfig),
}

impl DetectorConfig {
    pub fn build(&self) -> Box<dyn SignalDetector> {
        match self {
            DetectorConfig::TrendPullback(c) => Box::new(TrendPullback::new(c.clone())),
            DetectorConfig::SqueezeBreakout(c) => Box::new(SqueezeBreakout::new(c.clone())),
            DetectorConfig::Accumulation(c) => Box::new(AccumulationDistribution::new(c.clone())),
            DetectorConfig::Divergence(c) => Box::new(RsiDivergence::new(c.clone())),
            DetectorConfig::VolumeClimax(c) => Box::new(VolumeClimax::new(c.clone())),
            DetectorConfig::MtfAlignment(c) => Box::new(MtfAlignment::new(c.clone())),
            DetectorConfig::RelativeStrength(c) => Box::new(RelativeStrengthRotation::new(c.clone())),
            DetectorConfig::FundingExtreme(c) => Box::new(FundingExtremeReversal::new(c.clone())),
        }
    }

    /// Timeframes this detector reads, for the engine's window builder.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        match self {
            DetectorConfig::TrendPullback(c) => vec![c.htf, c.ltf],
            DetectorConfig::SqueezeBreakout(c) => vec![c.timeframe],
            DetectorConfig::Accumulation(c) => vec![c.timeframe],
            DetectorConfig::Divergence(c) => vec![c.timeframe],
            DetectorConfig::VolumeClimax(c) => vec![c.timeframe],
            DetectorConfig::MtfAlignment(c) => vec![c.htf, c.mtf, c.ltf],
            DetectorConfig::RelativeStrength(c) => vec![c.timeframe],
            DetectorConfig::FundingExtreme(c) => vec![c.timeframe],
        }
    }

    /// The exit plan stamped on this detector's signals.
    pub fn exit_plan(&self) -> &ExitPlan {
        match self {
            DetectorConfig::TrendPullback(c) => &c.exit_plan,
            DetectorConfig::SqueezeBreakout(c) => &c.exit_plan,
            DetectorConfig::Accumulation(c) => &c.exit_plan,
            DetectorConfig::Divergence(c) => &c.exit_plan,
            DetectorConfig::VolumeClimax(c) => &c.exit_plan,
            DetectorConfig::MtfAlignment(c) => &c.exit_plan,
            DetectorConfig::RelativeStrength(c) => &c.exit_plan,
            DetectorConfig::FundingExtreme(c) => &c.exit_plan,
        }
    }

    pub fn exit_plan_mut(&mut self) -> &mut ExitPlan {
        match self {
            DetectorConfig::TrendPullback(c) => &mut c.exit_plan,
            DetectorConfig::SqueezeBreakout(c) => &mut c.exit_plan,
            DetectorConfig::Accumulation(c) => &mut c.exit_plan,
            DetectorConfig::Divergence(c) => &mut c.exit_plan,
            DetectorConfig::VolumeClimax(c) => &mut c.exit_plan,
            DetectorConfig::MtfAlignment(c) => &mut c.exit_plan,
            DetectorConfig::RelativeStrength(c) => &mut c.exit_plan,
            DetectorConfig::FundingExtreme(c) => &mut c.exit_plan,
        }
    }
}

/// All eight detectors with default settings, in default priority order.
pub fn default_detectors() -> Vec<DetectorConfig> {
    vec![
        DetectorConfig::FundingExtreme(FundingExtremeConfig::default()),
        DetectorConfig::MtfAlignment(MtfAlignmentConfig::default()),
        DetectorConfig::TrendPullback(TrendPullbackConfig::default()),
        DetectorConfig::SqueezeBreakout(SqueezeBreakoutConfig::default()),
        DetectorConfig::Accumulation(AccumulationConfig::default()),
        DetectorConfig::RelativeStrength(RelativeStrengthConfig::default()),
        DetectorConfig::Divergence(DivergenceConfig::default()),
        DetectorConfig::VolumeClimax(VolumeClimaxConfig::default()),
    ]
}
