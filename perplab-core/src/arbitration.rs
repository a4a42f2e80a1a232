//! Signal arbitration.
//!
//! For one symbol: run the detectors in priority order; the first signal that
//! is well-formed and survives the overlay screen wins. A blocked signal does
//! not end the search, the next detector still gets its turn.
//!
//! Every step feeds the scan funnel ([`ScanStats`]), so a run can report how
//! often each detector was asked, fired, and was accepted, and what stopped it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detectors::{DetectionContext, DetectorConfig, SignalDetector};
use crate::domain::TradingSignal;
use crate::overlay::RiskOverlay;

/// Funnel counters for one detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorFunnel {
    pub analyzed: u64,
    pub detected: u64,
    pub accepted: u64,
    /// Gates that stopped the detector before it produced a signal.
    pub gates: BTreeMap<String, u64>,
    /// Why a produced signal was turned away (`regime`, `funding_block`, `sizing:*`, ...).
    pub rejections: BTreeMap<String, u64>,
}

impl DetectorFunnel {
    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Per-detector funnel, keyed by detector name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub detectors: BTreeMap<String, DetectorFunnel>,
}

impl ScanStats {
    fn funnel(&mut self, detector: &str) -> &mut DetectorFunnel {
        self.detectors.entry(detector.to_string()).or_default()
    }

    pub fn record_analyzed(&mut self, detector: &str) {
        self.funnel(detector).analyzed += 1;
    }

    pub fn record_gate(&mut self, detector: &str, gate: &str) {
        *self.funnel(detector).gates.entry(gate.to_string()).or_insert(0) += 1;
    }

    pub fn record_detected(&mut self, detector: &str) {
        self.funnel(detector).detected += 1;
    }

    pub fn record_rejection(&mut self, detector: &str, reason: &str) {
        *self.funnel(detector).rejections.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_accepted(&mut self, detector: &str) {
        self.funnel(detector).accepted += 1;
    }

    pub fn get(&self, detector: &str) -> Option<&DetectorFunnel> {
        self.detectors.get(detector)
    }

    /// Fold another run's counters into this one.
    pub fn merge(&mut self, other: &ScanStats) {
        for (name, f) in &other.detectors {
            let mine = self.funnel(name);
            mine.analyzed += f.analyzed;
            mine.detected += f.detected;
            mine.accepted += f.accepted;
            for (k, v) in &f.gates {
                *mine.gates.entry(k.clone()).or_insert(0) += v;
            }
            for (k, v) in &f.rejections {
                *mine.rejections.entry(k.clone()).or_insert(0) += v;
            }
        }
    }
}

/// The winning signal and the detector that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub detector: String,
    pub signal: TradingSignal,
}

pub struct SignalArbiter {
    detectors: Vec<Box<dyn SignalDetector>>,
}

impl SignalArbiter {
    /// Build detectors from configs; list order is priority order.
    pub fn new(configs: &[DetectorConfig]) -> Self {
        Self {
            detectors: configs.iter().map(DetectorConfig::build).collect(),
        }
    }

    pub fn from_detectors(detectors: Vec<Box<dyn SignalDetector>>) -> Self {
        Self { detectors }
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn arbitrate(
        &self,
        ctx: &DetectionContext<'_>,
        overlay: &RiskOverlay,
        stats: &mut ScanStats,
    ) -> Option<Arbitration> {
        let window = ctx.window;
        let regime = overlay.regime(window);
        for detector in &self.detectors {
            let name = detector.name();
            stats.record_analyzed(name);
            let signal = match detector.evaluate(ctx) {
                Ok(signal) => signal,
                Err(gate) => {
                    tracing::trace!(symbol = %window.symbol, detector = name, %gate, "no signal");
                    stats.record_gate(name, gate.0);
                    continue;
                }
            };
            stats.record_detected(name);

            if let Some(reason) = signal.invalid_reason() {
                tracing::warn!(
                    symbol = %window.symbol,
                    detector = name,
                    reason,
                    entry = signal.entry_price,
                    stop = signal.stop_loss,
                    atr = signal.atr,
                    "invalid signal discarded"
                );
                stats.record_rejection(name, "invalid_signal");
                continue;
            }

            match overlay.screen(signal, regime, window) {
                Ok(signal) => {
                    tracing::info!(
                        symbol = %window.symbol,
                        detector = name,
                        strategy = %signal.strategy,
                        direction = %signal.direction,
                        confidence = signal.confidence,
                        "signal passed overlay"
                    );
                    return Some(Arbitration {
                        detector: name.to_string(),
                        signal,
                    });
                }
                Err(rejection) => {
                    tracing::debug!(symbol = %window.symbol, detector = name, %rejection, "signal rejected");
                    stats.record_rejection(name, rejection.reason());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{Detection, MarketWindow, NoSignal};
    use crate::domain::{Direction, ExitPlan, StrategyFamily, Timeframe};
    use crate::overlay::{FundingAction, FundingOverlayConfig, OverlayConfig};
    use chrono::{TimeZone, Utc};

    struct Fixed {
        name: &'static str,
        outcome: Result<(Direction, f64), &'static str>,
    }

    impl SignalDetector for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn family(&self) -> StrategyFamily {
            StrategyFamily::TrendRider
        }

        fn evaluate(&self, ctx: &DetectionContext<'_>) -> Detection {
            let (direction, stop) = self.outcome.map_err(NoSignal)?;
            Ok(TradingSignal {
                family: self.family(),
                strategy: self.name.to_string(),
                symbol: ctx.window.symbol.clone(),
                timeframe: Timeframe::H1,
                direction,
                entry_price: 100.0,
                stop_loss: stop,
                take_profit_1: 100.0 + direction.sign() * 5.0,
                take_profit_2: None,
                confidence: 50.0,
                risk_reward: None,
                regime: None,
                atr: 1.0,
                exit_plan: ExitPlan::default(),
                generated_at: ctx.window.now,
                diagnostics: BTreeMap::new(),
            })
        }
    }

    fn fixed(name: &'static str, outcome: Result<(Direction, f64), &'static str>) -> Box<dyn SignalDetector> {
        Box::new(Fixed { name, outcome })
    }

    fn window(rate: Option<f64>) -> MarketWindow {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut w = MarketWindow::new("BNBUSDT", now, 100.0);
        w.funding_rate = rate;
        w.funding_history = (1..=30).map(|i| i as f64 / 100_000.0).collect();
        w
    }

    #[test]
    fn first_surviving_signal_wins() {
        let arbiter = SignalArbiter::from_detectors(vec![
            fixed("quiet", Err("adx_below_min")),
            fixed("broken", Ok((Direction::Long, 100.0))),
            fixed("long", Ok((Direction::Long, 98.0))),
            fixed("never_reached", Ok((Direction::Short, 102.0))),
        ]);
        let overlay = RiskOverlay::new(OverlayConfig::default());
        let universe = BTreeMap::new();
        let w = window(None);
        let mut stats = ScanStats::default();
        let won = arbiter
            .arbitrate(&DetectionContext::new(&w, &universe), &overlay, &mut stats)
            .unwrap();
        assert_eq!(won.detector, "long");
        assert_eq!(stats.get("quiet").unwrap().gates["adx_below_min"], 1);
        assert_eq!(stats.get("broken").unwrap().rejections["invalid_signal"], 1);
        assert_eq!(stats.get("long").unwrap().detected, 1);
        assert!(stats.get("never_reached").is_none());
    }

    #[test]
    fn funding_block_falls_through_to_next_detector() {
        let arbiter = SignalArbiter::from_detectors(vec![
            fixed("long", Ok((Direction::Long, 98.0))),
            fixed("short", Ok((Direction::Short, 102.0))),
        ]);
        let overlay = RiskOverlay::new(OverlayConfig {
            funding: FundingOverlayConfig {
                on_extreme: FundingAction::Block,
                ..FundingOverlayConfig::default()
            },
            ..OverlayConfig::default()
        });
        let universe = BTreeMap::new();
        let w = window(Some(0.002));
        let mut stats = ScanStats::default();
        let won = arbiter
            .arbitrate(&DetectionContext::new(&w, &universe), &overlay, &mut stats)
            .unwrap();
        assert_eq!(won.signal.direction, Direction::Short);
        assert_eq!(stats.get("long").unwrap().rejections["funding_block"], 1);
    }

    #[test]
    fn nothing_survives_returns_none() {
        let arbiter = SignalArbiter::from_detectors(vec![fixed("a", Err("insufficient_data"))]);
        let overlay = RiskOverlay::new(OverlayConfig::default());
        let universe = BTreeMap::new();
        let w = window(None);
        let mut stats = ScanStats::default();
        assert!(arbiter
            .arbitrate(&DetectionContext::new(&w, &universe), &overlay, &mut stats)
            .is_none());
        assert_eq!(stats.get("a").unwrap().analyzed, 1);
    }

    #[test]
    fn merge_adds_counters() {
        let mut a = ScanStats::default();
        a.record_analyzed("x");
        a.record_gate("x", "g");
        let mut b = ScanStats::default();
        b.record_analyzed("x");
        b.record_gate("x", "g");
        b.record_rejection("x", "regime");
        a.merge(&b);
        let f = a.get("x").unwrap();
        assert_eq!(f.analyzed, 2);
        assert_eq!(f.gates["g"], 2);
        assert_eq!(f.total_rejections(), 1);
    }
}
