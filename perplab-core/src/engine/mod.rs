//! Event loop — one parameterized driver for replay and live runs.
//!
//! Each tick, in this order:
//!
//! 1. overlay housekeeping (`begin_tick`)
//! 2. exits: every open position, in open order, accrues funding and steps
//!    through the newest execution bar; closes free capacity immediately
//! 3. entries: symbols in configured order, while capacity remains, go
//!    through arbitration, overlay sizing and (optionally) live routing
//! 4. balance, peak and drawdown bookkeeping
//!
//! The open-position set is owned here and nowhere else. Given the same data
//! and configuration a replay produces byte-identical output.

pub mod live;
pub mod provider;
pub mod report;

pub use live::{
    AlertLevel, AlertLog, AlertSink, EntryRequest, GatewayCall, GatewayError, LiveExecution, LogAlerts, OrderGateway,
    PaperGateway, ProtectedEntry, ProtectiveStopGuard,
};
pub use provider::{DataUnavailable, MarketDataProvider, ReplayProvider};
pub use report::{NullSink, PerformanceSummary, ReportSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::arbitration::{Arbitration, ScanStats, SignalArbiter};
use crate::detectors::{default_detectors, DetectionContext, DetectorConfig, MarketWindow};
use crate::domain::{CloseReason, Position, PositionId, Timeframe, TradeRecord};
use crate::lifecycle::{open_position, CostConfig, PositionSimulator};
use crate::overlay::{ExposureRejection, ExposureState, OverlayConfig, PositionSize, RiskOverlay};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_balance: f64,
    /// Processing order, which is also entry priority between symbols.
    pub symbols: Vec<String>,
    /// Bars that drive stops, targets and trailing updates.
    pub execution_timeframe: Timeframe,
    /// Candles per timeframe handed to the detectors.
    pub history_bars: usize,
    /// Priority order.
    pub detectors: Vec<DetectorConfig>,
    pub overlay: OverlayConfig,
    pub cost: CostConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            symbols: Vec::new(),
            execution_timeframe: Timeframe::M15,
            history_bars: 300,
            detectors: default_detectors(),
            overlay: OverlayConfig::default(),
            cost: CostConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Every timeframe a run reads: detector frames plus the regime and
    /// execution timeframes, shortest first.
    pub fn required_timeframes(&self) -> Vec<Timeframe> {
        let mut timeframes: BTreeSet<Timeframe> = self.detectors.iter().flat_map(DetectorConfig::timeframes).collect();
        timeframes.insert(self.overlay.regime.timeframe);
        timeframes.insert(self.execution_timeframe);
        timeframes.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancePoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
    /// `(peak - balance) / peak`.
    pub drawdown: f64,
    pub open_positions: usize,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub trades: Vec<TradeRecord>,
    pub summary: PerformanceSummary,
    pub scan_stats: ScanStats,
    pub balance_curve: Vec<BalancePoint>,
    pub ticks: usize,
}

pub struct Engine {
    config: EngineConfig,
    timeframes: Vec<Timeframe>,
    arbiter: SignalArbiter,
    overlay: RiskOverlay,
    simulator: PositionSimulator,
    live: Option<Box<dyn LiveExecution>>,
    positions: Vec<Position>,
    trades: Vec<TradeRecord>,
    stats: ScanStats,
    balance: f64,
    peak: f64,
    max_drawdown: f64,
    balance_curve: Vec<BalancePoint>,
    next_id: u64,
    ticks: usize,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let arbiter = SignalArbiter::new(&config.detectors);
        Self::with_arbiter(config, arbiter)
    }

    /// Use a pre-built detector list instead of `config.detectors`. Windows
    /// are still built for the configured detectors' timeframes plus the
    /// regime and execution timeframes.
    pub fn with_arbiter(config: EngineConfig, arbiter: SignalArbiter) -> Self {
        Self {
            timeframes: config.required_timeframes(),
            arbiter,
            overlay: RiskOverlay::new(config.overlay.clone()),
            simulator: PositionSimulator::new(config.cost.clone()),
            live: None,
            positions: Vec::new(),
            trades: Vec::new(),
            stats: ScanStats::default(),
            balance: config.initial_balance,
            peak: config.initial_balance,
            max_drawdown: 0.0,
            balance_curve: Vec::new(),
            next_id: 1,
            ticks: 0,
            config,
        }
    }

    /// Route entries through live execution. End-of-data closes become
    /// `EMERGENCY` closes.
    pub fn with_live(mut self, live: Box<dyn LiveExecution>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Process one tick at `provider.current_time()`.
    pub fn step<P: MarketDataProvider + ?Sized>(&mut self, provider: &P, sink: &mut dyn ReportSink) {
        let now = provider.current_time();
        let _span = tracing::debug_span!("tick", %now).entered();
        self.ticks += 1;
        self.overlay.begin_tick(now);
        self.process_exits(provider, now, sink);
        self.process_entries(provider, now, sink);
        self.mark_balance(now);
    }

    /// Force-close what is still open and assemble the report.
    pub fn finish<P: MarketDataProvider + ?Sized>(mut self, provider: &P, sink: &mut dyn ReportSink) -> RunReport {
        let now = provider.current_time();
        let reason = if self.live.is_some() {
            CloseReason::Emergency
        } else {
            CloseReason::EndOfBacktest
        };
        for mut position in std::mem::take(&mut self.positions) {
            let price = provider.current_price(&position.symbol).unwrap_or(position.last_price);
            let outcome = self.simulator.force_close(&mut position, reason, now, price);
            self.balance += outcome.realized;
            self.record_closed(&position, sink);
        }
        self.mark_balance(now);

        let summary = PerformanceSummary::compute(
            &self.trades,
            self.config.initial_balance,
            self.balance,
            self.max_drawdown * 100.0,
        );
        tracing::info!(
            trades = summary.trade_count,
            total_pnl = summary.total_pnl,
            win_rate = summary.win_rate,
            max_drawdown_pct = summary.max_drawdown_pct,
            "run complete"
        );
        let report = RunReport {
            trades: self.trades,
            summary,
            scan_stats: self.stats,
            balance_curve: self.balance_curve,
            ticks: self.ticks,
        };
        sink.on_run_complete(&report);
        report
    }

    /// Drive the engine over the provider's whole timeline.
    pub fn run_replay(mut self, provider: &mut ReplayProvider, sink: &mut dyn ReportSink) -> RunReport {
        let timeline = provider.timeline(&self.timeframes);
        tracing::info!(
            ticks = timeline.len(),
            symbols = self.config.symbols.len(),
            detectors = ?self.arbiter.detector_names(),
            "replay started"
        );
        for t in timeline {
            provider.advance_to(t);
            self.step(&*provider, sink);
        }
        self.finish(&*provider, sink)
    }

    fn process_exits<P: MarketDataProvider + ?Sized>(&mut self, provider: &P, now: DateTime<Utc>, sink: &mut dyn ReportSink) {
        let exec_tf = self.config.execution_timeframe;
        let mut still_open = Vec::with_capacity(self.positions.len());
        for mut position in std::mem::take(&mut self.positions) {
            let mut realized = 0.0;
            match provider.funding_settlements(&position.symbol, position.funding_accrued_until) {
                Ok(settlements) => {
                    realized += self.simulator.accrue_funding(&mut position, &settlements, now).realized;
                }
                Err(e) => tracing::trace!(symbol = %position.symbol, error = %e, "no funding settlements"),
            }
            match provider.candles(&position.symbol, exec_tf, 1) {
                Ok(bars) => {
                    if let Some(bar) = bars.last().filter(|b| b.close_time > position.last_bar_close) {
                        realized += self.simulator.step(&mut position, bar).realized;
                    }
                }
                Err(e) => tracing::debug!(symbol = %position.symbol, error = %e, "no bar for open position"),
            }
            debug_assert!(position.notional_conserved(1e-6), "notional not conserved for {}", position.id);
            self.balance += realized;
            if position.is_open() {
                still_open.push(position);
            } else {
                self.record_closed(&position, sink);
            }
        }
        self.positions = still_open;
    }

    fn process_entries<P: MarketDataProvider + ?Sized>(&mut self, provider: &P, now: DateTime<Utc>, sink: &mut dyn ReportSink) {
        let has_capacity = self.positions.len() < self.config.overlay.exposure.max_positions;
        let universe = self.scan_market(provider, now, has_capacity);
        if !has_capacity {
            return;
        }

        let mut state = ExposureState::from_positions(&self.positions);
        for symbol in self.config.symbols.clone() {
            let Some(window) = universe.get(&symbol) else {
                continue;
            };
            match self.overlay.check_capacity(&state, &symbol) {
                Ok(()) => {}
                Err(ExposureRejection::MaxPositions { .. }) => break,
                Err(_) => continue,
            }
            let ctx = DetectionContext::new(window, &universe);
            let Some(arbitration) = self.arbiter.arbitrate(&ctx, &self.overlay, &mut self.stats) else {
                continue;
            };
            match self.overlay.size(&state, &arbitration.signal, self.balance) {
                Ok(size) => {
                    if self.open(&arbitration, &size, now, sink) {
                        self.stats.record_accepted(&arbitration.detector);
                        state = ExposureState::from_positions(&self.positions);
                    }
                }
                Err(rejection) => {
                    tracing::debug!(
                        symbol = %symbol,
                        detector = %arbitration.detector,
                        %rejection,
                        "entry rejected"
                    );
                    self.stats.record_rejection(&arbitration.detector, rejection.reason());
                }
            }
        }
    }

    /// Feed funding to the overlay's extreme cache for every symbol and, when
    /// `build_windows`, assemble the detector windows.
    fn scan_market<P: MarketDataProvider + ?Sized>(
        &mut self,
        provider: &P,
        now: DateTime<Utc>,
        build_windows: bool,
    ) -> BTreeMap<String, MarketWindow> {
        let history_len = self.config.overlay.funding.history_len;
        let mut universe = BTreeMap::new();
        for symbol in &self.config.symbols {
            let funding_rate = provider.funding_rate(symbol).ok();
            let funding_history = match funding_rate {
                Some(rate) => {
                    let history = provider.funding_history(symbol, history_len).unwrap_or_default();
                    self.overlay.observe_funding(symbol, rate, &history, now);
                    history
                }
                None => Vec::new(),
            };
            if !build_windows {
                continue;
            }
            let price = match provider.current_price(symbol) {
                Ok(price) => price,
                Err(e) => {
                    tracing::debug!(symbol = %symbol, error = %e, "skipping symbol this tick");
                    continue;
                }
            };
            let mut window = MarketWindow::new(symbol.clone(), now, price);
            for &tf in &self.timeframes {
                if let Ok(candles) = provider.candles(symbol, tf, self.config.history_bars) {
                    window.frames.insert(tf, candles);
                }
            }
            window.funding_rate = funding_rate;
            window.funding_history = funding_history;
            window.funding_extreme = self.overlay.cached_extreme(symbol);
            universe.insert(symbol.clone(), window);
        }
        universe
    }

    /// Open a position for an accepted, sized signal. Returns false when live
    /// routing could not open it.
    fn open(&mut self, arbitration: &Arbitration, size: &PositionSize, now: DateTime<Utc>, sink: &mut dyn ReportSink) -> bool {
        let signal = &arbitration.signal;
        let id = PositionId(self.next_id);
        let mut position = open_position(id, signal, size, now);

        if let Some(live) = self.live.as_mut() {
            let request = EntryRequest {
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                notional: size.notional,
                leverage: size.leverage,
                reference_price: signal.entry_price,
                stop_price: signal.stop_loss,
            };
            match live.open_protected(&request) {
                ProtectedEntry::Protected { fill_price } => position.entry_price = fill_price,
                ProtectedEntry::Unprotected { fill_price } => {
                    tracing::error!(id = %id, symbol = %signal.symbol, "position held without a protective stop");
                    position.entry_price = fill_price;
                }
                ProtectedEntry::EmergencyClosed { fill_price, exit_price } => {
                    self.next_id += 1;
                    position.entry_price = fill_price;
                    let outcome = self
                        .simulator
                        .close_at_fill(&mut position, CloseReason::Emergency, now, exit_price);
                    self.balance += outcome.realized;
                    self.record_closed(&position, sink);
                    return true;
                }
                ProtectedEntry::NotOpened(e) => {
                    tracing::warn!(symbol = %signal.symbol, error = %e, "live entry failed");
                    self.stats.record_rejection(&arbitration.detector, "live:open_failed");
                    return false;
                }
            }
        }

        self.next_id += 1;
        tracing::info!(
            id = %id,
            symbol = %position.symbol,
            strategy = %position.strategy,
            direction = %position.direction,
            entry = position.entry_price,
            stop = position.stop_price,
            tp1 = position.take_profit_1,
            notional = position.initial_notional,
            leverage = position.leverage,
            "position opened"
        );
        self.positions.push(position);
        true
    }

    fn record_closed(&mut self, position: &Position, sink: &mut dyn ReportSink) {
        let last_exit = position.exits.last();
        let exit_time = last_exit.map_or(position.last_bar_close, |e| e.time);
        let exit_price = last_exit.map_or(position.last_price, |e| e.price);
        if let Some(trade) = TradeRecord::from_position(position, exit_time, exit_price) {
            self.overlay.record_close(&trade);
            sink.on_trade_closed(&trade);
            self.trades.push(trade);
        }
    }

    fn mark_balance(&mut self, now: DateTime<Utc>) {
        self.peak = self.peak.max(self.balance);
        let drawdown = if self.peak > 0.0 {
            (self.peak - self.balance) / self.peak
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(drawdown);
        let point = BalancePoint {
            time: now,
            balance: self.balance,
            drawdown,
            open_positions: self.positions.len(),
        };
        match self.balance_curve.last_mut() {
            Some(last) if last.time == now => *last = point,
            _ => self.balance_curve.push(point),
        }
    }
}

/// Replay `provider` under `config`. An empty symbol list means every symbol
/// the provider has, in sorted order.
pub fn run_replay(mut config: EngineConfig, provider: &mut ReplayProvider, sink: &mut dyn ReportSink) -> RunReport {
    if config.symbols.is_empty() {
        config.symbols = provider.symbols();
    }
    Engine::new(config).run_replay(provider, sink)
}
