//! Backtest runner: wires configuration, data and the engine together.
//!
//! Two entry points:
//! - `run_backtest()`: takes pre-loaded data. Used by the sweep, which loads once.
//! - `run_from_dir()`: loads a CSV data directory, then runs. Used by the CLI.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span};

use perplab_core::domain::TradeRecord;
use perplab_core::engine::{run_replay, ReportSink, RunReport};

use crate::config::{BacktestConfig, ConfigError, Fingerprint};
use crate::data_loader::{load_dir, LoadError, LoadedData};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("symbol '{0}' not found in loaded data")]
    SymbolNotFound(String),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    /// BLAKE3 of the configuration.
    pub fingerprint: Fingerprint,
    /// BLAKE3 of the input data.
    pub dataset_hash: String,
    /// Symbols in entry-priority order.
    pub symbols: Vec<String>,
    pub first_tick: Option<DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
    pub config: BacktestConfig,
    pub report: RunReport,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn trades(&self) -> &[TradeRecord] {
        &self.report.trades
    }
}

/// Keeps closed trades as they arrive and logs each one.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub trades: Vec<TradeRecord>,
    pub completed_runs: usize,
}

impl ReportSink for CollectingSink {
    fn on_trade_closed(&mut self, trade: &TradeRecord) {
        debug!(
            symbol = %trade.symbol,
            strategy = %trade.strategy,
            reason = %trade.close_reason,
            pnl = trade.pnl,
            "trade closed"
        );
        self.trades.push(trade.clone());
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        self.completed_runs += 1;
        debug!(trades = report.trades.len(), ticks = report.ticks, "run complete");
    }
}

/// Run one backtest over pre-loaded data.
///
/// An empty `config.symbols` trades every loaded symbol in sorted order.
pub fn run_backtest(config: &BacktestConfig, data: LoadedData) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let fingerprint = config.fingerprint()?;

    let symbols = if config.symbols.is_empty() {
        data.symbols.clone()
    } else {
        if let Some(missing) = config.symbols.iter().find(|s| !data.symbols.contains(s)) {
            return Err(RunError::SymbolNotFound(missing.clone()));
        }
        config.symbols.clone()
    };

    let span = info_span!("backtest", name = %config.name, run = %&fingerprint[..12]);
    let _guard = span.enter();

    let mut engine_config = config.clone().into_engine_config();
    engine_config.symbols = symbols.clone();
    let mut provider = data.provider;
    let mut sink = CollectingSink::default();
    let report = run_replay(engine_config, &mut provider, &mut sink);

    let s = &report.summary;
    info!(
        trades = s.trade_count,
        win_rate = s.win_rate,
        return_pct = s.return_pct,
        max_drawdown_pct = s.max_drawdown_pct,
        "backtest finished"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        name: config.name.clone(),
        fingerprint,
        dataset_hash: data.dataset_hash,
        symbols,
        first_tick: report.balance_curve.first().map(|p| p.time),
        last_tick: report.balance_curve.last().map(|p| p.time),
        config: config.clone(),
        report,
    })
}

/// Load `data_dir` for the timeframes `config` needs, then run.
pub fn run_from_dir(config: &BacktestConfig, data_dir: &Path) -> Result<BacktestResult, RunError> {
    let data = load_for(config, data_dir)?;
    run_backtest(config, data)
}

/// Load exactly the symbols and timeframes `config` reads.
pub fn load_for(config: &BacktestConfig, data_dir: &Path) -> Result<LoadedData, RunError> {
    config.validate()?;
    let timeframes = config.clone().into_engine_config().required_timeframes();
    Ok(load_dir(data_dir, &config.symbols, &timeframes)?)
}
