//! PerpLab Runner — backtest orchestration around `perplab-core`.
//!
//! This crate provides:
//! - TOML configuration with validation and a content fingerprint
//! - CSV data loading with higher-timeframe resampling
//! - Seeded synthetic fixtures for development and tests
//! - Single-run orchestration with a dataset hash
//! - Artifact export (JSON, CSV, Markdown scan report)
//! - Parallel parameter sweeps

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod sweep;
pub mod synthetic;

pub use config::{BacktestConfig, ConfigError, Fingerprint};
pub use data_loader::{load_dir, LoadError, LoadedData};
pub use export::{generate_report, save_artifacts, scan_report, sweep_report};
pub use runner::{load_for, run_backtest, run_from_dir, BacktestResult, CollectingSink, RunError, SCHEMA_VERSION};
pub use sweep::{run_sweep, SweepEntry, SweepGrid, SweepPoint, SweepResults};
pub use synthetic::{generate, SyntheticConfig, SyntheticMarket};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<SweepGrid>();
        assert_sync::<SweepGrid>();
    }

    #[test]
    fn loaded_data_is_send_sync() {
        assert_send::<LoadedData>();
        assert_sync::<LoadedData>();
    }

    #[test]
    fn backtest_result_is_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<RunError>();
        assert_sync::<RunError>();
    }
}
