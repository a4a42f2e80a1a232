//! Parameter sweep over risk per trade and trailing-stop distance.
//!
//! Every grid point is an independent, deterministic replay of the same
//! loaded data, so points run in parallel and the results come back in grid
//! order regardless of scheduling.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BacktestConfig;
use crate::data_loader::LoadedData;
use crate::runner::{run_backtest, BacktestResult};

/// Values to try on each axis. The grid is their cross product, risk-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepGrid {
    pub risk_per_trade: Vec<f64>,
    /// Applied to every configured detector's exit plan.
    pub trail_atr_multiple: Vec<f64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            risk_per_trade: vec![0.005, 0.01, 0.02],
            trail_atr_multiple: vec![1.5, 2.0, 3.0],
        }
    }
}

/// One grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub index: usize,
    pub risk_per_trade: f64,
    pub trail_atr_multiple: f64,
}

impl SweepGrid {
    /// Returns the total number of configurations in this grid.
    pub fn size(&self) -> usize {
        self.risk_per_trade.len() * self.trail_atr_multiple.len()
    }

    pub fn points(&self) -> Vec<SweepPoint> {
        let mut points = Vec::with_capacity(self.size());
        for &risk in &self.risk_per_trade {
            for &trail in &self.trail_atr_multiple {
                points.push(SweepPoint {
                    index: points.len(),
                    risk_per_trade: risk,
                    trail_atr_multiple: trail,
                });
            }
        }
        points
    }

    /// `base` adjusted to `point`.
    pub fn config_for(base: &BacktestConfig, point: &SweepPoint) -> BacktestConfig {
        let mut config = base.clone();
        config.name = format!(
            "{}/risk={}/trail={}",
            base.name, point.risk_per_trade, point.trail_atr_multiple
        );
        config.overlay.sizing.risk_per_trade = point.risk_per_trade;
        for detector in &mut config.detectors {
            detector.exit_plan_mut().trail_atr_multiple = point.trail_atr_multiple;
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub point: SweepPoint,
    pub result: BacktestResult,
}

/// Results from a parameter sweep, in grid order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    entries: Vec<SweepEntry>,
}

impl SweepResults {
    pub fn all(&self) -> &[SweepEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest return; the earlier grid point wins a tie.
    pub fn best_by_return(&self) -> Option<&SweepEntry> {
        self.entries.iter().fold(None, |best: Option<&SweepEntry>, e| match best {
            Some(b) if b.result.report.summary.return_pct >= e.result.report.summary.return_pct => Some(b),
            _ => Some(e),
        })
    }
}

/// Run every grid point over `data`.
pub fn run_sweep(grid: &SweepGrid, base: &BacktestConfig, data: &LoadedData) -> Result<SweepResults> {
    if grid.size() == 0 {
        bail!("sweep grid is empty: both axes need at least one value");
    }
    base.validate().context("invalid base config")?;

    let points = grid.points();
    info!(points = points.len(), "starting sweep");
    let entries = points
        .par_iter()
        .map(|point| {
            let config = SweepGrid::config_for(base, point);
            let result = run_backtest(&config, data.clone())
                .with_context(|| format!("sweep point {} ({})", point.index, config.name))?;
            Ok(SweepEntry { point: *point, result })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SweepResults { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::load_dir;
    use crate::synthetic::{generate, SyntheticConfig};
    use perplab_core::detectors::{DetectorConfig, TrendPullbackConfig, VolumeClimaxConfig};

    fn base() -> BacktestConfig {
        BacktestConfig {
            name: "grid".into(),
            history_bars: 120,
            detectors: vec![
                DetectorConfig::TrendPullback(TrendPullbackConfig::default()),
                DetectorConfig::VolumeClimax(VolumeClimaxConfig::default()),
            ],
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn points_are_risk_major() {
        let grid = SweepGrid {
            risk_per_trade: vec![0.01, 0.02],
            trail_atr_multiple: vec![1.5, 2.5, 3.5],
        };
        assert_eq!(grid.size(), 6);
        let points = grid.points();
        assert_eq!(points[1].risk_per_trade, 0.01);
        assert_eq!(points[1].trail_atr_multiple, 2.5);
        assert_eq!(points[3].risk_per_trade, 0.02);
        assert_eq!(points[3].trail_atr_multiple, 1.5);
        assert!(points.iter().enumerate().all(|(i, p)| p.index == i));
    }

    #[test]
    fn config_for_touches_every_detector() {
        let point = SweepPoint {
            index: 0,
            risk_per_trade: 0.02,
            trail_atr_multiple: 2.75,
        };
        let config = SweepGrid::config_for(&base(), &point);
        assert_eq!(config.overlay.sizing.risk_per_trade, 0.02);
        assert!(config.detectors.iter().all(|d| d.exit_plan().trail_atr_multiple == 2.75));
        assert_ne!(config.fingerprint().unwrap(), base().fingerprint().unwrap());
    }

    #[test]
    fn empty_grid_is_an_error() {
        let grid = SweepGrid {
            risk_per_trade: vec![],
            trail_atr_multiple: vec![2.0],
        };
        let data = crate::data_loader::LoadedData {
            provider: Default::default(),
            symbols: vec![],
            derived: vec![],
            dataset_hash: String::new(),
        };
        assert!(run_sweep(&grid, &base(), &data).is_err());
    }

    #[test]
    fn parallel_results_match_sequential_runs_in_grid_order() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SyntheticConfig {
            symbols: vec!["AAAUSDT".into(), "BBBUSDT".into()],
            days: 3,
            seed: 5,
            ..SyntheticConfig::default()
        };
        generate(&synth).write_dir(dir.path()).unwrap();
        let timeframes = base().into_engine_config().required_timeframes();
        let data = load_dir(dir.path(), &[], &timeframes).unwrap();

        let grid = SweepGrid {
            risk_per_trade: vec![0.005, 0.02],
            trail_atr_multiple: vec![1.5, 3.0],
        };
        let results = run_sweep(&grid, &base(), &data).unwrap();
        assert_eq!(results.len(), 4);

        for (entry, point) in results.all().iter().zip(grid.points()) {
            assert_eq!(entry.point, point);
            let config = SweepGrid::config_for(&base(), &point);
            let sequential = run_backtest(&config, data.clone()).unwrap();
            assert_eq!(entry.result, sequential);
        }
        assert!(results.best_by_return().is_some());
    }
}
