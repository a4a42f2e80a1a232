//! Serializable backtest configuration.
//!
//! A partial TOML file is valid: every section falls back to its defaults.
//!
//! ```toml
//! name = "majors"
//! initial_balance = 25000.0
//! symbols = ["BTCUSDT", "ETHUSDT"]
//!
//! [overlay.sizing]
//! risk_per_trade = 0.005
//!
//! [[detectors]]
//! kind = "trend_pullback"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use perplab_core::detectors::{default_detectors, DetectorConfig};
use perplab_core::domain::Timeframe;
use perplab_core::engine::EngineConfig;
use perplab_core::lifecycle::CostConfig;
use perplab_core::overlay::OverlayConfig;

/// Content hash of a configuration.
pub type Fingerprint = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything needed to reproduce one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Free-form label carried into artifacts.
    pub name: String,
    pub initial_balance: f64,
    /// Entry priority between symbols. Empty means every symbol in the data
    /// directory, sorted.
    pub symbols: Vec<String>,
    pub execution_timeframe: Timeframe,
    pub history_bars: usize,
    /// Arbitration priority order.
    pub detectors: Vec<DetectorConfig>,
    pub overlay: OverlayConfig,
    pub cost: CostConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            name: "default".into(),
            initial_balance: engine.initial_balance,
            symbols: engine.symbols,
            execution_timeframe: engine.execution_timeframe,
            history_bars: engine.history_bars,
            detectors: default_detectors(),
            overlay: engine.overlay,
            cost: engine.cost,
        }
    }
}

impl BacktestConfig {
    /// Parse and validate.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }

        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return invalid(format!("initial_balance must be positive, got {}", self.initial_balance));
        }
        if self.history_bars == 0 {
            return invalid("history_bars must be at least 1");
        }
        if self.detectors.is_empty() {
            return invalid("at least one detector is required");
        }
        let mut seen = BTreeSet::new();
        for symbol in &self.symbols {
            if symbol.trim().is_empty() {
                return invalid("empty symbol name");
            }
            if !seen.insert(symbol.as_str()) {
                return invalid(format!("duplicate symbol '{symbol}'"));
            }
        }
        for detector in &self.detectors {
            let plan = detector.exit_plan();
            if !(plan.tp1_fraction > 0.0 && plan.tp1_fraction <= 1.0) {
                return invalid(format!("tp1_fraction must be in (0, 1], got {}", plan.tp1_fraction));
            }
            if !(plan.trail_atr_multiple > 0.0) {
                return invalid(format!(
                    "trail_atr_multiple must be positive, got {}",
                    plan.trail_atr_multiple
                ));
            }
        }

        let sizing = &self.overlay.sizing;
        if !(sizing.risk_per_trade > 0.0 && sizing.risk_per_trade <= 1.0) {
            return invalid(format!("risk_per_trade must be in (0, 1], got {}", sizing.risk_per_trade));
        }
        if sizing.min_position_usd > sizing.max_position_usd {
            return invalid("min_position_usd exceeds max_position_usd");
        }
        if sizing.max_leverage == 0 {
            return invalid("max_leverage must be at least 1");
        }
        if !(sizing.max_margin_pct > 0.0 && sizing.max_margin_pct <= 1.0) {
            return invalid("max_margin_pct must be in (0, 1]");
        }

        let exposure = &self.overlay.exposure;
        if exposure.max_positions == 0 {
            return invalid("max_positions must be at least 1");
        }
        if !(exposure.min_scale > 0.0 && exposure.min_scale <= 1.0) {
            return invalid("exposure min_scale must be in (0, 1]");
        }

        let funding = &self.overlay.funding;
        if !(0.0..=1.0).contains(&funding.low_percentile)
            || !(0.0..=1.0).contains(&funding.high_percentile)
            || funding.low_percentile >= funding.high_percentile
        {
            return invalid("funding percentiles must satisfy 0 <= low < high <= 1");
        }
        if funding.cache_staleness_hours < 0 {
            return invalid("cache_staleness_hours must not be negative");
        }

        if self.cost.commission_rate < 0.0 {
            return invalid("commission_rate must not be negative");
        }
        Ok(())
    }

    pub fn into_engine_config(self) -> EngineConfig {
        EngineConfig {
            initial_balance: self.initial_balance,
            symbols: self.symbols,
            execution_timeframe: self.execution_timeframe,
            history_bars: self.history_bars,
            detectors: self.detectors,
            overlay: self.overlay,
            cost: self.cost,
        }
    }

    /// BLAKE3 over the canonical JSON form; equal configs share a fingerprint.
    pub fn fingerprint(&self) -> Result<Fingerprint, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_the_default() {
        let config = BacktestConfig::from_toml_str("").unwrap();
        assert_eq!(config, BacktestConfig::default());
        assert_eq!(config.detectors.len(), 8);
    }

    #[test]
    fn partial_toml_overrides_only_what_it_names() {
        let src = r#"
            name = "majors"
            symbols = ["BTCUSDT", "ETHUSDT"]
            execution_timeframe = "1h"

            [overlay.sizing]
            risk_per_trade = 0.005

            [[detectors]]
            kind = "trend_pullback"

            [[detectors]]
            kind = "volume_climax"
            volume_mult = 4.0
        "#;
        let config = BacktestConfig::from_toml_str(src).unwrap();
        assert_eq!(config.name, "majors");
        assert_eq!(config.execution_timeframe, Timeframe::H1);
        assert_eq!(config.overlay.sizing.risk_per_trade, 0.005);
        assert_eq!(config.overlay.sizing.max_leverage, 20);
        assert_eq!(config.detectors.len(), 2);
        assert!(matches!(config.detectors[0], DetectorConfig::TrendPullback(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = [
            "initial_balance = -5.0",
            "history_bars = 0",
            "detectors = []",
            "symbols = [\"BTCUSDT\", \"BTCUSDT\"]",
            "[overlay.sizing]\nrisk_per_trade = 1.5",
            "[overlay.exposure]\nmax_positions = 0",
            "[overlay.funding]\nlow_percentile = 0.9\nhigh_percentile = 0.1",
        ];
        for src in bad {
            match BacktestConfig::from_toml_str(src) {
                Err(ConfigError::Invalid(_)) => {}
                other => panic!("expected Invalid for {src:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            BacktestConfig::from_toml_str("initial_balance = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive() {
        let a = BacktestConfig::default();
        let b = BacktestConfig::default();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        let mut c = BacktestConfig::default();
        c.overlay.sizing.risk_per_trade = 0.02;
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = BacktestConfig::default();
        config.symbols = vec!["SOLUSDT".into()];
        let text = config.to_toml_string().unwrap();
        let back = BacktestConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn converts_into_engine_config() {
        let mut config = BacktestConfig::default();
        config.initial_balance = 5_000.0;
        config.symbols = vec!["XRPUSDT".into()];
        let engine = config.clone().into_engine_config();
        assert_eq!(engine.initial_balance, 5_000.0);
        assert_eq!(engine.symbols, config.symbols);
        assert_eq!(engine.detectors, config.detectors);
    }
}
