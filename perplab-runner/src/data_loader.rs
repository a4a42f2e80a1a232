//! CSV data loading for replay runs.
//!
//! A data directory holds one file per symbol and timeframe plus an optional
//! funding file per symbol:
//!
//! ```text
//! BTCUSDT_15m.csv      open_time,close_time,open,high,low,close,volume,trade_count
//! BTCUSDT_1h.csv
//! BTCUSDT_funding.csv  time,rate
//! ```
//!
//! Timestamps are RFC 3339 in UTC. A timeframe with no file is derived by
//! resampling the longest shorter timeframe that divides it evenly. A symbol
//! without a funding file runs with no funding data: the overlay allows and no
//! funding is charged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use perplab_core::domain::{
    resample, validate_series, Candle, CandleError, FundingPoint, FundingRateSeries, Timeframe,
};
use perplab_core::engine::ReplayProvider;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("bad candle data in {path}: {source}")]
    Candle {
        path: String,
        #[source]
        source: CandleError,
    },

    #[error("no {timeframe} data for '{symbol}' and nothing to resample it from")]
    MissingTimeframe { symbol: String, timeframe: Timeframe },

    #[error("no candle files found in {0}")]
    NoSymbols(String),
}

/// One row of a candle file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRow {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: Option<u64>,
}

impl CandleRow {
    fn into_candle(self, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
        }
    }
}

impl From<&Candle> for CandleRow {
    fn from(c: &Candle) -> Self {
        Self {
            open_time: c.open_time,
            close_time: c.close_time,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            trade_count: c.trade_count,
        }
    }
}

/// One row of a funding file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingRow {
    pub time: DateTime<Utc>,
    pub rate: f64,
}

/// Loaded market data, ready to replay.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub provider: ReplayProvider,
    /// Symbols found, sorted.
    pub symbols: Vec<String>,
    /// (symbol, timeframe) pairs built by resampling instead of read from disk.
    pub derived: Vec<(String, Timeframe)>,
    /// BLAKE3 over every loaded value, in sorted symbol/timeframe order.
    pub dataset_hash: String,
}

pub fn candle_path(dir: &Path, symbol: &str, timeframe: Timeframe) -> PathBuf {
    dir.join(format!("{symbol}_{timeframe}.csv"))
}

pub fn funding_path(dir: &Path, symbol: &str) -> PathBuf {
    dir.join(format!("{symbol}_funding.csv"))
}

/// Symbols with at least one candle file in `dir`, sorted.
pub fn discover_symbols(dir: &Path) -> Result<Vec<String>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| io_error(dir, source))?;
    let mut symbols = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|source| io_error(dir, source))?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".csv")) else {
            continue;
        };
        if let Some((symbol, suffix)) = stem.rsplit_once('_') {
            if suffix.parse::<Timeframe>().is_ok() && !symbol.is_empty() {
                symbols.insert(symbol.to_string());
            }
        }
    }
    Ok(symbols.into_iter().collect())
}

/// Load `symbols` (every symbol in `dir` when empty) at each of `timeframes`.
pub fn load_dir(dir: &Path, symbols: &[String], timeframes: &[Timeframe]) -> Result<LoadedData, LoadError> {
    let symbols = if symbols.is_empty() {
        discover_symbols(dir)?
    } else {
        let mut sorted = symbols.to_vec();
        sorted.sort();
        sorted
    };
    if symbols.is_empty() {
        return Err(LoadError::NoSymbols(dir.display().to_string()));
    }

    let wanted: BTreeSet<Timeframe> = timeframes.iter().copied().collect();
    let mut provider = ReplayProvider::new();
    let mut derived = Vec::new();
    let mut hasher = blake3::Hasher::new();

    for symbol in &symbols {
        let mut frames: BTreeMap<Timeframe, Vec<Candle>> = BTreeMap::new();
        for tf in Timeframe::ALL {
            let path = candle_path(dir, symbol, tf);
            if path.exists() {
                frames.insert(tf, read_candles(&path, symbol, tf)?);
            }
        }
        if frames.is_empty() {
            return Err(LoadError::Io {
                path: candle_path(dir, symbol, Timeframe::M15).display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no candle files for symbol"),
            });
        }

        for &tf in &wanted {
            if frames.contains_key(&tf) {
                continue;
            }
            let source = frames
                .keys()
                .rev()
                .copied()
                .find(|s| *s < tf && tf.minutes() % s.minutes() == 0)
                .ok_or_else(|| LoadError::MissingTimeframe {
                    symbol: symbol.clone(),
                    timeframe: tf,
                })?;
            let built = resample(&frames[&source], tf);
            debug!(symbol = %symbol, from = %source, to = %tf, candles = built.len(), "resampled");
            derived.push((symbol.clone(), tf));
            frames.insert(tf, built);
        }

        for (tf, candles) in frames.into_iter().filter(|(tf, _)| wanted.contains(tf)) {
            hash_candles(&mut hasher, symbol, tf, &candles);
            provider.insert_candles(candles);
        }

        let fpath = funding_path(dir, symbol);
        if fpath.exists() {
            let series = read_funding(&fpath, symbol)?;
            hash_funding(&mut hasher, &series);
            provider.insert_funding(series);
        } else {
            warn!(symbol = %symbol, "no funding file; funding is treated as unknown");
        }
    }

    let dataset_hash = hasher.finalize().to_hex().to_string();
    info!(symbols = symbols.len(), dataset = %&dataset_hash[..12], "data loaded");
    Ok(LoadedData {
        provider,
        symbols,
        derived,
        dataset_hash,
    })
}

pub fn read_candles(path: &Path, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, LoadError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| csv_error(path, source))?;
    let mut candles = Vec::new();
    for row in reader.deserialize::<CandleRow>() {
        let row = row.map_err(|source| csv_error(path, source))?;
        candles.push(row.into_candle(symbol, timeframe));
    }
    validate_series(&candles).map_err(|source| LoadError::Candle {
        path: path.display().to_string(),
        source,
    })?;
    Ok(candles)
}

pub fn read_funding(path: &Path, symbol: &str) -> Result<FundingRateSeries, LoadError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| csv_error(path, source))?;
    let mut points = Vec::new();
    for row in reader.deserialize::<FundingRow>() {
        let row = row.map_err(|source| csv_error(path, source))?;
        points.push(FundingPoint {
            time: row.time,
            rate: row.rate,
        });
    }
    Ok(FundingRateSeries::new(symbol, points))
}

pub fn write_candles(path: &Path, candles: &[Candle]) -> Result<(), LoadError> {
    let mut writer = csv::Writer::from_path(path).map_err(|source| csv_error(path, source))?;
    for candle in candles {
        writer
            .serialize(CandleRow::from(candle))
            .map_err(|source| csv_error(path, source))?;
    }
    writer.flush().map_err(|source| io_error(path, source))
}

pub fn write_funding(path: &Path, series: &FundingRateSeries) -> Result<(), LoadError> {
    let mut writer = csv::Writer::from_path(path).map_err(|source| csv_error(path, source))?;
    for p in series.points() {
        writer
            .serialize(FundingRow {
                time: p.time,
                rate: p.rate,
            })
            .map_err(|source| csv_error(path, source))?;
    }
    writer.flush().map_err(|source| io_error(path, source))
}

fn hash_candles(hasher: &mut blake3::Hasher, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
    hasher.update(symbol.as_bytes());
    hasher.update(timeframe.as_str().as_bytes());
    for c in candles {
        hasher.update(&c.close_time.timestamp().to_le_bytes());
        hasher.update(&c.open.to_le_bytes());
        hasher.update(&c.high.to_le_bytes());
        hasher.update(&c.low.to_le_bytes());
        hasher.update(&c.close.to_le_bytes());
        hasher.update(&c.volume.to_le_bytes());
    }
}

fn hash_funding(hasher: &mut blake3::Hasher, series: &FundingRateSeries) {
    hasher.update(series.symbol.as_bytes());
    hasher.update(b"funding");
    for p in series.points() {
        hasher.update(&p.time.timestamp().to_le_bytes());
        hasher.update(&p.rate.to_le_bytes());
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn csv_error(path: &Path, source: csv::Error) -> LoadError {
    LoadError::Csv {
        path: path.display().to_string(),
        source,
    }
}
