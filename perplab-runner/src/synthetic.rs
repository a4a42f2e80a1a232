//! Seeded synthetic market fixtures.
//!
//! A random walk with drift regimes, volatility clustering, occasional volume
//! climaxes and an 8-hour funding series that leans with the trend and now and
//! then spikes to an extreme. Output is fully determined by the seed and the
//! symbol list, so fixtures are reproducible across machines.
//!
//! These are developer fixtures, not market data; nothing here is meant to
//! resemble a real venue closely enough to draw conclusions from.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use perplab_core::domain::{funding_interval, resample, Candle, FundingPoint, FundingRateSeries, Timeframe};
use perplab_core::engine::ReplayProvider;

use crate::data_loader::{candle_path, funding_path, write_candles, write_funding, LoadError};

/// Higher timeframes written next to the base series.
pub const DERIVED_TIMEFRAMES: [Timeframe; 2] = [Timeframe::H1, Timeframe::H4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub days: u32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            days: 30,
            seed: 42,
        }
    }
}

/// Generated 15m candles and funding per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticMarket {
    pub candles: BTreeMap<String, Vec<Candle>>,
    pub funding: BTreeMap<String, FundingRateSeries>,
}

pub fn generate(config: &SyntheticConfig) -> SyntheticMarket {
    let mut candles = BTreeMap::new();
    let mut funding = BTreeMap::new();
    for symbol in &config.symbols {
        let mut rng = StdRng::seed_from_u64(symbol_seed(config.seed, symbol));
        let (series, drifts) = random_walk(&mut rng, symbol, config.start, config.days);
        funding.insert(
            symbol.clone(),
            funding_series(&mut rng, symbol, config.start, config.days, &drifts),
        );
        candles.insert(symbol.clone(), series);
    }
    SyntheticMarket { candles, funding }
}

impl SyntheticMarket {
    /// Base series plus [`DERIVED_TIMEFRAMES`], ready to replay.
    pub fn into_provider(self) -> ReplayProvider {
        let mut provider = ReplayProvider::new();
        for (_, series) in self.candles {
            for tf in DERIVED_TIMEFRAMES {
                provider.insert_candles(resample(&series, tf));
            }
            provider.insert_candles(series);
        }
        for (_, series) in self.funding {
            provider.insert_funding(series);
        }
        provider
    }

    /// Write every series in the data-directory layout the loader reads.
    pub fn write_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        std::fs::create_dir_all(dir).map_err(|source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut written = Vec::new();
        for (symbol, series) in &self.candles {
            let path = candle_path(dir, symbol, Timeframe::M15);
            write_candles(&path, series)?;
            written.push(path);
            for tf in DERIVED_TIMEFRAMES {
                let path = candle_path(dir, symbol, tf);
                write_candles(&path, &resample(series, tf))?;
                written.push(path);
            }
        }
        for (symbol, series) in &self.funding {
            let path = funding_path(dir, symbol);
            write_funding(&path, series)?;
            written.push(path);
        }
        info!(files = written.len(), dir = %dir.display(), "synthetic data written");
        Ok(written)
    }
}

fn symbol_seed(seed: u64, symbol: &str) -> u64 {
    let digest = blake3::hash(symbol.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    seed ^ u64::from_le_bytes(bytes)
}

/// Standard normal via Box-Muller.
fn normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// 15m bars and the per-bar drift that produced them.
fn random_walk(rng: &mut StdRng, symbol: &str, start: DateTime<Utc>, days: u32) -> (Vec<Candle>, Vec<f64>) {
    const DRIFTS: [f64; 3] = [-0.0006, 0.0, 0.0006];
    let bars = days as usize * 96;
    let step = Timeframe::M15.duration();

    let mut price = rng.gen_range(5.0..500.0_f64);
    let base_volume = rng.gen_range(1_000.0..50_000.0_f64);
    let mut drift = DRIFTS[rng.gen_range(0..DRIFTS.len())];
    let mut vol = 1.0_f64;

    let mut candles = Vec::with_capacity(bars);
    let mut drifts = Vec::with_capacity(bars);
    for i in 0..bars {
        // Regimes last about two days on average.
        if rng.gen_bool(1.0 / 192.0) {
            drift = DRIFTS[rng.gen_range(0..DRIFTS.len())];
        }
        vol = (vol + 0.05 * (1.0 - vol) + 0.1 * normal(rng)).clamp(0.3, 3.0);
        let sigma = 0.003 * vol;

        let open = price;
        let close = (open * (1.0 + drift + sigma * normal(rng))).max(0.01);
        let high = open.max(close) * (1.0 + normal(rng).abs() * sigma * 0.5);
        let low = open.min(close) * (1.0 - (normal(rng).abs() * sigma * 0.5).min(0.5));
        let mut volume = base_volume * (1.0 + normal(rng).abs()) * vol;
        if rng.gen_bool(0.01) {
            volume *= rng.gen_range(3.0..6.0);
        }

        let open_time = start + step * i as i32;
        candles.push(Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M15,
            open_time,
            close_time: open_time + step,
            open,
            high,
            low,
            close,
            volume,
            trade_count: Some((volume / 10.0).round() as u64),
        });
        drifts.push(drift);
        price = close;
    }
    (candles, drifts)
}

fn funding_series(
    rng: &mut StdRng,
    symbol: &str,
    start: DateTime<Utc>,
    days: u32,
    drifts: &[f64],
) -> FundingRateSeries {
    let settlements = days as i64 * 24 / funding_interval().num_hours();
    let bars_per_settlement = (funding_interval().num_minutes() / Timeframe::M15.minutes()) as usize;
    let points = (1..=settlements)
        .map(|k| {
            let idx = (k as usize * bars_per_settlement).min(drifts.len()).saturating_sub(1);
            let lean = drifts.get(idx).copied().unwrap_or(0.0) * 0.5;
            let mut rate = 0.0001 + lean + 0.00005 * normal(rng);
            if rng.gen_bool(0.03) {
                rate = if rng.gen_bool(0.5) { 0.0015 } else { -0.0015 };
            }
            FundingPoint {
                time: start + Duration::hours(k * funding_interval().num_hours()),
                rate,
            }
        })
        .collect();
    FundingRateSeries::new(symbol, points)
}
