//! PerpLab CLI — run, synth, and sweep commands.
//!
//! Commands:
//! - `run` — replay a CSV data directory under a TOML config and save artifacts
//! - `synth` — write a seeded synthetic data directory
//! - `sweep` — grid over risk per trade and trailing-stop distance
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use perplab_runner::export::sweep_report;
use perplab_runner::{
    generate, load_for, run_from_dir, run_sweep, save_artifacts, BacktestConfig, BacktestResult, SweepGrid,
    SyntheticConfig,
};

#[derive(Parser)]
#[command(name = "perplab", about = "PerpLab CLI — perpetual futures signal engine and backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a data directory and save the artifact set.
    Run {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory of `<SYMBOL>_<tf>.csv` and `<SYMBOL>_funding.csv` files.
        #[arg(long)]
        data: PathBuf,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Write a seeded synthetic data directory.
    Synth {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,

        /// Symbols, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT,SOLUSDT")]
        symbols: Vec<String>,

        /// Days of 15m data.
        #[arg(long, default_value_t = 30)]
        days: u32,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First candle's open date (YYYY-MM-DD, UTC).
        #[arg(long, default_value = "2024-01-01")]
        start: String,
    },
    /// Run a parameter grid in parallel and print a comparison table.
    Sweep {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data: PathBuf,

        /// Risk-per-trade values, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "0.005,0.01,0.02")]
        risk: Vec<f64>,

        /// Trailing ATR multiples, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "1.5,2.0,3.0")]
        trail: Vec<f64>,

        /// Also write `sweep.md` and `sweep.json` here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data, out } => run_cmd(config.as_deref(), &data, &out),
        Commands::Synth {
            out,
            symbols,
            days,
            seed,
            start,
        } => synth_cmd(&out, symbols, days, seed, &start),
        Commands::Sweep {
            config,
            data,
            risk,
            trail,
            out,
        } => sweep_cmd(config.as_deref(), &data, risk, trail, out.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<BacktestConfig> {
    match path {
        Some(path) => {
            BacktestConfig::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(BacktestConfig::default()),
    }
}

fn run_cmd(config_path: Option<&Path>, data: &Path, out: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let result = run_from_dir(&config, data)?;

    print_summary(&result);

    let run_dir = save_artifacts(&result, out)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn synth_cmd(out: &Path, symbols: Vec<String>, days: u32, seed: u64, start: &str) -> Result<()> {
    if symbols.is_empty() {
        bail!("--symbols needs at least one symbol");
    }
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let date = NaiveDate::parse_from_str(start, "%Y-%m-%d").with_context(|| format!("bad --start '{start}'"))?;
    let Some(start) = date.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t)) else {
        bail!("bad --start '{start}'");
    };

    let config = SyntheticConfig {
        symbols,
        start,
        days,
        seed,
    };
    let files = generate(&config).write_dir(out)?;
    info!(seed, days, "synthetic market generated");
    println!("Wrote {} files to {}", files.len(), out.display());
    Ok(())
}

fn sweep_cmd(
    config_path: Option<&Path>,
    data: &Path,
    risk: Vec<f64>,
    trail: Vec<f64>,
    out: Option<&Path>,
) -> Result<()> {
    let base = load_config(config_path)?;
    let grid = SweepGrid {
        risk_per_trade: risk,
        trail_atr_multiple: trail,
    };
    let loaded = load_for(&base, data)?;
    let results = run_sweep(&grid, &base, &loaded)?;

    let report = sweep_report(&results);
    println!("{report}");

    if let Some(dir) = out {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        std::fs::write(dir.join("sweep.md"), &report)?;
        std::fs::write(dir.join("sweep.json"), serde_json::to_string_pretty(&results)?)?;
        println!("Sweep saved to: {}", dir.display());
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let s = &result.report.summary;
    println!();
    println!("=== {} ===", result.name);
    println!("Symbols:          {}", result.symbols.join(", "));
    println!("Ticks:            {}", result.report.ticks);
    println!("Config:           {}", &result.fingerprint[..12.min(result.fingerprint.len())]);
    println!("Dataset:          {}", &result.dataset_hash[..12.min(result.dataset_hash.len())]);
    println!();
    println!("Trades:           {} ({} W / {} L)", s.trade_count, s.wins, s.losses);
    println!("Win rate:         {:.1}%", s.win_rate * 100.0);
    println!("Return:           {:.2}%", s.return_pct);
    println!("Final balance:    {:.2}", s.final_balance);
    println!("Max drawdown:     {:.2}%", s.max_drawdown_pct);
    if s.profit_factor.is_infinite() {
        println!("Profit factor:    inf");
    } else {
        println!("Profit factor:    {:.2}", s.profit_factor);
    }
    println!("Funding paid:     {:.2}", s.total_funding);
    println!("Commission:       {:.2}", s.total_commission);
    for (reason, count) in &s.by_close_reason {
        println!("  {reason:<16}{count}");
    }
    println!();
}
