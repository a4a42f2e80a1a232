//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! All persisted JSON carries a `schema_version`; newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use perplab_core::arbitration::ScanStats;
use perplab_core::domain::TradeRecord;
use perplab_core::engine::{BalancePoint, PerformanceSummary};

use crate::runner::{BacktestResult, SCHEMA_VERSION};
use crate::sweep::SweepResults;

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

pub fn export_trades_json(trades: &[TradeRecord]) -> Result<String> {
    serde_json::to_string_pretty(trades).context("failed to serialize trades to JSON")
}

pub fn export_summary_json(summary: &PerformanceSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize summary to JSON")
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export a trade list as CSV, one row per closed position.
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "position_id",
        "symbol",
        "strategy",
        "family",
        "timeframe",
        "direction",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "close_reason",
        "notional",
        "leverage",
        "pnl",
        "commission",
        "funding",
        "slippage",
        "tp1_hit",
        "bars_held",
        "r_multiple",
    ])?;

    for t in trades {
        let row: [&str; 20] = [
            &t.position_id.to_string(),
            &t.symbol,
            &t.strategy,
            &t.family.to_string(),
            t.timeframe.as_str(),
            &t.direction.to_string(),
            &t.entry_time.to_rfc3339(),
            &format!("{:.6}", t.entry_price),
            &t.exit_time.to_rfc3339(),
            &format!("{:.6}", t.exit_price),
            t.close_reason.as_str(),
            &format!("{:.2}", t.initial_notional),
            &t.leverage.to_string(),
            &format!("{:.4}", t.pnl),
            &format!("{:.4}", t.commission),
            &format!("{:.4}", t.funding),
            &format!("{:.4}", t.slippage),
            if t.tp1_hit { "true" } else { "false" },
            &t.bars_held.to_string(),
            &format!("{:.3}", t.r_multiple),
        ];
        wtr.write_record(row)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the per-tick balance curve.
pub fn export_balance_csv(curve: &[BalancePoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["time", "balance", "drawdown", "open_positions"])?;
    for p in curve {
        wtr.write_record([
            &p.time.to_rfc3339(),
            &format!("{:.2}", p.balance),
            &format!("{:.6}", p.drawdown),
            &p.open_positions.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Creates `{name}_{fingerprint prefix}/` under `output_dir` containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `summary.json`: the performance summary alone
/// - `trades.csv` / `trades.json`: closed trades
/// - `balance.csv`: per-tick balance and drawdown
/// - `report.md`: summary and scan funnel
///
/// The directory name depends only on the run, so re-running the same
/// config over the same data overwrites its own artifacts.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!("{}_{}", sanitize(&result.name), &result.fingerprint[..12.min(result.fingerprint.len())]);
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("manifest.json", export_json(result)?),
        ("summary.json", export_summary_json(&result.report.summary)?),
        ("trades.csv", export_trades_csv(result.trades())?),
        ("trades.json", export_trades_json(result.trades())?),
        ("balance.csv", export_balance_csv(&result.report.balance_curve)?),
        ("report.md", generate_report(result)),
    ];
    for (name, contents) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

// ─── Markdown reports ───────────────────────────────────────────────

/// Markdown report for a single run: metadata, performance and scan funnel.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(4096);

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Name | {} |\n", result.name));
    md.push_str(&format!("| Symbols | {} |\n", result.symbols.join(", ")));
    if let (Some(first), Some(last)) = (result.first_tick, result.last_tick) {
        md.push_str(&format!("| Period | {} to {} |\n", first.to_rfc3339(), last.to_rfc3339()));
    }
    md.push_str(&format!("| Ticks | {} |\n", result.report.ticks));
    md.push_str(&format!("| Config Fingerprint | {} |\n", result.fingerprint));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    md.push('\n');

    let s = &result.report.summary;
    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Initial Balance | ${:.2} |\n", s.initial_balance));
    md.push_str(&format!("| Final Balance | ${:.2} |\n", s.final_balance));
    md.push_str(&format!("| Return | {:.2}% |\n", s.return_pct));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", s.max_drawdown_pct));
    md.push_str(&format!("| Trades | {} ({} W / {} L) |\n", s.trade_count, s.wins, s.losses));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", s.win_rate * 100.0));
    md.push_str(&format!("| Profit Factor | {} |\n", format_profit_factor(s.profit_factor)));
    md.push_str(&format!("| Avg Win / Avg Loss | {:.2} / {:.2} |\n", s.avg_win, s.avg_loss));
    md.push_str(&format!("| TP1 Hit Rate | {:.1}% |\n", s.tp1_hit_rate * 100.0));
    md.push_str(&format!("| Avg R | {:.2} |\n", s.avg_r_multiple));
    md.push_str(&format!("| Max Consecutive Losses | {} |\n", s.max_consecutive_losses));
    md.push_str(&format!("| Funding Paid | {:.2} |\n", s.total_funding));
    md.push_str(&format!("| Commission | {:.2} |\n", s.total_commission));
    md.push('\n');

    if !s.by_close_reason.is_empty() {
        md.push_str("### Close Reasons\n\n");
        md.push_str("| Reason | Count |\n");
        md.push_str("| --- | ---: |\n");
        for (reason, count) in &s.by_close_reason {
            md.push_str(&format!("| {reason} | {count} |\n"));
        }
        md.push('\n');
    }

    md.push_str(&scan_report(&result.report.scan_stats));
    md
}

/// Per-detector funnel: analyzed → detected → accepted, with the reasons
/// detected signals were turned away and the gates that stopped the rest.
pub fn scan_report(stats: &ScanStats) -> String {
    let mut md = String::with_capacity(1024);
    md.push_str("## Scan Funnel\n\n");
    if stats.detectors.is_empty() {
        md.push_str("No scans recorded.\n\n");
        return md;
    }

    md.push_str("| Detector | Analyzed | Detected | Accepted | Hit Rate | Rejections |\n");
    md.push_str("| --- | ---: | ---: | ---: | ---: | --- |\n");
    for (name, f) in &stats.detectors {
        let hit_rate = if f.analyzed > 0 {
            f.detected as f64 / f.analyzed as f64 * 100.0
        } else {
            0.0
        };
        md.push_str(&format!(
            "| {name} | {} | {} | {} | {hit_rate:.2}% | {} |\n",
            f.analyzed,
            f.detected,
            f.accepted,
            format_counts(&f.rejections)
        ));
    }
    md.push('\n');

    md.push_str("### Failed Gates\n\n");
    for (name, f) in &stats.detectors {
        if f.gates.is_empty() {
            continue;
        }
        md.push_str(&format!("- **{name}**: {}\n", format_counts(&f.gates)));
    }
    md.push('\n');
    md
}

/// Markdown table of a sweep, one row per grid point in grid order.
pub fn sweep_report(results: &SweepResults) -> String {
    let mut md = String::with_capacity(1024);
    md.push_str("# Parameter Sweep\n\n");
    md.push_str("| # | Risk/Trade | Trail ATR | Trades | Win Rate | Return | Max DD | Profit Factor |\n");
    md.push_str("| ---: | ---: | ---: | ---: | ---: | ---: | ---: | ---: |\n");
    for e in results.all() {
        let s = &e.result.report.summary;
        md.push_str(&format!(
            "| {} | {:.2}% | {:.2} | {} | {:.1}% | {:.2}% | {:.2}% | {} |\n",
            e.point.index,
            e.point.risk_per_trade * 100.0,
            e.point.trail_atr_multiple,
            s.trade_count,
            s.win_rate * 100.0,
            s.return_pct,
            s.max_drawdown_pct,
            format_profit_factor(s.profit_factor)
        ));
    }
    if let Some(best) = results.best_by_return() {
        md.push_str(&format!(
            "\nBest return: point {} (risk {:.2}%, trail {:.2} ATR)\n",
            best.point.index,
            best.point.risk_per_trade * 100.0,
            best.point.trail_atr_multiple
        ));
    }
    md
}

fn format_profit_factor(pf: f64) -> String {
    if pf.is_infinite() {
        "∞".to_string()
    } else {
        format!("{pf:.2}")
    }
}

/// `a: 3, b: 1`, largest first, ties by name.
fn format_counts(counts: &std::collections::BTreeMap<String, u64>) -> String {
    if counts.is_empty() {
        return "-".to_string();
    }
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
