//! Run summaries, alert selection and file export.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::analytics::{ScreeningCriteria, SpreadCandidate, SpreadStrategy};
use crate::orchestrator::ScreeningReport;

/// Default ROR (percent) above which a spread is worth an alert.
pub const DEFAULT_ALERT_THRESHOLD_ROR: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Headline numbers for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub evaluation_date: NaiveDate,
    pub tickers_screened: usize,
    pub tickers_with_errors: Vec<String>,
    pub tickers_excluded_for_earnings: Vec<String>,
    pub total_spreads: usize,
    pub bull_put_count: usize,
    pub bear_call_count: usize,
    /// Mean ROR in percent; `None` without spreads.
    pub avg_ror: Option<f64>,
    pub best_ror: Option<f64>,
}

impl ReportSummary {
    pub fn from_report(report: &ScreeningReport) -> Self {
        let ranked = report.ranked();
        let count = |strategy: SpreadStrategy| {
            ranked.iter().filter(|c| c.strategy() == strategy).count()
        };

        let avg_ror = if ranked.is_empty() {
            None
        } else {
            Some(ranked.iter().map(|c| c.return_on_risk()).sum::<f64>() / ranked.len() as f64)
        };
        let best_ror = ranked.iter().map(|c| c.return_on_risk()).reduce(f64::max);

        Self {
            evaluation_date: report.evaluation_date,
            tickers_screened: report.outcomes.len(),
            tickers_with_errors: report
                .failures()
                .iter()
                .map(|e| e.ticker().to_string())
                .collect(),
            tickers_excluded_for_earnings: report
                .excluded_for_earnings()
                .into_iter()
                .map(|(ticker, _)| ticker.to_string())
                .collect(),
            total_spreads: ranked.len(),
            bull_put_count: count(SpreadStrategy::BullPut),
            bear_call_count: count(SpreadStrategy::BearCall),
            avg_ror,
            best_ror,
        }
    }
}

/// Ranked spreads with ROR strictly above `threshold_ror`.
pub fn alerts(report: &ScreeningReport, threshold_ror: f64) -> Vec<&SpreadCandidate> {
    report
        .ranked()
        .into_iter()
        .filter(|c| c.return_on_risk() > threshold_ror)
        .collect()
}

/// Flat export row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadRow {
    pub ticker: String,
    pub strategy: SpreadStrategy,
    pub evaluation_date: NaiveDate,
    pub expiration: NaiveDate,
    pub dte: i64,
    pub spot: Decimal,
    pub short_strike: Decimal,
    pub long_strike: Decimal,
    pub width: Decimal,
    pub short_bid: Decimal,
    pub long_ask: Decimal,
    pub net_credit: Decimal,
    pub max_profit: Decimal,
    pub max_loss: Decimal,
    pub max_loss_per_contract: Decimal,
    pub break_even: Decimal,
    pub return_on_risk: f64,
    /// Max loss per unit of credit; empty when the credit is zero.
    pub risk_reward_ratio: Option<f64>,
    pub annualized_return: f64,
    pub probability_of_profit: f64,
    pub short_delta: f64,
    pub distance_pct: f64,
    pub short_iv: Option<f64>,
    pub short_open_interest: i64,
    pub long_open_interest: i64,
    /// Bid-ask spread as a percent of mid, per leg.
    pub short_spread_pct: f64,
    pub long_spread_pct: f64,
}

impl From<&SpreadCandidate> for SpreadRow {
    fn from(c: &SpreadCandidate) -> Self {
        Self {
            ticker: c.ticker().to_string(),
            strategy: c.strategy(),
            evaluation_date: c.evaluation_date(),
            expiration: c.expiration(),
            dte: c.dte(),
            spot: c.spot(),
            short_strike: c.short_strike(),
            long_strike: c.long_strike(),
            width: c.width(),
            short_bid: c.short_leg().bid,
            long_ask: c.long_leg().ask,
            net_credit: c.net_credit(),
            max_profit: c.max_profit(),
            max_loss: c.max_loss(),
            max_loss_per_contract: c.max_loss_per_contract(),
            break_even: c.break_even(),
            return_on_risk: round2(c.return_on_risk()),
            risk_reward_ratio: c.risk_reward_ratio().map(round2),
            annualized_return: round2(c.annualized_return()),
            probability_of_profit: round4(c.probability_of_profit()),
            short_delta: round4(c.short_delta()),
            distance_pct: round2(c.distance_pct()),
            short_iv: c.short_leg().usable_iv().map(round4),
            short_open_interest: c.short_leg().open_interest,
            long_open_interest: c.long_leg().open_interest,
            short_spread_pct: round2(c.short_leg().spread_pct()),
            long_spread_pct: round2(c.long_leg().spread_pct()),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Serialize)]
struct FailureRow {
    ticker: String,
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    criteria: &'a ScreeningCriteria,
    summary: ReportSummary,
    spreads: Vec<SpreadRow>,
    failures: Vec<FailureRow>,
}

/// `<dir>/YYYYmmdd_HHMMSS_spreads.<ext>`
pub fn timestamped_path(dir: &Path, timestamp: NaiveDateTime, extension: &str) -> PathBuf {
    dir.join(format!("{}_spreads.{}", timestamp.format("%Y%m%d_%H%M%S"), extension))
}

/// Write the ranked spreads as CSV, one row per spread.
pub fn write_csv(report: &ScreeningReport, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for candidate in report.ranked() {
        writer.serialize(SpreadRow::from(candidate))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write criteria, summary, spreads and failures as one JSON document.
pub fn write_json(report: &ScreeningReport, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let document = JsonReport {
        generated_at: Utc::now(),
        criteria: &report.criteria,
        summary: ReportSummary::from_report(report),
        spreads: report.ranked().into_iter().map(SpreadRow::from).collect(),
        failures: report
            .failures()
            .into_iter()
            .map(|e| FailureRow {
                ticker: e.ticker().to_string(),
                kind: e.kind(),
                message: e.to_string(),
            })
            .collect(),
    };
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

/// Fixed-width console table of the top `limit` spreads.
pub fn render_table(candidates: &[&SpreadCandidate], limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<9} {:>10} {:>4} {:>8} {:>8} {:>7} {:>7} {:>7} {:>8} {:>6} {:>6}",
        "Ticker",
        "Strategy",
        "Expiry",
        "DTE",
        "Short",
        "Long",
        "Credit",
        "MaxLoss",
        "ROR%",
        "Ann%",
        "POP%",
        "Dist%"
    );
    let _ = writeln!(out, "{}", "-".repeat(98));

    for c in candidates.iter().take(limit) {
        let _ = writeln!(
            out,
            "{:<6} {:<9} {:>10} {:>4} {:>8} {:>8} {:>7} {:>7} {:>7.2} {:>8.1} {:>6.1} {:>6.2}",
            c.ticker(),
            c.strategy().to_string(),
            c.expiration().format("%Y-%m-%d").to_string(),
            c.dte(),
            c.short_strike().to_string(),
            c.long_strike().to_string(),
            c.net_credit().round_dp(2).to_string(),
            c.max_loss().round_dp(2).to_string(),
            c.return_on_risk(),
            c.annualized_return(),
            c.probability_of_profit() * 100.0,
            c.distance_pct(),
        );
    }

    if candidates.len() > limit {
        let _ = writeln!(out, "... and {} more", candidates.len() - limit);
    }
    out
}
