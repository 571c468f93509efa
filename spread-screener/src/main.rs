//! Credit spread screener CLI
//!
//! # Usage
//!
//! ```bash
//! # Screen the configured watchlist against live ORATS data
//! spread-screener screen --config config/default.toml
//!
//! # Replay a captured snapshot with tighter thresholds and export results
//! spread-screener screen --snapshot-dir snapshots/today --date 2024-01-12 \
//!     --min-ror 25 --strategies bull_put --csv --json
//!
//! # Show the effective configuration
//! spread-screener check-config --config config/default.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;

use spread_screener::config::{parse_strategies, parse_widths, split_list, AppConfig};
use spread_screener::data::{DataSource, ORATSClient, SnapshotSource};
use spread_screener::orchestrator::{Orchestrator, ScreeningReport};
use spread_screener::report::{self, ReportSummary};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "spread-screener")]
#[command(about = "Screen option chains for credit spread opportunities")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen tickers for bull put and bear call spreads
    Screen(ScreenArgs),

    /// Validate and print the effective configuration
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScreenArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated list of tickers; with --snapshot-dir defaults to every captured ticker
    #[arg(long)]
    tickers: Option<String>,

    /// Minimum return on risk (percent)
    #[arg(long)]
    min_ror: Option<f64>,

    /// Maximum return on risk (percent)
    #[arg(long)]
    max_ror: Option<f64>,

    /// Minimum days to expiration
    #[arg(long)]
    min_dte: Option<i64>,

    /// Maximum days to expiration
    #[arg(long)]
    max_dte: Option<i64>,

    /// Minimum net credit per share
    #[arg(long)]
    min_credit: Option<Decimal>,

    /// Maximum loss per contract
    #[arg(long)]
    max_loss: Option<Decimal>,

    /// Minimum open interest per leg
    #[arg(long)]
    min_oi: Option<i64>,

    /// Comma-separated strike widths, e.g. 1,2,5
    #[arg(long)]
    widths: Option<String>,

    /// Comma-separated strategies: bull_put, bear_call
    #[arg(long)]
    strategies: Option<String>,

    /// Skip tickers with earnings within N days (0 = disabled)
    #[arg(long)]
    earnings_buffer: Option<i64>,

    /// Replay fixtures from this directory instead of calling the API
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Evaluation date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Export results as CSV
    #[arg(long)]
    csv: bool,

    /// Export results as JSON
    #[arg(long)]
    json: bool,

    /// Only log warnings and hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

impl ScreenArgs {
    /// Command-line flags take precedence over file and environment.
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(tickers) = &self.tickers {
            config.tickers = split_list(tickers);
        }

        let c = &mut config.criteria;
        if let Some(v) = self.min_ror {
            c.min_ror = v;
        }
        if let Some(v) = self.max_ror {
            c.max_ror = v;
        }
        if let Some(v) = self.min_dte {
            c.min_dte = v;
        }
        if let Some(v) = self.max_dte {
            c.max_dte = v;
        }
        if let Some(v) = self.min_credit {
            c.min_credit = v;
        }
        if let Some(v) = self.max_loss {
            c.max_loss = v;
        }
        if let Some(v) = self.min_oi {
            c.min_open_interest = v;
        }
        if let Some(v) = self.earnings_buffer {
            c.earnings_buffer_days = v;
        }
        if let Some(widths) = &self.widths {
            c.spread_widths = parse_widths(widths).map_err(anyhow::Error::msg)?;
        }
        if let Some(strategies) = &self.strategies {
            c.strategies = parse_strategies(strategies).map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}

fn init_tracing(quiet: bool) -> Result<()> {
    let directive = if quiet {
        "spread_screener=warn"
    } else {
        "spread_screener=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();
    Ok(())
}

async fn cmd_screen(args: ScreenArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config)?;
    config.validate().context("invalid configuration")?;

    let source: Arc<dyn DataSource> = match &args.snapshot_dir {
        Some(dir) => {
            let snapshot = SnapshotSource::load_dir(dir)
                .with_context(|| format!("loading snapshot from {}", dir.display()))?;
            if args.tickers.is_none() {
                config.tickers = snapshot.tickers();
            }
            Arc::new(snapshot)
        }
        None => Arc::new(
            ORATSClient::from_env(config.fetch.request_interval())
                .context("creating ORATS client")?,
        ),
    };

    let evaluation_date = args.date.unwrap_or_else(|| Utc::now().date_naive());

    let pb = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(config.tickers.len() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let hook_pb = pb.clone();

    let orchestrator = Orchestrator::new(
        source,
        Arc::new(config.fetch.cache()),
        config.fetch.orchestrator_config(),
    )?
    .with_progress(Arc::new(move |ticker: &str, ok: bool| {
        hook_pb.set_message(format!("{} {}", ticker, if ok { "ok" } else { "failed" }));
        hook_pb.inc(1);
    }));

    let report = orchestrator
        .screen(&config.tickers, &config.criteria, evaluation_date)
        .await?;
    pb.finish_and_clear();

    print_report(&report, &config);

    let now = Local::now().naive_local();
    if args.csv {
        let path = report::timestamped_path(&config.report.output_dir, now, "csv");
        report::write_csv(&report, &path).with_context(|| format!("writing {}", path.display()))?;
        println!("CSV written to {}", path.display());
    }
    if args.json {
        let path = report::timestamped_path(&config.report.output_dir, now, "json");
        report::write_json(&report, &path).with_context(|| format!("writing {}", path.display()))?;
        println!("JSON written to {}", path.display());
    }

    Ok(())
}

fn print_report(report: &ScreeningReport, config: &AppConfig) {
    let summary = ReportSummary::from_report(report);
    let ranked = report.ranked();

    println!("{}", SEPARATOR);
    println!("Credit Spread Screener - {}", summary.evaluation_date);
    println!("{}", SEPARATOR);
    println!("  Tickers screened: {}", summary.tickers_screened);
    println!("  Spreads found: {}", summary.total_spreads);
    println!("    Bull put: {}", summary.bull_put_count);
    println!("    Bear call: {}", summary.bear_call_count);
    if let Some(avg) = summary.avg_ror {
        println!("  Average ROR: {:.2}%", avg);
    }
    if let Some(best) = summary.best_ror {
        println!("  Best ROR: {:.2}%", best);
    }
    println!("  Elapsed: {:.2}s", report.elapsed.as_secs_f64());

    if !summary.tickers_excluded_for_earnings.is_empty() {
        println!("\nExcluded for upcoming earnings:");
        for (ticker, date) in report.excluded_for_earnings() {
            println!("  {}: {}", ticker, date);
        }
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!("\nErrors:");
        for error in failures {
            println!("  {}", error);
        }
    }

    if ranked.is_empty() {
        println!("\nNo spreads passed the screening criteria.");
        return;
    }

    println!();
    print!("{}", report::render_table(&ranked, config.report.max_display));

    let threshold = config.report.alert_threshold_ror;
    let alerts = report::alerts(report, threshold);
    if !alerts.is_empty() {
        println!("\n{} spread(s) above {:.1}% ROR:", alerts.len(), threshold);
        for c in alerts.iter().take(5) {
            println!(
                "  {} {} {}/{} exp {} credit {} ROR {:.1}% POP {:.0}%",
                c.ticker(),
                c.strategy(),
                c.short_strike(),
                c.long_strike(),
                c.expiration(),
                c.net_credit().round_dp(2),
                c.return_on_risk(),
                c.probability_of_profit() * 100.0
            );
        }
    }
}

fn cmd_check_config(path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(path.as_deref()).context("loading configuration")?;
    config.validate().context("invalid configuration")?;
    println!("{}", config.to_toml().context("rendering configuration")?);
    println!("# configuration is valid");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Screen(args) => {
            init_tracing(args.quiet)?;
            cmd_screen(args).await?;
        }
        Commands::CheckConfig { config } => {
            init_tracing(false)?;
            cmd_check_config(config)?;
        }
    }

    Ok(())
}
