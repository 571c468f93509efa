//! Option chain snapshot capture
//!
//! Pulls live chains from the ORATS API and writes one JSON fixture per
//! ticker, replayable with `spread-screener screen --snapshot-dir`.
//!
//! # Usage
//!
//! ```bash
//! export ORATS_API_KEY=your-token
//!
//! # Capture the 30-45 DTE window for a few tickers
//! capture-snapshot --tickers SPY,QQQ,IWM --out snapshots/today
//!
//! # Wider window
//! capture-snapshot --tickers AAPL --min-dte 14 --max-dte 60
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use spread_screener::config::split_list;
use spread_screener::data::orats::DEFAULT_REQUEST_INTERVAL;
use spread_screener::data::{DataSource, ORATSClient, SourceError, TickerFixture};

const SEPARATOR: &str = "============================================================";
const MAX_ATTEMPTS: u32 = 3;

/// Capture live option chains for offline screening.
#[derive(Parser)]
#[command(name = "capture-snapshot")]
#[command(about = "Capture live option chains into replayable JSON fixtures")]
struct Cli {
    /// Comma-separated list of tickers
    #[arg(long, default_value = "SPY,QQQ,IWM")]
    tickers: String,

    /// Output directory
    #[arg(long, default_value = "snapshots")]
    out: PathBuf,

    /// Minimum days to expiration to capture
    #[arg(long, default_value_t = 30)]
    min_dte: i64,

    /// Maximum days to expiration to capture
    #[arg(long, default_value_t = 45)]
    max_dte: i64,

    /// Minimum milliseconds between API requests
    #[arg(long)]
    request_interval_ms: Option<u64>,
}

/// Run `op` up to `MAX_ATTEMPTS` times, sleeping 1s, 2s between attempts.
async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < MAX_ATTEMPTS && e.is_transient() => {
                warn!("{}: attempt {} failed ({}), retrying", label, attempt + 1, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn capture_ticker(
    client: &ORATSClient,
    ticker: &str,
    today: NaiveDate,
    min_dte: i64,
    max_dte: i64,
) -> Result<TickerFixture, SourceError> {
    let spot = with_retry(ticker, || client.get_spot_price(ticker)).await?;
    let mut fixture = TickerFixture::new(ticker, spot);

    fixture.earnings_date = match with_retry(ticker, || client.get_earnings_date(ticker)).await {
        Ok(date) => date,
        Err(e) => {
            warn!("{}: earnings lookup failed ({}), leaving unknown", ticker, e);
            None
        }
    };

    let expirations = with_retry(ticker, || client.list_expirations(ticker)).await?;
    for expiration in expirations.into_iter().filter(|exp| {
        let dte = (*exp - today).num_days();
        dte >= min_dte && dte <= max_dte
    }) {
        let records = with_retry(ticker, || client.get_chain(ticker, expiration)).await?;
        fixture.quotes.extend(records);
    }

    Ok(fixture)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spread_screener=info".parse()?),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    anyhow::ensure!(
        cli.min_dte <= cli.max_dte,
        "--min-dte ({}) must not exceed --max-dte ({})",
        cli.min_dte,
        cli.max_dte
    );

    let interval = cli
        .request_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REQUEST_INTERVAL);
    let client = ORATSClient::from_env(interval).context("creating ORATS client")?;

    let tickers = split_list(&cli.tickers);
    let today = Utc::now().date_naive();
    let start_time = Instant::now();

    println!("{}", SEPARATOR);
    println!("Snapshot capture");
    println!("  Tickers: {:?}", tickers);
    println!("  DTE window: {}-{}", cli.min_dte, cli.max_dte);
    println!("  Output: {}", cli.out.display());
    println!("{}", SEPARATOR);

    let pb = ProgressBar::new(tickers.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut written = 0usize;
    let mut errors: Vec<(String, String)> = Vec::new();

    for ticker in &tickers {
        pb.set_message(ticker.clone());
        match capture_ticker(&client, ticker, today, cli.min_dte, cli.max_dte).await {
            Ok(fixture) => {
                let quotes = fixture.quotes.len();
                let path = fixture
                    .save(&cli.out)
                    .with_context(|| format!("writing fixture for {}", ticker))?;
                pb.println(format!("  {}: {} quotes -> {}", ticker, quotes, path.display()));
                written += 1;
            }
            Err(e) => {
                pb.println(format!("  {}: ERROR - {}", ticker, e));
                errors.push((ticker.clone(), e.to_string()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!("\nCapture Complete!");
    println!("  Fixtures written: {}", written);
    println!("  API requests: {}", client.request_count());
    println!("  Elapsed time: {:.1} seconds", start_time.elapsed().as_secs_f64());
    println!("  Errors: {}", errors.len());
    for (ticker, error) in &errors {
        println!("    {}: {}", ticker, error);
    }

    Ok(())
}
