//! Multi-ticker screening run.
//!
//! Fetching fans out across tickers as tokio tasks bounded by a semaphore,
//! each with its own timeout and retry budget. Once every fetch has finished
//! or timed out, spread building and screening run per ticker on rayon inside
//! a blocking task. A failure for one ticker is recorded in its slot of the
//! report and never touches another ticker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::analytics::{
    rank_order, CriteriaError, EarningsGate, ScreeningCriteria, ScreeningPipeline, ScreeningStats,
    SpreadBuilder, SpreadCandidate,
};
use crate::data::{DataSource, OptionsSnapshot};
use crate::fetch::{ChainCache, ChainFetcher, TickerError};
use crate::pricing::DEFAULT_RISK_FREE_RATE;

/// Orchestrator configuration errors, all raised before any fetch.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("ticker timeout must be positive")]
    ZeroTimeout,

    #[error("risk-free rate must be finite, got {0}")]
    InvalidRate(f64),

    #[error("invalid screening criteria: {0}")]
    Criteria(#[from] CriteriaError),

    #[error("screening worker failed: {0}")]
    Worker(String),
}

/// Run-level knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    /// Maximum tickers fetched at once.
    pub concurrency: usize,
    /// Budget per ticker, covering the earnings lookup, fetch and retries.
    pub ticker_timeout: Duration,
    /// Retries after a transient data source error.
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub retry_backoff: Duration,
    /// Rate used for delta.
    pub risk_free_rate: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            ticker_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.concurrency == 0 {
            return Err(OrchestratorError::ZeroConcurrency);
        }
        if self.ticker_timeout.is_zero() {
            return Err(OrchestratorError::ZeroTimeout);
        }
        if !self.risk_free_rate.is_finite() {
            return Err(OrchestratorError::InvalidRate(self.risk_free_rate));
        }
        Ok(())
    }
}

/// Successful screen of one ticker.
#[derive(Debug, Clone, Default)]
pub struct TickerScreen {
    /// Ranked candidates that passed every stage.
    pub candidates: Vec<SpreadCandidate>,
    /// Set when the earnings gate skipped the ticker.
    pub excluded_for_earnings: Option<NaiveDate>,
    /// Expirations inside the DTE window.
    pub expirations_scanned: usize,
    /// Underlying price, when a chain was fetched.
    pub spot: Option<Decimal>,
    pub stats: ScreeningStats,
}

pub type TickerOutcome = Result<TickerScreen, TickerError>;

/// Aggregated result of one run.
#[derive(Debug)]
pub struct ScreeningReport {
    pub evaluation_date: NaiveDate,
    pub criteria: ScreeningCriteria,
    /// One entry per requested ticker.
    pub outcomes: BTreeMap<String, TickerOutcome>,
    pub elapsed: Duration,
}

impl ScreeningReport {
    /// Every passing candidate across tickers, best first.
    pub fn ranked(&self) -> Vec<&SpreadCandidate> {
        let mut all: Vec<&SpreadCandidate> = self
            .outcomes
            .values()
            .filter_map(|o| o.as_ref().ok())
            .flat_map(|s| s.candidates.iter())
            .collect();
        all.sort_by(|a, b| rank_order(a, b));
        all
    }

    pub fn failures(&self) -> Vec<&TickerError> {
        self.outcomes.values().filter_map(|o| o.as_ref().err()).collect()
    }

    /// Tickers skipped by the earnings gate with their earnings dates.
    pub fn excluded_for_earnings(&self) -> Vec<(&str, NaiveDate)> {
        self.outcomes
            .iter()
            .filter_map(|(ticker, o)| {
                o.as_ref()
                    .ok()
                    .and_then(|s| s.excluded_for_earnings)
                    .map(|date| (ticker.as_str(), date))
            })
            .collect()
    }

    pub fn total_candidates(&self) -> usize {
        self.outcomes
            .values()
            .filter_map(|o| o.as_ref().ok())
            .map(|s| s.candidates.len())
            .sum()
    }

    /// Pipeline counts summed over tickers.
    pub fn stats(&self) -> ScreeningStats {
        let mut total = ScreeningStats::default();
        for screen in self.outcomes.values().filter_map(|o| o.as_ref().ok()) {
            total.merge(&screen.stats);
        }
        total
    }
}

/// Called once per ticker as its fetch finishes; `true` on success.
pub type ProgressHook = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// What the fetch stage produced for one ticker.
enum Fetched {
    Snapshot(Arc<OptionsSnapshot>),
    ExcludedForEarnings(NaiveDate),
}

/// Drives a screening run over many tickers.
pub struct Orchestrator {
    fetcher: ChainFetcher,
    config: OrchestratorConfig,
    progress: Option<ProgressHook>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn DataSource>,
        cache: Arc<ChainCache>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            fetcher: ChainFetcher::new(source, cache),
            config,
            progress: None,
        })
    }

    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Screen every ticker and aggregate the results.
    ///
    /// Only invalid criteria fail the run; everything else is recorded per
    /// ticker in the report.
    pub async fn screen(
        &self,
        tickers: &[String],
        criteria: &ScreeningCriteria,
        evaluation_date: NaiveDate,
    ) -> Result<ScreeningReport, OrchestratorError> {
        criteria.validate()?;
        let started = Instant::now();

        let cache = self.fetcher.cache();
        if cache.is_enabled() {
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, ttl_secs = cache.ttl().as_secs(), "purged expired chains");
            }
        }

        let tickers = normalize_tickers(tickers);
        info!(
            tickers = tickers.len(),
            concurrency = self.config.concurrency,
            %evaluation_date,
            "starting screening run"
        );

        let fetched = self.fetch_all(&tickers, criteria, evaluation_date).await;

        let criteria_owned = criteria.clone();
        let rate = self.config.risk_free_rate;
        let outcomes = tokio::task::spawn_blocking(move || {
            fetched
                .into_par_iter()
                .map(|(ticker, result)| {
                    let outcome = result
                        .map(|f| screen_ticker(&ticker, f, &criteria_owned, rate, evaluation_date));
                    (ticker, outcome)
                })
                .collect::<BTreeMap<String, TickerOutcome>>()
        })
        .await
        .map_err(|e| OrchestratorError::Worker(e.to_string()))?;

        let report = ScreeningReport {
            evaluation_date,
            criteria: criteria.clone(),
            outcomes,
            elapsed: started.elapsed(),
        };

        let cache_stats = cache.stats();
        info!(
            candidates = report.total_candidates(),
            failures = report.failures().len(),
            excluded = report.excluded_for_earnings().len(),
            cache_hits = cache_stats.hits,
            cache_misses = cache_stats.misses,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "screening run complete"
        );
        Ok(report)
    }

    /// Fetch stage: one task per ticker, bounded by the semaphore.
    async fn fetch_all(
        &self,
        tickers: &[String],
        criteria: &ScreeningCriteria,
        evaluation_date: NaiveDate,
    ) -> BTreeMap<String, Result<Fetched, TickerError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let criteria = Arc::new(criteria.clone());
        let mut tasks = JoinSet::new();

        for ticker in tickers {
            let ticker = ticker.clone();
            let fetcher = self.fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            let criteria = Arc::clone(&criteria);
            let config = self.config;

            tasks.spawn(async move {
                // The semaphore is never closed; without a permit the task simply runs
                let _permit = semaphore.acquire_owned().await.ok();
                let result = tokio::time::timeout(
                    config.ticker_timeout,
                    fetch_ticker(&fetcher, &ticker, &criteria, evaluation_date, &config),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(TickerError::Timeout {
                        ticker: ticker.clone(),
                        after: config.ticker_timeout,
                    })
                });
                (ticker, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ticker, result)) => {
                    if let Err(e) = &result {
                        warn!(ticker = %ticker, error = %e, "ticker failed");
                    }
                    if let Some(hook) = &self.progress {
                        hook(&ticker, result.is_ok());
                    }
                    results.insert(ticker, result);
                }
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }

        // A panicked task leaves its ticker without a slot
        for ticker in tickers {
            if !results.contains_key(ticker) {
                if let Some(hook) = &self.progress {
                    hook(ticker, false);
                }
                results.insert(
                    ticker.clone(),
                    Err(TickerError::Aborted {
                        ticker: ticker.clone(),
                    }),
                );
            }
        }

        results
    }
}

/// Earnings gate, then fetch with retry.
async fn fetch_ticker(
    fetcher: &ChainFetcher,
    ticker: &str,
    criteria: &ScreeningCriteria,
    evaluation_date: NaiveDate,
    config: &OrchestratorConfig,
) -> Result<Fetched, TickerError> {
    if criteria.earnings_buffer_days > 0 {
        let earnings = fetcher.earnings_date(ticker).await;
        if let EarningsGate::Excluded {
            earnings_date,
            days_until,
        } = ScreeningPipeline::new(criteria).earnings_gate(evaluation_date, earnings)
        {
            info!(ticker, %earnings_date, days_until, "excluded for upcoming earnings");
            return Ok(Fetched::ExcludedForEarnings(earnings_date));
        }
    }

    let mut backoff = config.retry_backoff;
    let mut attempt = 0;
    loop {
        match fetcher
            .fetch(ticker, criteria.min_dte, criteria.max_dte, evaluation_date)
            .await
        {
            Ok(snapshot) => return Ok(Fetched::Snapshot(snapshot)),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                warn!(ticker, attempt, error = %e, "retrying after {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Build and screen every chain of one ticker.
fn screen_ticker(
    ticker: &str,
    fetched: Fetched,
    criteria: &ScreeningCriteria,
    risk_free_rate: f64,
    evaluation_date: NaiveDate,
) -> TickerScreen {
    let snapshot = match fetched {
        Fetched::ExcludedForEarnings(date) => {
            return TickerScreen {
                excluded_for_earnings: Some(date),
                ..Default::default()
            }
        }
        Fetched::Snapshot(snapshot) => snapshot,
    };

    let builder = SpreadBuilder::new(ticker, risk_free_rate, evaluation_date);
    let widths = criteria.widths();
    let built: Vec<SpreadCandidate> = snapshot
        .chains
        .iter()
        .flat_map(|chain| builder.build_all(chain, &widths, &criteria.strategies))
        .collect();

    let (candidates, stats) = ScreeningPipeline::new(criteria).run_with_stats(built);
    debug!(ticker, built = stats.input, passed = stats.passed, "ticker screened");

    TickerScreen {
        candidates,
        excluded_for_earnings: None,
        expirations_scanned: snapshot.chains.len(),
        spot: Some(snapshot.spot),
        stats,
    }
}

/// Trim, upper-case and de-duplicate, preserving first-seen order.
pub fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawOptionRecord, SnapshotSource, TickerFixture};
    use rust_decimal_macros::dec;

    fn eval_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 12).unwrap()
    }

    fn put(strike: f64, bid: f64, ask: f64) -> RawOptionRecord {
        RawOptionRecord {
            strike,
            option_type: "P".to_string(),
            expiration: "2024-02-16".to_string(),
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            implied_volatility: Some(0.30),
            open_interest: Some(500),
            volume: Some(20),
            contract_symbol: None,
        }
    }

    fn fixture(ticker: &str) -> TickerFixture {
        let mut fixture = TickerFixture::new(ticker, Some(dec!(106)));
        fixture.quotes = vec![put(100.0, 1.20, 1.30), put(95.0, 0.20, 0.30)];
        fixture
    }

    fn orchestrator(fixtures: Vec<TickerFixture>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(SnapshotSource::from_fixtures(fixtures)),
            Arc::new(ChainCache::default()),
            OrchestratorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_tickers() {
        let input: Vec<String> = [" spy", "QQQ", "Spy ", "", "iwm"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(normalize_tickers(&input), vec!["SPY", "QQQ", "IWM"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let zero = OrchestratorConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(OrchestratorError::ZeroConcurrency)));

        let no_time = OrchestratorConfig {
            ticker_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(no_time.validate(), Err(OrchestratorError::ZeroTimeout)));
    }

    #[tokio::test]
    async fn test_screen_single_ticker() {
        let orchestrator = orchestrator(vec![fixture("XYZ")]);
        let report = orchestrator
            .screen(&["xyz".to_string()], &ScreeningCriteria::default(), eval_date())
            .await
            .unwrap();

        let screen = report.outcomes["XYZ"].as_ref().unwrap();
        assert_eq!(screen.expirations_scanned, 1);
        assert_eq!(screen.candidates.len(), 1);
        assert_eq!(screen.spot, Some(dec!(106)));
        assert_eq!(screen.candidates[0].net_credit(), dec!(0.90));
        assert_eq!(report.ranked().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_criteria_fail_before_fetching() {
        let orchestrator = orchestrator(vec![fixture("XYZ")]);
        let criteria = ScreeningCriteria {
            spread_widths: vec![],
            ..Default::default()
        };
        let err = orchestrator
            .screen(&["XYZ".to_string()], &criteria, eval_date())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Criteria(CriteriaError::NoWidths)));
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_isolated() {
        let orchestrator = orchestrator(vec![fixture("XYZ")]);
        let tickers = vec!["XYZ".to_string(), "NOPE".to_string()];
        let report = orchestrator
            .screen(&tickers, &ScreeningCriteria::default(), eval_date())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes["XYZ"].is_ok());
        assert!(matches!(
            report.outcomes["NOPE"],
            Err(TickerError::Source { .. })
        ));
        assert_eq!(report.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_chains_are_purged_at_run_start() {
        let cache = Arc::new(ChainCache::new(Duration::from_millis(20)));
        let orchestrator = Orchestrator::new(
            Arc::new(SnapshotSource::from_fixtures([fixture("XYZ"), fixture("ABC")])),
            Arc::clone(&cache),
            OrchestratorConfig::default(),
        )
        .unwrap();
        let criteria = ScreeningCriteria::default();

        orchestrator
            .screen(&["XYZ".to_string()], &criteria, eval_date())
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;

        // XYZ is never read again, so only the purge can drop it
        orchestrator
            .screen(&["ABC".to_string()], &criteria, eval_date())
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().misses, 2);
    }
}
