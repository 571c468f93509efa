//! Chain fetching with cache lookup.
//!
//! One call assembles everything the builder needs for a ticker: the spot
//! price and the chains for each expiration inside the DTE window. The
//! fetcher never retries; retry policy belongs to the orchestrator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::{ChainCache, ChainKey};
use crate::data::{DataSource, OptionsChain, OptionsSnapshot, SourceError};

/// Why a ticker has no usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The source lists no expirations at all.
    NoListedOptions,
    /// Every chain inside the DTE window came back empty.
    EmptyChain,
    /// No positive spot price.
    MissingSpot,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NoListedOptions => "no listed options",
            Self::EmptyChain => "option chain is empty",
            Self::MissingSpot => "spot price unavailable",
        };
        f.write_str(reason)
    }
}

/// Per-ticker failure. Recorded in the run report; never aborts the run.
#[derive(Error, Debug)]
pub enum TickerError {
    #[error("{ticker}: data unavailable ({reason})")]
    DataUnavailable {
        ticker: String,
        reason: UnavailableReason,
    },

    #[error("{ticker}: data source error: {source}")]
    Source {
        ticker: String,
        #[source]
        source: SourceError,
    },

    #[error("{ticker}: timed out after {after:?}")]
    Timeout { ticker: String, after: Duration },

    #[error("{ticker}: fetch task aborted")]
    Aborted { ticker: String },
}

impl TickerError {
    pub fn ticker(&self) -> &str {
        match self {
            Self::DataUnavailable { ticker, .. }
            | Self::Source { ticker, .. }
            | Self::Timeout { ticker, .. }
            | Self::Aborted { ticker } => ticker,
        }
    }

    /// Only data source failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source { source, .. } if source.is_transient())
    }

    /// Short machine-friendly label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::Source { .. } => "source",
            Self::Timeout { .. } => "timeout",
            Self::Aborted { .. } => "aborted",
        }
    }

    fn source(ticker: &str, source: SourceError) -> Self {
        Self::Source {
            ticker: ticker.to_string(),
            source,
        }
    }

    fn unavailable(ticker: &str, reason: UnavailableReason) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            reason,
        }
    }
}

/// Fetches option chains through the shared cache.
#[derive(Clone)]
pub struct ChainFetcher {
    source: Arc<dyn DataSource>,
    cache: Arc<ChainCache>,
}

impl ChainFetcher {
    pub fn new(source: Arc<dyn DataSource>, cache: Arc<ChainCache>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    /// Snapshot of every chain with DTE in `[min_dte, max_dte]`.
    ///
    /// Listed expirations that all fall outside the window give an empty
    /// snapshot, not an error. A chain that fails to load is skipped; the
    /// ticker fails only when none of its chains load.
    pub async fn fetch(
        &self,
        ticker: &str,
        min_dte: i64,
        max_dte: i64,
        evaluation_date: NaiveDate,
    ) -> Result<Arc<OptionsSnapshot>, TickerError> {
        let key = ChainKey::new(ticker, min_dte, max_dte, evaluation_date);
        if let Some(snapshot) = self.cache.get(&key) {
            debug!(ticker, "chain cache hit");
            return Ok(snapshot);
        }
        debug!(ticker, "chain cache miss");

        let expirations = self
            .source
            .list_expirations(ticker)
            .await
            .map_err(|e| TickerError::source(ticker, e))?;

        if expirations.is_empty() {
            return Err(TickerError::unavailable(ticker, UnavailableReason::NoListedOptions));
        }

        let in_window: Vec<NaiveDate> = expirations
            .into_iter()
            .filter(|exp| {
                let dte = (*exp - evaluation_date).num_days();
                dte >= min_dte && dte <= max_dte
            })
            .collect();

        let spot = self
            .source
            .get_spot_price(ticker)
            .await
            .map_err(|e| TickerError::source(ticker, e))?
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| TickerError::unavailable(ticker, UnavailableReason::MissingSpot))?;

        let fetched_at = Utc::now();
        let mut snapshot = OptionsSnapshot::new(ticker, spot, fetched_at);

        let mut last_error = None;
        for expiration in &in_window {
            let records = match self.source.get_chain(ticker, *expiration).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(ticker, %expiration, error = %e, "skipping expiration");
                    last_error = Some(e);
                    continue;
                }
            };

            let mut chain = OptionsChain::new(ticker, *expiration, spot, fetched_at);
            let mut rejected = 0usize;
            for quote in records.iter().filter_map(|r| r.to_quote()) {
                if !chain.add_quote(quote) {
                    rejected += 1;
                }
            }
            if rejected > 0 {
                debug!(ticker, %expiration, rejected, "dropped quotes for a different expiration");
            }
            snapshot.chains.push(chain);
        }

        // Only a ticker whose every chain failed is a source error
        if snapshot.chains.is_empty() {
            if let Some(e) = last_error {
                return Err(TickerError::source(ticker, e));
            }
        }

        if !in_window.is_empty() && snapshot.total_quotes() == 0 {
            return Err(TickerError::unavailable(ticker, UnavailableReason::EmptyChain));
        }

        snapshot.chains.sort_by_key(|c| c.expiration);
        let snapshot = Arc::new(snapshot);
        self.cache.put(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Next earnings date. Lookup failures are logged and treated as unknown.
    pub async fn earnings_date(&self, ticker: &str) -> Option<NaiveDate> {
        match self.source.get_earnings_date(ticker).await {
            Ok(date) => date,
            Err(e) => {
                warn!(ticker, error = %e, "earnings lookup failed; treating as unknown");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawOptionRecord, SnapshotSource, TickerFixture};
    use rust_decimal_macros::dec;

    fn eval_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 12).unwrap()
    }

    fn record(strike: f64, option_type: &str, expiration: &str) -> RawOptionRecord {
        RawOptionRecord {
            strike,
            option_type: option_type.to_string(),
            expiration: expiration.to_string(),
            bid: Some(1.0),
            ask: Some(1.1),
            last: None,
            implied_volatility: Some(0.25),
            open_interest: Some(100),
            volume: Some(10),
            contract_symbol: None,
        }
    }

    fn fetcher_for(fixtures: Vec<TickerFixture>) -> ChainFetcher {
        ChainFetcher::new(
            Arc::new(SnapshotSource::from_fixtures(fixtures)),
            Arc::new(ChainCache::default()),
        )
    }

    #[tokio::test]
    async fn test_fetch_keeps_only_window_expirations() {
        let mut fixture = TickerFixture::new("SPY", Some(dec!(480)));
        fixture.quotes = vec![
            // 7 DTE, outside
            record(470.0, "P", "2024-01-19"),
            // 35 DTE, inside
            record(470.0, "P", "2024-02-16"),
            record(465.0, "P", "2024-02-16"),
            // 63 DTE, outside
            record(470.0, "P", "2024-03-15"),
        ];
        let fetcher = fetcher_for(vec![fixture]);

        let snapshot = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap();
        assert_eq!(snapshot.chains.len(), 1);
        assert_eq!(snapshot.chains[0].puts.len(), 2);
        assert_eq!(snapshot.spot, dec!(480));
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let mut fixture = TickerFixture::new("SPY", Some(dec!(480)));
        fixture.quotes = vec![record(470.0, "P", "2024-02-16")];
        let fetcher = fetcher_for(vec![fixture]);

        let first = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap();
        let second = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_spot_is_data_unavailable() {
        let mut fixture = TickerFixture::new("XYZ", None);
        fixture.quotes = vec![record(50.0, "C", "2024-02-16")];
        let fetcher = fetcher_for(vec![fixture]);

        let err = fetcher.fetch("XYZ", 30, 45, eval_date()).await.unwrap_err();
        assert!(matches!(
            err,
            TickerError::DataUnavailable {
                reason: UnavailableReason::MissingSpot,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_listed_options() {
        let fetcher = fetcher_for(vec![TickerFixture::new("XYZ", Some(dec!(50)))]);
        let err = fetcher.fetch("XYZ", 30, 45, eval_date()).await.unwrap_err();
        assert!(matches!(
            err,
            TickerError::DataUnavailable {
                reason: UnavailableReason::NoListedOptions,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unparseable_chain_is_empty() {
        let mut fixture = TickerFixture::new("XYZ", Some(dec!(50)));
        fixture.quotes = vec![record(50.0, "??", "2024-02-16")];
        let fetcher = fetcher_for(vec![fixture]);

        let err = fetcher.fetch("XYZ", 30, 45, eval_date()).await.unwrap_err();
        assert!(matches!(
            err,
            TickerError::DataUnavailable {
                reason: UnavailableReason::EmptyChain,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_nothing_in_window_is_not_an_error() {
        let mut fixture = TickerFixture::new("SPY", Some(dec!(480)));
        fixture.quotes = vec![record(470.0, "P", "2024-01-19")];
        let fetcher = fetcher_for(vec![fixture]);

        let snapshot = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap();
        assert!(snapshot.chains.is_empty());
    }

    /// Replay source whose chain lookups fail for chosen expirations.
    struct BrokenChains {
        replay: SnapshotSource,
        broken: Vec<NaiveDate>,
    }

    #[async_trait::async_trait]
    impl DataSource for BrokenChains {
        async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, SourceError> {
            self.replay.list_expirations(ticker).await
        }

        async fn get_chain(
            &self,
            ticker: &str,
            expiration: NaiveDate,
        ) -> Result<Vec<crate::data::RawOptionRecord>, SourceError> {
            if self.broken.contains(&expiration) {
                return Err(SourceError::api(502, "502 Bad Gateway"));
            }
            self.replay.get_chain(ticker, expiration).await
        }

        async fn get_spot_price(&self, ticker: &str) -> Result<Option<Decimal>, SourceError> {
            self.replay.get_spot_price(ticker).await
        }

        async fn get_earnings_date(
            &self,
            ticker: &str,
        ) -> Result<Option<NaiveDate>, SourceError> {
            self.replay.get_earnings_date(ticker).await
        }
    }

    fn two_expiration_fixture() -> TickerFixture {
        let mut fixture = TickerFixture::new("SPY", Some(dec!(480)));
        fixture.quotes = vec![
            // 35 and 42 DTE, both inside
            record(470.0, "P", "2024-02-16"),
            record(470.0, "P", "2024-02-23"),
        ];
        fixture
    }

    #[tokio::test]
    async fn test_failed_chain_is_skipped() {
        let broken = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();
        let fetcher = ChainFetcher::new(
            Arc::new(BrokenChains {
                replay: SnapshotSource::from_fixtures(vec![two_expiration_fixture()]),
                broken: vec![broken],
            }),
            Arc::new(ChainCache::default()),
        );

        let snapshot = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap();
        assert_eq!(snapshot.chains.len(), 1);
        assert_eq!(
            snapshot.chains[0].expiration,
            NaiveDate::from_ymd_opt(2024, 2, 23).unwrap()
        );
    }

    #[tokio::test]
    async fn test_every_chain_failing_is_a_source_error() {
        let fetcher = ChainFetcher::new(
            Arc::new(BrokenChains {
                replay: SnapshotSource::from_fixtures(vec![two_expiration_fixture()]),
                broken: vec![
                    NaiveDate::from_ymd_opt(2024, 2, 16).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 2, 23).unwrap(),
                ],
            }),
            Arc::new(ChainCache::default()),
        );

        let err = fetcher.fetch("SPY", 30, 45, eval_date()).await.unwrap_err();
        assert_eq!(err.kind(), "source");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_source_error_is_typed() {
        let fetcher = fetcher_for(vec![]);
        let err = fetcher.fetch("NOPE", 30, 45, eval_date()).await.unwrap_err();
        assert_eq!(err.ticker(), "NOPE");
        assert_eq!(err.kind(), "source");
        assert!(!err.is_retryable());
    }
}
