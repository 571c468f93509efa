//! Offline replay of captured option chains.
//!
//! A snapshot directory holds one `<TICKER>.json` file per underlying,
//! written by the `capture-snapshot` binary. Replaying a directory gives
//! reproducible screening runs without network access.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::source::{DataSource, SourceError};
use super::types::RawOptionRecord;

/// Captured market data for one underlying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerFixture {
    pub ticker: String,
    #[serde(default)]
    pub spot: Option<Decimal>,
    #[serde(default)]
    pub earnings_date: Option<NaiveDate>,
    #[serde(default)]
    pub quotes: Vec<RawOptionRecord>,
}

impl TickerFixture {
    pub fn new(ticker: &str, spot: Option<Decimal>) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            spot,
            earnings_date: None,
            quotes: Vec::new(),
        }
    }

    /// Write this fixture as `<dir>/<TICKER>.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, SourceError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.ticker));
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

/// In-memory data source backed by captured fixtures.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSource {
    fixtures: HashMap<String, TickerFixture>,
}

impl SnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from fixtures already in memory.
    pub fn from_fixtures(fixtures: impl IntoIterator<Item = TickerFixture>) -> Self {
        let mut source = Self::new();
        for fixture in fixtures {
            source.insert(fixture);
        }
        source
    }

    pub fn insert(&mut self, fixture: TickerFixture) {
        self.fixtures.insert(fixture.ticker.to_uppercase(), fixture);
    }

    /// Load every `*.json` fixture in a directory.
    pub fn load_dir(dir: &Path) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let mut source = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|x| x == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)?;
                let fixture: TickerFixture = serde_json::from_str(&content)?;
                debug!(ticker = %fixture.ticker, quotes = fixture.quotes.len(), "loaded fixture");
                source.insert(fixture);
            }
        }
        Ok(source)
    }

    /// Tickers available for replay, sorted.
    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<_> = self.fixtures.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    fn fixture(&self, ticker: &str) -> Result<&TickerFixture, SourceError> {
        self.fixtures
            .get(&ticker.to_uppercase())
            .ok_or_else(|| SourceError::NotFound(ticker.to_string()))
    }
}

#[async_trait]
impl DataSource for SnapshotSource {
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, SourceError> {
        let fixture = self.fixture(ticker)?;
        let mut dates: Vec<NaiveDate> = fixture
            .quotes
            .iter()
            .filter_map(|q| NaiveDate::parse_from_str(&q.expiration, "%Y-%m-%d").ok())
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn get_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<RawOptionRecord>, SourceError> {
        let fixture = self.fixture(ticker)?;
        Ok(fixture
            .quotes
            .iter()
            .filter(|q| {
                NaiveDate::parse_from_str(&q.expiration, "%Y-%m-%d").ok() == Some(expiration)
            })
            .cloned()
            .collect())
    }

    async fn get_spot_price(&self, ticker: &str) -> Result<Option<Decimal>, SourceError> {
        Ok(self.fixture(ticker)?.spot)
    }

    async fn get_earnings_date(&self, ticker: &str) -> Result<Option<NaiveDate>, SourceError> {
        Ok(self.fixture(ticker)?.earnings_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    fn fixture() -> TickerFixture {
        let mut fixture = TickerFixture::new("qqq", Some(dec!(400)));
        fixture.quotes = vec![
            record(380.0, "P", "2024-02-16"),
            record(420.0, "C", "2024-02-16"),
            record(380.0, "P", "2024-03-15"),
        ];
        fixture
    }

    #[tokio::test]
    async fn test_replay_lookups() {
        let source = SnapshotSource::from_fixtures([fixture()]);

        let expirations = source.list_expirations("QQQ").await.unwrap();
        assert_eq!(
            expirations,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 16).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            ]
        );

        let chain = source.get_chain("qqq", expirations[0]).await.unwrap();
        assert_eq!(chain.len(), 2);

        assert_eq!(source.get_spot_price("QQQ").await.unwrap(), Some(dec!(400)));
        assert_eq!(source.get_earnings_date("QQQ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_not_found() {
        let source = SnapshotSource::new();
        let err = source.get_spot_price("NOPE").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_and_load_dir() {
        let dir = std::env::temp_dir().join(format!("spread-screener-snap-{}", std::process::id()));
        let path = fixture().save(&dir).unwrap();
        assert!(path.ends_with("QQQ.json"));

        let source = SnapshotSource::load_dir(&dir).unwrap();
        assert_eq!(source.tickers(), vec!["QQQ".to_string()]);
        assert_eq!(source.list_expirations("QQQ").await.unwrap().len(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
