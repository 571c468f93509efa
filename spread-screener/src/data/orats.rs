//! ORATS API client for live option chain data.
//!
//! API Constraints:
//! - Rate limit: 1,000 requests/minute
//! - Data is 15-minute delayed on the standard plan
//!
//! Endpoints used:
//! - `expirations` - listed expirations per ticker
//! - `strikes/monthly` - one row per strike with call and put sides
//! - `summaries` - underlying price
//! - `cores` - next earnings date

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::source::{DataSource, SourceError};
use super::types::{OptionType, RawOptionRecord};

/// ORATS API base URL.
const BASE_URL: &str = "https://api.orats.io/datav2";

/// Default minimum interval between requests (100ms = max 600 req/min, well under limit).
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// API response wrapper - ORATS wraps all responses in {"data": [...]}
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Strike row from the ORATS strikes endpoints.
///
/// Each row carries both the call and the put at one strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStrikeRecord {
    pub ticker: String,
    pub expir_date: String,
    pub strike: f64,
    #[serde(default)]
    pub stock_price: Option<f64>,

    // Call data
    #[serde(default)]
    pub call_volume: Option<i64>,
    #[serde(default)]
    pub call_open_interest: Option<i64>,
    #[serde(default)]
    pub call_bid_price: Option<f64>,
    #[serde(default)]
    pub call_ask_price: Option<f64>,
    #[serde(default)]
    pub call_value: Option<f64>,
    #[serde(default)]
    pub call_mid_iv: Option<f64>,

    // Put data
    #[serde(default)]
    pub put_volume: Option<i64>,
    #[serde(default)]
    pub put_open_interest: Option<i64>,
    #[serde(default)]
    pub put_bid_price: Option<f64>,
    #[serde(default)]
    pub put_ask_price: Option<f64>,
    #[serde(default)]
    pub put_value: Option<f64>,
    #[serde(default)]
    pub put_mid_iv: Option<f64>,

    // Smoothed IV, used when the side has no mid IV
    #[serde(default)]
    pub smv_vol: Option<f64>,
}

impl RawStrikeRecord {
    /// Call side as a generic record.
    pub fn to_call_record(&self) -> RawOptionRecord {
        RawOptionRecord {
            strike: self.strike,
            option_type: OptionType::Call.as_str().to_string(),
            expiration: self.expir_date.clone(),
            bid: self.call_bid_price,
            ask: self.call_ask_price,
            last: self.call_value,
            implied_volatility: self.call_mid_iv.or(self.smv_vol),
            open_interest: self.call_open_interest,
            volume: self.call_volume,
            contract_symbol: None,
        }
    }

    /// Put side as a generic record.
    pub fn to_put_record(&self) -> RawOptionRecord {
        RawOptionRecord {
            strike: self.strike,
            option_type: OptionType::Put.as_str().to_string(),
            expiration: self.expir_date.clone(),
            bid: self.put_bid_price,
            ask: self.put_ask_price,
            last: self.put_value,
            implied_volatility: self.put_mid_iv.or(self.smv_vol),
            open_interest: self.put_open_interest,
            volume: self.put_volume,
            contract_symbol: None,
        }
    }
}

/// Underlying summary row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub ticker: String,
    #[serde(default)]
    pub stock_price: Option<f64>,
}

/// Core data row; only the earnings field is read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreRecord {
    pub ticker: String,
    #[serde(default)]
    pub next_ern: Option<String>,
}

impl CoreRecord {
    /// ORATS reports unknown dates as "0000-00-00"; those parse to `None`.
    pub fn next_earnings(&self) -> Option<NaiveDate> {
        self.next_ern
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }
}

/// ORATS API client.
///
/// Safe to share between tasks; request pacing is serialized internally.
pub struct ORATSClient {
    client: Client,
    token: String,
    min_interval: Duration,
    last_request: Mutex<Instant>,
    request_count: AtomicU64,
}

impl ORATSClient {
    /// Create a client with a custom request interval.
    pub fn with_interval(token: String, min_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            client: Client::new(),
            token,
            min_interval,
            last_request: Mutex::new(now.checked_sub(min_interval).unwrap_or(now)),
            request_count: AtomicU64::new(0),
        }
    }

    /// Read the token from `ORATS_API_KEY`.
    pub fn from_env(min_interval: Duration) -> Result<Self, SourceError> {
        let token = std::env::var("ORATS_API_KEY")
            .map_err(|_| SourceError::Api {
                status: None,
                message: "ORATS_API_KEY environment variable not set".into(),
            })?;
        Ok(Self::with_interval(token, min_interval))
    }

    /// Get request count for monitoring.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Rate-limited request helper.
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        {
            let mut last = self.last_request.lock().await;
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
            *last = Instant::now();
        }

        let url = format!("{}/{}", BASE_URL, endpoint);
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("token", &self.token));

        debug!(endpoint, "ORATS request");
        let response = self.client.get(&url).query(&all_params).send().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(endpoint.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SourceError::api(status.as_u16(), format!("{}: {}", status, text)));
        }

        response.json().await.map_err(|e| {
            SourceError::InvalidResponse(format!("Failed to parse response: {}", e))
        })
    }

    /// Strike rows for one expiration.
    pub async fn get_strikes(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<RawStrikeRecord>, SourceError> {
        let expiry = expiration.format("%Y-%m-%d").to_string();
        let params = vec![("ticker", ticker), ("expiry", expiry.as_str())];
        let response: ApiResponse<Vec<RawStrikeRecord>> =
            self.request("strikes/monthly", &params).await?;
        Ok(response.data)
    }
}

#[async_trait]
impl DataSource for ORATSClient {
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, SourceError> {
        let response: ApiResponse<Vec<String>> =
            self.request("expirations", &[("ticker", ticker)]).await?;

        let mut dates: Vec<NaiveDate> = response
            .data
            .iter()
            .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
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
        let strikes = self.get_strikes(ticker, expiration).await?;
        Ok(strikes
            .iter()
            .flat_map(|row| [row.to_call_record(), row.to_put_record()])
            .collect())
    }

    async fn get_spot_price(&self, ticker: &str) -> Result<Option<Decimal>, SourceError> {
        let response: ApiResponse<Vec<SummaryRecord>> =
            self.request("summaries", &[("ticker", ticker)]).await?;

        Ok(response
            .data
            .first()
            .and_then(|s| s.stock_price)
            .and_then(|p| Decimal::try_from(p).ok()))
    }

    async fn get_earnings_date(&self, ticker: &str) -> Result<Option<NaiveDate>, SourceError> {
        let response: ApiResponse<Vec<CoreRecord>> = self
            .request("cores", &[("ticker", ticker), ("fields", "ticker,nextErn")])
            .await?;
        Ok(response.data.first().and_then(CoreRecord::next_earnings))
    }
}
