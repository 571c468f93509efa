//! Market data source boundary.
//!
//! The screening engine only needs four lookups from the outside world.
//! Live and replay implementations live in [`super::orats`] and
//! [`super::snapshot`].

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use super::types::RawOptionRecord;

/// Data source errors.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Non-success response; `status` is `None` for client-side failures.
    #[error("API error: {message}")]
    Api { status: Option<u16>, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// API error carrying an HTTP status.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether a retry has a chance of succeeding: timeouts, rate limits and
    /// server-side (5xx) failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited => true,
            Self::Api { status, .. } => matches!(status, Some(code) if (500..600).contains(code)),
            Self::InvalidResponse(_) | Self::NotFound(_) | Self::Io(_) | Self::Json(_) => false,
        }
    }
}

/// Provider of option chains, spot prices and earnings dates.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// All listed expirations for a ticker.
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, SourceError>;

    /// Raw option records for one expiration.
    async fn get_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<RawOptionRecord>, SourceError>;

    /// Current underlying price; `None` when the source has no quote.
    async fn get_spot_price(&self, ticker: &str) -> Result<Option<Decimal>, SourceError>;

    /// Next earnings date; `None` when unknown (ETFs, indices).
    async fn get_earnings_date(&self, ticker: &str) -> Result<Option<NaiveDate>, SourceError>;
}
