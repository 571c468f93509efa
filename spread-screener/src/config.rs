//! Configuration loader: defaults, then a TOML file, then `.env` and
//! `SCREENER_*` environment variables. Command-line flags are applied on top
//! by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::{CriteriaError, ScreeningCriteria, SpreadStrategy};
use crate::data::orats::DEFAULT_REQUEST_INTERVAL;
use crate::fetch::{ChainCache, DEFAULT_TTL};
use crate::orchestrator::{OrchestratorConfig, OrchestratorError};
use crate::pricing::DEFAULT_RISK_FREE_RATE;
use crate::report::DEFAULT_ALERT_THRESHOLD_ROR;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{var}: {message}")]
    InvalidEnv { var: &'static str, message: String },

    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("report.max_display must be at least 1")]
    ZeroDisplay,
}

/// Liquid names screened when no watchlist is configured.
pub const DEFAULT_WATCHLIST: &[&str] = &[
    "SPY", "QQQ", "IWM", "DIA", "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "AMD",
    "INTC", "MU", "JPM", "BAC",
];

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub ticker_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// 0 disables the chain cache.
    pub cache_ttl_secs: u64,
    pub risk_free_rate: f64,
    /// Minimum spacing between live API requests.
    pub request_interval_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            concurrency: orchestrator.concurrency,
            ticker_timeout_secs: orchestrator.ticker_timeout.as_secs(),
            max_retries: orchestrator.max_retries,
            retry_backoff_ms: orchestrator.retry_backoff.as_millis() as u64,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            request_interval_ms: DEFAULT_REQUEST_INTERVAL.as_millis() as u64,
        }
    }
}

impl FetchSettings {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.concurrency,
            ticker_timeout: Duration::from_secs(self.ticker_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            risk_free_rate: self.risk_free_rate,
        }
    }

    pub fn cache(&self) -> ChainCache {
        if self.cache_ttl_secs == 0 {
            ChainCache::disabled()
        } else {
            ChainCache::new(Duration::from_secs(self.cache_ttl_secs))
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

/// `[report]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub output_dir: PathBuf,
    pub alert_threshold_ror: f64,
    /// Rows shown in the console table.
    pub max_display: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            alert_threshold_ror: DEFAULT_ALERT_THRESHOLD_ROR,
            max_display: 20,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tickers: Vec<String>,
    pub criteria: ScreeningCriteria,
    pub fetch: FetchSettings,
    pub report: ReportSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_WATCHLIST.iter().map(|t| t.to_string()).collect(),
            criteria: ScreeningCriteria::default(),
            fetch: FetchSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` if given, then `.env` and process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `SCREENER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SCREENER_TICKERS") {
            self.tickers = split_list(&raw);
        }

        let c = &mut self.criteria;
        override_with(&lookup, "SCREENER_MIN_DTE", &mut c.min_dte)?;
        override_with(&lookup, "SCREENER_MAX_DTE", &mut c.max_dte)?;
        override_with(&lookup, "SCREENER_MIN_CREDIT", &mut c.min_credit)?;
        override_with(&lookup, "SCREENER_MAX_LOSS", &mut c.max_loss)?;
        override_with(&lookup, "SCREENER_MIN_ROR", &mut c.min_ror)?;
        override_with(&lookup, "SCREENER_MAX_ROR", &mut c.max_ror)?;
        override_with(&lookup, "SCREENER_MIN_OI", &mut c.min_open_interest)?;
        override_with(&lookup, "SCREENER_EARNINGS_BUFFER", &mut c.earnings_buffer_days)?;
        if let Some(raw) = lookup("SCREENER_SPREAD_WIDTHS") {
            c.spread_widths = parse_widths(&raw).map_err(|message| ConfigError::InvalidEnv {
                var: "SCREENER_SPREAD_WIDTHS",
                message,
            })?;
        }
        if let Some(raw) = lookup("SCREENER_STRATEGIES") {
            c.strategies = parse_strategies(&raw).map_err(|message| ConfigError::InvalidEnv {
                var: "SCREENER_STRATEGIES",
                message,
            })?;
        }

        override_with(
            &lookup,
            "SCREENER_ALERT_THRESHOLD",
            &mut self.report.alert_threshold_ror,
        )?;
        override_with(&lookup, "SCREENER_CONCURRENCY", &mut self.fetch.concurrency)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.criteria.validate()?;
        self.fetch.orchestrator_config().validate()?;
        if self.report.max_display == 0 {
            return Err(ConfigError::ZeroDisplay);
        }
        Ok(())
    }

    /// Effective configuration as TOML, for `check-config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn override_with<F, T>(lookup: &F, var: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
            var,
            message: format!("cannot parse {:?}", raw),
        })?;
    }
    Ok(())
}

/// Comma-separated list, trimmed and upper-cased, empties dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Comma-separated strike widths, e.g. `1,2.5,5`.
pub fn parse_widths(raw: &str) -> Result<Vec<Decimal>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Decimal::from_str(s).map_err(|_| format!("invalid width {:?}", s)))
        .collect()
}

/// Comma-separated strategies, e.g. `bull_put,bear-call`. Duplicates collapse.
pub fn parse_strategies(raw: &str) -> Result<Vec<SpreadStrategy>, String> {
    let mut strategies = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let strategy =
            SpreadStrategy::parse(name).ok_or_else(|| format!("unknown strategy {:?}", name))?;
        if !strategies.contains(&strategy) {
            strategies.push(strategy);
        }
    }
    Ok(strategies)
}
