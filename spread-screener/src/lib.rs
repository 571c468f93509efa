//! Credit spread screener.
//!
//! Enumerates bull put and bear call vertical spreads across strike widths,
//! scores them by return on risk and delta-implied probability of profit,
//! then filters and ranks them against configurable thresholds. Option
//! chains for many tickers are fetched concurrently through a shared TTL
//! cache.

pub mod analytics;
pub mod config;
pub mod data;
pub mod fetch;
pub mod orchestrator;
pub mod pricing;
pub mod report;

// Re-export commonly used types
pub use analytics::{
    CriteriaError, ScreeningCriteria, ScreeningPipeline, SpreadBuilder, SpreadCandidate,
    SpreadStrategy,
};
pub use config::{AppConfig, ConfigError};
pub use data::{DataSource, OptionQuote, OptionType, OptionsChain, OptionsSnapshot, SourceError};
pub use fetch::{ChainCache, ChainFetcher, TickerError, UnavailableReason};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, ScreeningReport, TickerOutcome,
    TickerScreen,
};
pub use report::ReportSummary;
