//! Cached chain fetching.
//!
//! - [`cache`]: TTL-keyed concurrent map shared by every fetch worker
//! - [`fetcher`]: assembles a ticker's snapshot from a [`crate::data::DataSource`]

pub mod cache;
pub mod fetcher;

pub use cache::{CacheStats, ChainCache, ChainKey, TtlCache, DEFAULT_TTL};
pub use fetcher::{ChainFetcher, TickerError, UnavailableReason};
