//! Spread analytics.
//!
//! Provides:
//! - Vertical credit spread construction across strike widths
//! - Screening thresholds and their validation
//! - The filter/rank pipeline and the ticker-level earnings gate

pub mod criteria;
pub mod pipeline;
pub mod spread_builder;

pub use criteria::{CriteriaError, ScreeningCriteria};
pub use pipeline::{
    rank, rank_order, EarningsGate, ScreeningPipeline, ScreeningStats, WindowRejection,
};
pub use spread_builder::{SpreadBuilder, SpreadCandidate, SpreadStrategy, CONTRACT_MULTIPLIER};
