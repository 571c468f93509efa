//! Multi-stage filter and ranking of spread candidates.
//!
//! Stages run in a fixed order and can only drop candidates:
//! 1. liquidity (open interest on both legs)
//! 2. credit floor
//! 3. window (DTE, distance from spot, ROR band, max loss, optional delta band)
//! 4. duplicate suppression
//! 5. ranking
//!
//! The earnings buffer is a ticker-level gate, applied by the orchestrator
//! before any chain is fetched.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use super::criteria::ScreeningCriteria;
use super::spread_builder::{SpreadCandidate, SpreadStrategy};

/// Per-stage rejection counts for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScreeningStats {
    pub input: usize,
    pub rejected_liquidity: usize,
    pub rejected_credit: usize,
    pub rejected_dte: usize,
    pub rejected_distance: usize,
    pub rejected_ror: usize,
    pub rejected_max_loss: usize,
    pub rejected_delta: usize,
    pub duplicates: usize,
    pub passed: usize,
}

impl ScreeningStats {
    /// Fold another run's counts into this one.
    pub fn merge(&mut self, other: &ScreeningStats) {
        self.input += other.input;
        self.rejected_liquidity += other.rejected_liquidity;
        self.rejected_credit += other.rejected_credit;
        self.rejected_dte += other.rejected_dte;
        self.rejected_distance += other.rejected_distance;
        self.rejected_ror += other.rejected_ror;
        self.rejected_max_loss += other.rejected_max_loss;
        self.rejected_delta += other.rejected_delta;
        self.duplicates += other.duplicates;
        self.passed += other.passed;
    }
}

/// Window stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRejection {
    Dte,
    Distance,
    ReturnOnRisk,
    MaxLoss,
    ShortDelta,
}

/// Outcome of the earnings gate for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarningsGate {
    Clear,
    Excluded { earnings_date: NaiveDate, days_until: i64 },
}

/// Applies [`ScreeningCriteria`] to spread candidates.
#[derive(Debug, Clone, Copy)]
pub struct ScreeningPipeline<'a> {
    criteria: &'a ScreeningCriteria,
}

impl<'a> ScreeningPipeline<'a> {
    pub fn new(criteria: &'a ScreeningCriteria) -> Self {
        Self { criteria }
    }

    /// Filter and rank.
    pub fn run(&self, candidates: Vec<SpreadCandidate>) -> Vec<SpreadCandidate> {
        self.run_with_stats(candidates).0
    }

    /// Filter and rank, counting rejections per stage.
    pub fn run_with_stats(
        &self,
        candidates: Vec<SpreadCandidate>,
    ) -> (Vec<SpreadCandidate>, ScreeningStats) {
        let mut stats = ScreeningStats {
            input: candidates.len(),
            ..Default::default()
        };

        let mut survivors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !self.passes_liquidity(&candidate) {
                stats.rejected_liquidity += 1;
                continue;
            }
            if !self.passes_credit_floor(&candidate) {
                stats.rejected_credit += 1;
                continue;
            }
            match self.check_window(&candidate) {
                Ok(()) => survivors.push(candidate),
                Err(WindowRejection::Dte) => stats.rejected_dte += 1,
                Err(WindowRejection::Distance) => stats.rejected_distance += 1,
                Err(WindowRejection::ReturnOnRisk) => stats.rejected_ror += 1,
                Err(WindowRejection::MaxLoss) => stats.rejected_max_loss += 1,
                Err(WindowRejection::ShortDelta) => stats.rejected_delta += 1,
            }
        }

        let before_dedup = survivors.len();
        let mut ranked = dedup(survivors);
        stats.duplicates = before_dedup - ranked.len();

        rank(&mut ranked);
        stats.passed = ranked.len();

        debug!(?stats, "screening pipeline finished");
        (ranked, stats)
    }

    /// Both legs carry at least the minimum open interest.
    pub fn passes_liquidity(&self, candidate: &SpreadCandidate) -> bool {
        let min_oi = self.criteria.min_open_interest;
        candidate.short_leg().open_interest >= min_oi
            && candidate.long_leg().open_interest >= min_oi
    }

    pub fn passes_credit_floor(&self, candidate: &SpreadCandidate) -> bool {
        candidate.net_credit() >= self.criteria.min_credit
    }

    /// DTE, distance, ROR band, max loss per contract and optional delta band.
    pub fn check_window(&self, candidate: &SpreadCandidate) -> Result<(), WindowRejection> {
        let c = self.criteria;

        if candidate.dte() < c.min_dte || candidate.dte() > c.max_dte {
            return Err(WindowRejection::Dte);
        }
        if candidate.distance_pct() < c.min_distance_pct {
            return Err(WindowRejection::Distance);
        }
        let ror = candidate.return_on_risk();
        if ror < c.min_ror || ror > c.max_ror {
            return Err(WindowRejection::ReturnOnRisk);
        }
        if candidate.max_loss_per_contract() > c.max_loss {
            return Err(WindowRejection::MaxLoss);
        }
        if let Some((low, high)) = c.short_delta_range {
            let delta = candidate.short_delta().abs();
            if delta < low || delta > high {
                return Err(WindowRejection::ShortDelta);
            }
        }
        Ok(())
    }

    /// Exclude a ticker whose next earnings fall within the buffer.
    ///
    /// Earnings already past, unknown, or a zero buffer leave the ticker clear.
    pub fn earnings_gate(
        &self,
        evaluation_date: NaiveDate,
        earnings_date: Option<NaiveDate>,
    ) -> EarningsGate {
        let buffer = self.criteria.earnings_buffer_days;
        match earnings_date {
            Some(date) if buffer > 0 => {
                let days_until = (date - evaluation_date).num_days();
                if (0..=buffer).contains(&days_until) {
                    EarningsGate::Excluded {
                        earnings_date: date,
                        days_until,
                    }
                } else {
                    EarningsGate::Clear
                }
            }
            _ => EarningsGate::Clear,
        }
    }
}

/// Identity of a spread for duplicate suppression.
type SpreadKey = (String, SpreadStrategy, NaiveDate, Decimal, Decimal);

fn spread_key(candidate: &SpreadCandidate) -> SpreadKey {
    (
        candidate.ticker().to_string(),
        candidate.strategy(),
        candidate.expiration(),
        candidate.short_strike(),
        candidate.long_strike(),
    )
}

/// Keep one candidate per spread identity, preferring the higher ROR.
fn dedup(candidates: Vec<SpreadCandidate>) -> Vec<SpreadCandidate> {
    let mut unique: BTreeMap<SpreadKey, SpreadCandidate> = BTreeMap::new();
    for candidate in candidates {
        let key = spread_key(&candidate);
        match unique.get(&key) {
            Some(kept) if kept.return_on_risk() >= candidate.return_on_risk() => {}
            _ => {
                unique.insert(key, candidate);
            }
        }
    }
    unique.into_values().collect()
}

/// Total ranking order: best first.
///
/// Annualized return, then probability of profit, then net credit, all
/// descending; remaining ties break on the spread identity ascending.
pub fn rank_order(a: &SpreadCandidate, b: &SpreadCandidate) -> Ordering {
    b.annualized_return()
        .total_cmp(&a.annualized_return())
        .then_with(|| b.probability_of_profit().total_cmp(&a.probability_of_profit()))
        .then_with(|| b.net_credit().cmp(&a.net_credit()))
        .then_with(|| a.ticker().cmp(b.ticker()))
        .then_with(|| a.strategy().cmp(&b.strategy()))
        .then_with(|| a.expiration().cmp(&b.expiration()))
        .then_with(|| a.short_strike().cmp(&b.short_strike()))
        .then_with(|| a.long_strike().cmp(&b.long_strike()))
}

/// Sort in place by [`rank_order`].
pub fn rank(candidates: &mut [SpreadCandidate]) {
    candidates.sort_by(rank_order);
}
