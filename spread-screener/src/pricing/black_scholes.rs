//! Black-Scholes delta and the delta-based probability of profit.
//!
//! No dividend term: the screener only needs delta as a moneyness
//! probability proxy, and dividends are not modeled.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::OptionType;

/// Day count used to convert DTE to year fractions.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Default risk-free rate (approximate US Treasury yield).
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.045;

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(0.5, |normal| normal.cdf(x))
}

/// Delta at expiration: 1/-1 when in the money, 0 otherwise.
fn intrinsic_delta(spot: f64, strike: f64, option_type: OptionType) -> f64 {
    match option_type {
        OptionType::Call => {
            if spot > strike {
                1.0
            } else {
                0.0
            }
        }
        OptionType::Put => {
            if spot < strike {
                -1.0
            } else {
                0.0
            }
        }
    }
}

/// Black-Scholes delta.
///
/// `days_to_expiry <= 0` returns the intrinsic delta. A non-positive
/// volatility should never reach here (such quotes are not tradeable), but
/// if it does the intrinsic delta is returned instead of NaN.
pub fn delta(
    spot: f64,
    strike: f64,
    days_to_expiry: f64,
    implied_vol: f64,
    risk_free_rate: f64,
    option_type: OptionType,
) -> f64 {
    BlackScholes::new(risk_free_rate).delta(
        spot,
        strike,
        days_to_expiry / DAYS_PER_YEAR,
        implied_vol,
        option_type,
    )
}

/// Probability of profit for a short leg, `1 - |delta|`.
///
/// This treats delta as the probability of finishing in the money. It is an
/// approximation, not the terminal-distribution probability (which would
/// use N(d2) under the risk-neutral measure).
pub fn probability_of_profit(short_delta: f64) -> f64 {
    (1.0 - short_delta.abs()).clamp(0.0, 1.0)
}

/// Black-Scholes calculator for European options without dividends.
#[derive(Debug, Clone, Copy)]
pub struct BlackScholes {
    /// Risk-free interest rate
    pub rate: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

impl BlackScholes {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    /// Calculate d1 parameter.
    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator = (spot / strike).ln() + (self.rate + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn degenerate(spot: f64, strike: f64, time: f64, vol: f64) -> bool {
        time <= 0.0 || vol <= 0.0 || spot <= 0.0 || strike <= 0.0
    }

    /// Calculate delta; `time` is in years.
    pub fn delta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if Self::degenerate(spot, strike, time, vol) {
            return intrinsic_delta(spot, strike, opt_type);
        }

        let d1 = self.d1(spot, strike, time, vol);
        match opt_type {
            OptionType::Call => norm_cdf(d1),
            OptionType::Put => norm_cdf(d1) - 1.0,
        }
    }
}
