//! Option pricing math used to score spread candidates.

pub mod black_scholes;

pub use black_scholes::{
    delta, probability_of_profit, BlackScholes, DAYS_PER_YEAR, DEFAULT_RISK_FREE_RATE,
};
