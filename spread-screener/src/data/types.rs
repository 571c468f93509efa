//! Core data types for option chain screening.
//!
//! Quotes are immutable snapshots taken at fetch time. Raw records coming
//! from a data source are converted into typed quotes here; anything that
//! cannot be typed is dropped rather than reported.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// A single listed option contract at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Strike price
    pub strike: Decimal,

    /// Option expiration date
    pub expiration: NaiveDate,

    /// Option type (call or put)
    pub option_type: OptionType,

    /// Bid price
    pub bid: Decimal,

    /// Ask price
    pub ask: Decimal,

    /// Last traded price
    pub last: Decimal,

    /// Implied volatility as a decimal (0.25 = 25%); `None` when the source has none
    pub implied_volatility: Option<f64>,

    /// Open interest
    pub open_interest: i64,

    /// Trading volume
    pub volume: i64,

    /// OCC contract symbol, when the source provides one
    #[serde(default)]
    pub contract_symbol: Option<String>,
}

impl OptionQuote {
    /// Mid price.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    /// Bid-ask spread as percentage of mid.
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid.is_zero() {
            return 0.0;
        }
        let spread: f64 = ((self.ask - self.bid) / mid).try_into().unwrap_or(0.0);
        spread * 100.0
    }

    /// Usable implied volatility (present and strictly positive).
    pub fn usable_iv(&self) -> Option<f64> {
        self.implied_volatility
            .filter(|iv| iv.is_finite() && *iv > 0.0)
    }

    /// A quote can be paired into a spread only with a two-sided market and an IV.
    pub fn is_tradeable(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO && self.usable_iv().is_some()
    }
}

/// Untyped option record as returned by a data source.
///
/// Sources disagree on field presence, so nearly everything is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOptionRecord {
    pub strike: f64,
    /// "C"/"P" or "call"/"put"
    pub option_type: String,
    /// YYYY-MM-DD
    pub expiration: String,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub implied_volatility: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<i64>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub contract_symbol: Option<String>,
}

impl RawOptionRecord {
    /// Convert to a typed quote. Returns `None` for records that cannot be typed.
    pub fn to_quote(&self) -> Option<OptionQuote> {
        let expiration = NaiveDate::parse_from_str(&self.expiration, "%Y-%m-%d").ok()?;
        let option_type = OptionType::from_str(&self.option_type)?;
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return None;
        }

        Some(OptionQuote {
            strike: Decimal::try_from(self.strike).ok()?.normalize(),
            expiration,
            option_type,
            bid: price_or_zero(self.bid),
            ask: price_or_zero(self.ask),
            last: price_or_zero(self.last),
            implied_volatility: self.implied_volatility.filter(|iv| iv.is_finite()),
            open_interest: self.open_interest.unwrap_or(0),
            volume: self.volume.unwrap_or(0),
            contract_symbol: self.contract_symbol.clone(),
        })
    }
}

fn price_or_zero(value: Option<f64>) -> Decimal {
    value
        .filter(|v| v.is_finite())
        .and_then(|v| Decimal::try_from(v).ok())
        .map(|d| d.round_dp(4))
        .unwrap_or(Decimal::ZERO)
}

/// All options for one ticker and one expiration date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsChain {
    /// Underlying symbol
    pub ticker: String,

    /// Expiration date shared by every quote in the chain
    pub expiration: NaiveDate,

    /// Underlying price at fetch time
    pub spot: Decimal,

    /// When the chain was fetched
    pub fetched_at: DateTime<Utc>,

    /// Call options
    pub calls: Vec<OptionQuote>,

    /// Put options
    pub puts: Vec<OptionQuote>,
}

impl OptionsChain {
    /// Create a new empty chain.
    pub fn new(
        ticker: &str,
        expiration: NaiveDate,
        spot: Decimal,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            expiration,
            spot,
            fetched_at,
            calls: Vec::new(),
            puts: Vec::new(),
        }
    }

    /// Add a quote to the appropriate side.
    ///
    /// Quotes for a different expiration are rejected and `false` is returned.
    pub fn add_quote(&mut self, quote: OptionQuote) -> bool {
        if quote.expiration != self.expiration {
            return false;
        }
        match quote.option_type {
            OptionType::Call => self.calls.push(quote),
            OptionType::Put => self.puts.push(quote),
        }
        true
    }

    /// Quotes of one type.
    pub fn side(&self, option_type: OptionType) -> &[OptionQuote] {
        match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }
}

/// Everything fetched for one underlying in one run.
///
/// Holds the chains for every expiration inside the requested DTE window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    /// Underlying symbol
    pub ticker: String,

    /// Underlying price
    pub spot: Decimal,

    /// Fetch timestamp
    pub fetched_at: DateTime<Utc>,

    /// Chains sorted by expiration
    pub chains: Vec<OptionsChain>,
}

impl OptionsSnapshot {
    /// Create a new empty snapshot.
    pub fn new(ticker: &str, spot: Decimal, fetched_at: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.to_string(),
            spot,
            fetched_at,
            chains: Vec::new(),
        }
    }

    /// Total number of option quotes in this snapshot.
    pub fn total_quotes(&self) -> usize {
        self.chains.iter().map(OptionsChain::len).sum()
    }
}
