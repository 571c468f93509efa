//! Vertical credit spread construction.
//!
//! Pairs a short leg with a further out-of-the-money long leg of the same
//! type and expiration:
//! - bull put: short put at K, long put at K - width
//! - bear call: short call at K, long call at K + width
//!
//! Every derived figure is computed once when the candidate is built.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{OptionQuote, OptionType, OptionsChain};
use crate::pricing::{self, DAYS_PER_YEAR};

/// Contract multiplier for US equity options.
pub const CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Credit spread strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadStrategy {
    BullPut,
    BearCall,
}

impl SpreadStrategy {
    pub const ALL: [SpreadStrategy; 2] = [SpreadStrategy::BullPut, SpreadStrategy::BearCall];

    /// Option type of both legs.
    pub fn option_type(&self) -> OptionType {
        match self {
            Self::BullPut => OptionType::Put,
            Self::BearCall => OptionType::Call,
        }
    }

    /// Accepts `bull_put`, `bull-put`, `put`, `bear_call`, `bear-call`, `call`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "bull_put" | "put" => Some(Self::BullPut),
            "bear_call" | "call" => Some(Self::BearCall),
            _ => None,
        }
    }

    /// Strike of the long leg for a short strike and width.
    fn long_strike(&self, short_strike: Decimal, width: Decimal) -> Decimal {
        match self {
            Self::BullPut => short_strike - width,
            Self::BearCall => short_strike + width,
        }
    }
}

impl fmt::Display for SpreadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BullPut => f.write_str("bull-put"),
            Self::BearCall => f.write_str("bear-call"),
        }
    }
}

/// A two-leg vertical credit spread.
///
/// Immutable after construction; all fields are read through accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadCandidate {
    ticker: String,
    strategy: SpreadStrategy,
    evaluation_date: NaiveDate,
    dte: i64,
    short_leg: OptionQuote,
    long_leg: OptionQuote,
    spot: Decimal,
    width: Decimal,
    net_credit: Decimal,
    max_loss: Decimal,
    return_on_risk: f64,
    short_delta: f64,
    probability_of_profit: f64,
    distance_pct: f64,
}

impl SpreadCandidate {
    /// Build a candidate and compute its derived figures.
    ///
    /// The net credit is floored at zero and capped at the width, so the max
    /// loss is never negative.
    pub fn new(
        ticker: &str,
        strategy: SpreadStrategy,
        short_leg: OptionQuote,
        long_leg: OptionQuote,
        spot: Decimal,
        evaluation_date: NaiveDate,
        risk_free_rate: f64,
    ) -> Self {
        let width = (short_leg.strike - long_leg.strike).abs();
        let net_credit = (short_leg.bid - long_leg.ask).max(Decimal::ZERO).min(width);
        let max_loss = width - net_credit;
        let dte = (short_leg.expiration - evaluation_date).num_days();

        let return_on_risk = if max_loss > Decimal::ZERO {
            to_f64(net_credit) / to_f64(max_loss) * 100.0
        } else {
            0.0
        };

        let spot_f = to_f64(spot);
        let short_strike = to_f64(short_leg.strike);
        let short_delta = pricing::delta(
            spot_f,
            short_strike,
            dte as f64,
            short_leg.usable_iv().unwrap_or(0.0),
            risk_free_rate,
            strategy.option_type(),
        );

        // Positive when the short strike is out of the money
        let distance_pct = if spot_f > 0.0 {
            match strategy {
                SpreadStrategy::BullPut => (spot_f - short_strike) / spot_f * 100.0,
                SpreadStrategy::BearCall => (short_strike - spot_f) / spot_f * 100.0,
            }
        } else {
            0.0
        };

        Self {
            ticker: ticker.to_string(),
            strategy,
            evaluation_date,
            dte,
            short_leg,
            long_leg,
            spot,
            width,
            net_credit,
            max_loss,
            return_on_risk,
            short_delta,
            probability_of_profit: pricing::probability_of_profit(short_delta),
            distance_pct,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn strategy(&self) -> SpreadStrategy {
        self.strategy
    }

    pub fn expiration(&self) -> NaiveDate {
        self.short_leg.expiration
    }

    pub fn evaluation_date(&self) -> NaiveDate {
        self.evaluation_date
    }

    /// Days to expiration from the evaluation date.
    pub fn dte(&self) -> i64 {
        self.dte
    }

    pub fn short_leg(&self) -> &OptionQuote {
        &self.short_leg
    }

    pub fn long_leg(&self) -> &OptionQuote {
        &self.long_leg
    }

    pub fn short_strike(&self) -> Decimal {
        self.short_leg.strike
    }

    pub fn long_strike(&self) -> Decimal {
        self.long_leg.strike
    }

    /// Underlying price the candidate was priced against.
    pub fn spot(&self) -> Decimal {
        self.spot
    }

    pub fn width(&self) -> Decimal {
        self.width
    }

    /// Net credit per share.
    pub fn net_credit(&self) -> Decimal {
        self.net_credit
    }

    /// Max loss per share: width - net credit.
    pub fn max_loss(&self) -> Decimal {
        self.max_loss
    }

    /// Max profit per share, equal to the net credit.
    pub fn max_profit(&self) -> Decimal {
        self.net_credit
    }

    /// Max loss for one contract.
    pub fn max_loss_per_contract(&self) -> Decimal {
        self.max_loss * CONTRACT_MULTIPLIER
    }

    /// Return on risk in percent; 0 when the max loss is 0.
    pub fn return_on_risk(&self) -> f64 {
        self.return_on_risk
    }

    /// Return on risk scaled to a year; 0 when already expired.
    pub fn annualized_return(&self) -> f64 {
        if self.dte <= 0 {
            return 0.0;
        }
        self.return_on_risk * DAYS_PER_YEAR / self.dte as f64
    }

    /// Max loss over max profit; `None` without a credit.
    pub fn risk_reward_ratio(&self) -> Option<f64> {
        if self.net_credit.is_zero() {
            None
        } else {
            Some(to_f64(self.max_loss) / to_f64(self.net_credit))
        }
    }

    /// Black-Scholes delta of the short leg.
    pub fn short_delta(&self) -> f64 {
        self.short_delta
    }

    /// Probability of profit as a fraction, `1 - |short delta|`.
    pub fn probability_of_profit(&self) -> f64 {
        self.probability_of_profit
    }

    /// Signed distance from spot to the short strike in percent.
    pub fn distance_pct(&self) -> f64 {
        self.distance_pct
    }

    /// Underlying price at expiration where the spread breaks even.
    pub fn break_even(&self) -> Decimal {
        match self.strategy {
            SpreadStrategy::BullPut => self.short_leg.strike - self.net_credit,
            SpreadStrategy::BearCall => self.short_leg.strike + self.net_credit,
        }
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

/// Builds spread candidates from one chain.
#[derive(Debug, Clone)]
pub struct SpreadBuilder {
    ticker: String,
    risk_free_rate: f64,
    evaluation_date: NaiveDate,
}

impl SpreadBuilder {
    pub fn new(ticker: &str, risk_free_rate: f64, evaluation_date: NaiveDate) -> Self {
        Self {
            ticker: ticker.to_string(),
            risk_free_rate,
            evaluation_date,
        }
    }

    /// Every spread of `strategy` in `chain` for each width.
    ///
    /// Both legs must be tradeable (two-sided market and IV). Pairs whose
    /// long strike is not listed are skipped; widths may share a short leg.
    pub fn build(
        &self,
        chain: &OptionsChain,
        widths: &[Decimal],
        strategy: SpreadStrategy,
    ) -> Vec<SpreadCandidate> {
        let by_strike: BTreeMap<Decimal, &OptionQuote> = chain
            .side(strategy.option_type())
            .iter()
            .filter(|q| q.is_tradeable())
            .map(|q| (q.strike, q))
            .collect();

        let mut candidates = Vec::new();
        for (short_strike, short) in &by_strike {
            for width in widths.iter().filter(|w| **w > Decimal::ZERO) {
                let long_strike = strategy.long_strike(*short_strike, *width);
                if let Some(long) = by_strike.get(&long_strike) {
                    candidates.push(SpreadCandidate::new(
                        &self.ticker,
                        strategy,
                        (*short).clone(),
                        (*long).clone(),
                        chain.spot,
                        self.evaluation_date,
                        self.risk_free_rate,
                    ));
                }
            }
        }
        candidates
    }

    /// Spreads for several strategies.
    pub fn build_all(
        &self,
        chain: &OptionsChain,
        widths: &[Decimal],
        strategies: &[SpreadStrategy],
    ) -> Vec<SpreadCandidate> {
        strategies
            .iter()
            .flat_map(|strategy| self.build(chain, widths, *strategy))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn eval_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 12).unwrap()
    }

    fn expiration() -> NaiveDate {
        // 35 DTE
        NaiveDate::from_ymd_opt(2024, 2, 16).unwrap()
    }

    fn quote(strike: Decimal, option_type: OptionType, bid: Decimal, ask: Decimal) -> OptionQuote {
        OptionQuote {
            strike,
            expiration: expiration(),
            option_type,
            bid,
            ask,
            last: (bid + ask) / dec!(2),
            implied_volatility: Some(0.30),
            open_interest: 500,
            volume: 50,
            contract_symbol: None,
        }
    }

    fn put_chain(spot: Decimal) -> OptionsChain {
        let mut chain = OptionsChain::new("XYZ", expiration(), spot, Utc::now());
        chain.add_quote(quote(dec!(100), OptionType::Put, dec!(1.20), dec!(1.30)));
        chain.add_quote(quote(dec!(99), OptionType::Put, dec!(0.95), dec!(1.05)));
        chain.add_quote(quote(dec!(98), OptionType::Put, dec!(0.75), dec!(0.85)));
        chain.add_quote(quote(dec!(95), OptionType::Put, dec!(0.20), dec!(0.30)));
        chain
    }

    #[test]
    fn test_bull_put_figures() {
        let short = quote(dec!(100), OptionType::Put, dec!(1.20), dec!(1.30));
        let long = quote(dec!(95), OptionType::Put, dec!(0.20), dec!(0.30));
        let spread = SpreadCandidate::new(
            "XYZ",
            SpreadStrategy::BullPut,
            short,
            long,
            dec!(106),
            eval_date(),
            0.045,
        );

        assert_eq!(spread.width(), dec!(5));
        assert_eq!(spread.net_credit(), dec!(0.90));
        assert_eq!(spread.max_loss(), dec!(4.10));
        assert_eq!(spread.max_profit(), dec!(0.90));
        assert_eq!(spread.max_loss_per_contract(), dec!(410));
        assert_eq!(spread.break_even(), dec!(99.10));
        assert_eq!(spread.dte(), 35);

        // 0.90 / 4.10 = 21.95%
        assert_relative_eq!(spread.return_on_risk(), 21.951, epsilon = 0.001);
        assert_relative_eq!(spread.annualized_return(), 21.951 * 365.0 / 35.0, epsilon = 0.01);
        assert_relative_eq!(spread.distance_pct(), 5.660, epsilon = 0.001);

        assert!(spread.short_delta() < 0.0);
        assert_relative_eq!(spread.short_delta(), -0.236, epsilon = 0.002);
        assert_relative_eq!(
            spread.probability_of_profit(),
            1.0 + spread.short_delta(),
            epsilon = 1e-12
        );
        assert_relative_eq!(spread.risk_reward_ratio().unwrap(), 4.10 / 0.90, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_credit_floors_at_zero() {
        let short = quote(dec!(100), OptionType::Put, dec!(0.10), dec!(0.20));
        let long = quote(dec!(95), OptionType::Put, dec!(0.30), dec!(0.40));
        let spread = SpreadCandidate::new(
            "XYZ",
            SpreadStrategy::BullPut,
            short,
            long,
            dec!(106),
            eval_date(),
            0.045,
        );

        assert_eq!(spread.net_credit(), Decimal::ZERO);
        assert_eq!(spread.max_loss(), dec!(5));
        assert_eq!(spread.return_on_risk(), 0.0);
        assert_eq!(spread.risk_reward_ratio(), None);
    }

    #[test]
    fn test_credit_capped_at_width() {
        // Crossed quotes: credit above width would mean negative max loss
        let short = quote(dec!(100), OptionType::Put, dec!(7.00), dec!(7.10));
        let long = quote(dec!(99), OptionType::Put, dec!(0.50), dec!(0.60));
        let spread = SpreadCandidate::new(
            "XYZ",
            SpreadStrategy::BullPut,
            short,
            long,
            dec!(90),
            eval_date(),
            0.045,
        );

        assert_eq!(spread.net_credit(), dec!(1));
        assert_eq!(spread.max_loss(), Decimal::ZERO);
        assert_eq!(spread.return_on_risk(), 0.0);
    }

    #[test]
    fn test_bear_call_figures() {
        let short = quote(dec!(110), OptionType::Call, dec!(1.00), dec!(1.10));
        let long = quote(dec!(112), OptionType::Call, dec!(0.40), dec!(0.50));
        let spread = SpreadCandidate::new(
            "XYZ",
            SpreadStrategy::BearCall,
            short,
            long,
            dec!(100),
            eval_date(),
            0.045,
        );

        assert_eq!(spread.width(), dec!(2));
        assert_eq!(spread.net_credit(), dec!(0.50));
        assert_eq!(spread.break_even(), dec!(110.50));
        assert_relative_eq!(spread.distance_pct(), 10.0, epsilon = 1e-9);
        assert!(spread.short_delta() > 0.0 && spread.short_delta() < 1.0);
    }

    #[test]
    fn test_itm_short_has_negative_distance() {
        let short = quote(dec!(100), OptionType::Put, dec!(3.00), dec!(3.10));
        let long = quote(dec!(95), OptionType::Put, dec!(1.00), dec!(1.10));
        let spread = SpreadCandidate::new(
            "XYZ",
            SpreadStrategy::BullPut,
            short,
            long,
            dec!(98),
            eval_date(),
            0.045,
        );
        assert!(spread.distance_pct() < 0.0);
    }

    #[test]
    fn test_build_pairs_each_width() {
        let builder = SpreadBuilder::new("XYZ", 0.045, eval_date());
        let chain = put_chain(dec!(106));

        let spreads = builder.build(&chain, &[dec!(1), dec!(2), dec!(5)], SpreadStrategy::BullPut);
        let mut pairs: Vec<(Decimal, Decimal)> = spreads
            .iter()
            .map(|s| (s.short_strike(), s.long_strike()))
            .collect();
        pairs.sort();

        assert_eq!(
            pairs,
            vec![
                (dec!(99), dec!(98)),
                (dec!(100), dec!(95)),
                (dec!(100), dec!(98)),
                (dec!(100), dec!(99)),
            ]
        );
    }

    #[test]
    fn test_build_skips_untradeable_legs() {
        let builder = SpreadBuilder::new("XYZ", 0.045, eval_date());
        let mut chain = OptionsChain::new("XYZ", expiration(), dec!(106), Utc::now());
        chain.add_quote(quote(dec!(100), OptionType::Put, dec!(1.20), dec!(1.30)));
        chain.add_quote(quote(dec!(95), OptionType::Put, Decimal::ZERO, dec!(0.30)));
        let mut no_iv = quote(dec!(99), OptionType::Put, dec!(0.95), dec!(1.05));
        no_iv.implied_volatility = None;
        chain.add_quote(no_iv);

        let spreads = builder.build(&chain, &[dec!(1), dec!(5)], SpreadStrategy::BullPut);
        assert!(spreads.is_empty());
    }

    #[test]
    fn test_build_never_invents_strikes() {
        let builder = SpreadBuilder::new("XYZ", 0.045, eval_date());
        let chain = put_chain(dec!(106));
        let listed: Vec<Decimal> = chain.puts.iter().map(|q| q.strike).collect();
        let widths = [dec!(1), dec!(2), dec!(3), dec!(5)];

        for spread in builder.build_all(&chain, &widths, &SpreadStrategy::ALL) {
            assert!(listed.contains(&spread.short_strike()));
            assert!(listed.contains(&spread.long_strike()));
            assert!(spread.short_leg().bid > Decimal::ZERO);
            assert!(spread.long_leg().ask > Decimal::ZERO);
            assert_eq!(spread.max_loss(), spread.width() - spread.net_credit());
            assert!(spread.max_loss() >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_bear_call_uses_higher_long_strike() {
        let builder = SpreadBuilder::new("XYZ", 0.045, eval_date());
        let mut chain = OptionsChain::new("XYZ", expiration(), dec!(100), Utc::now());
        chain.add_quote(quote(dec!(105), OptionType::Call, dec!(1.50), dec!(1.60)));
        chain.add_quote(quote(dec!(110), OptionType::Call, dec!(0.40), dec!(0.50)));

        let spreads = builder.build(&chain, &[dec!(5)], SpreadStrategy::BearCall);
        assert_eq!(spreads.len(), 1);
        assert_eq!(spreads[0].short_strike(), dec!(105));
        assert_eq!(spreads[0].long_strike(), dec!(110));

        // No puts listed
        assert!(builder.build(&chain, &[dec!(5)], SpreadStrategy::BullPut).is_empty());
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!(SpreadStrategy::parse("bull-put"), Some(SpreadStrategy::BullPut));
        assert_eq!(SpreadStrategy::parse("CALL"), Some(SpreadStrategy::BearCall));
        assert_eq!(SpreadStrategy::parse("iron_condor"), None);
        assert_eq!(SpreadStrategy::BearCall.to_string(), "bear-call");
    }
}
