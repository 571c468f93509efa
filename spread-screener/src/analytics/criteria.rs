//! Screening thresholds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::spread_builder::SpreadStrategy;

/// Invalid screening thresholds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CriteriaError {
    #[error("{field}: minimum {min} is greater than maximum {max}")]
    InvertedRange {
        field: &'static str,
        min: String,
        max: String,
    },

    #[error("{field} must be {requirement}, got {value}")]
    OutOfBounds {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },

    #[error("at least one spread width is required")]
    NoWidths,

    #[error("at least one strategy is required")]
    NoStrategies,
}

/// Thresholds applied by the screening pipeline.
///
/// Supplied once per run and never mutated while screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningCriteria {
    /// Minimum return on risk (percent).
    pub min_ror: f64,
    /// Maximum return on risk (percent).
    pub max_ror: f64,
    /// Minimum distance from spot to the short strike (percent).
    pub min_distance_pct: f64,
    /// Inclusive DTE window.
    pub min_dte: i64,
    pub max_dte: i64,
    /// Minimum net credit per share.
    pub min_credit: Decimal,
    /// Minimum open interest on each leg.
    pub min_open_interest: i64,
    /// Ceiling on max loss per contract.
    pub max_loss: Decimal,
    /// Skip tickers reporting earnings within this many days (0 = disabled).
    pub earnings_buffer_days: i64,
    /// Strike widths to scan.
    pub spread_widths: Vec<Decimal>,
    /// Strategies to build.
    pub strategies: Vec<SpreadStrategy>,
    /// Optional band on the short leg's absolute delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_delta_range: Option<(f64, f64)>,
}

impl Default for ScreeningCriteria {
    fn default() -> Self {
        Self {
            min_ror: 20.0,
            max_ror: 75.0,
            min_distance_pct: 5.0,
            min_dte: 30,
            max_dte: 45,
            min_credit: Decimal::new(20, 2),
            min_open_interest: 50,
            max_loss: Decimal::from(500),
            earnings_buffer_days: 0,
            spread_widths: vec![Decimal::ONE, Decimal::TWO, Decimal::from(5)],
            strategies: SpreadStrategy::ALL.to_vec(),
            short_delta_range: None,
        }
    }
}

impl ScreeningCriteria {
    /// Check the thresholds before any data is fetched.
    pub fn validate(&self) -> Result<(), CriteriaError> {
        finite("min_ror", self.min_ror)?;
        finite("max_ror", self.max_ror)?;
        finite("min_distance_pct", self.min_distance_pct)?;

        if self.min_ror < 0.0 {
            return Err(out_of_bounds("min_ror", "non-negative", self.min_ror));
        }
        if self.min_ror > self.max_ror {
            return Err(inverted("ror", self.min_ror, self.max_ror));
        }
        if self.min_dte < 0 {
            return Err(out_of_bounds("min_dte", "non-negative", self.min_dte));
        }
        if self.min_dte > self.max_dte {
            return Err(inverted("dte", self.min_dte, self.max_dte));
        }
        if self.min_credit < Decimal::ZERO {
            return Err(out_of_bounds("min_credit", "non-negative", self.min_credit));
        }
        if self.min_open_interest < 0 {
            return Err(out_of_bounds(
                "min_open_interest",
                "non-negative",
                self.min_open_interest,
            ));
        }
        if self.max_loss <= Decimal::ZERO {
            return Err(out_of_bounds("max_loss", "positive", self.max_loss));
        }
        if self.earnings_buffer_days < 0 {
            return Err(out_of_bounds(
                "earnings_buffer_days",
                "non-negative",
                self.earnings_buffer_days,
            ));
        }

        if self.spread_widths.is_empty() {
            return Err(CriteriaError::NoWidths);
        }
        if let Some(width) = self.spread_widths.iter().find(|w| **w <= Decimal::ZERO) {
            return Err(out_of_bounds("spread_widths", "positive", width));
        }
        if self.strategies.is_empty() {
            return Err(CriteriaError::NoStrategies);
        }

        if let Some((low, high)) = self.short_delta_range {
            for value in [low, high] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(out_of_bounds("short_delta_range", "within [0, 1]", value));
                }
            }
            if low > high {
                return Err(inverted("short_delta_range", low, high));
            }
        }

        Ok(())
    }

    /// Widths sorted and de-duplicated.
    pub fn widths(&self) -> Vec<Decimal> {
        let mut widths = self.spread_widths.clone();
        widths.sort();
        widths.dedup();
        widths
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), CriteriaError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(out_of_bounds(field, "finite", value))
    }
}

fn out_of_bounds(
    field: &'static str,
    requirement: &'static str,
    value: impl ToString,
) -> CriteriaError {
    CriteriaError::OutOfBounds {
        field,
        requirement,
        value: value.to_string(),
    }
}

fn inverted(field: &'static str, min: impl ToString, max: impl ToString) -> CriteriaError {
    CriteriaError::InvertedRange {
        field,
        min: min.to_string(),
        max: max.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let criteria = ScreeningCriteria::default();
        assert!(criteria.validate().is_ok());
        assert_eq!(criteria.min_dte, 30);
        assert_eq!(criteria.max_dte, 45);
        assert_eq!(criteria.min_credit, dec!(0.20));
        assert_eq!(criteria.earnings_buffer_days, 0);
        assert_eq!(criteria.short_delta_range, None);
    }

    #[test]
    fn test_inverted_ranges_rejected() {
        let criteria = ScreeningCriteria {
            min_dte: 50,
            max_dte: 30,
            ..Default::default()
        };
        assert!(matches!(
            criteria.validate(),
            Err(CriteriaError::InvertedRange { field: "dte", .. })
        ));

        let criteria = ScreeningCriteria {
            min_ror: 80.0,
            ..Default::default()
        };
        assert!(matches!(
            criteria.validate(),
            Err(CriteriaError::InvertedRange { field: "ror", .. })
        ));
    }

    #[test]
    fn test_widths_must_be_positive() {
        let criteria = ScreeningCriteria {
            spread_widths: vec![],
            ..Default::default()
        };
        assert_eq!(criteria.validate(), Err(CriteriaError::NoWidths));

        let criteria = ScreeningCriteria {
            spread_widths: vec![dec!(1), dec!(0)],
            ..Default::default()
        };
        assert!(matches!(
            criteria.validate(),
            Err(CriteriaError::OutOfBounds {
                field: "spread_widths",
                ..
            })
        ));
    }

    #[test]
    fn test_other_bounds() {
        let bad = [
            ScreeningCriteria {
                min_ror: f64::NAN,
                ..Default::default()
            },
            ScreeningCriteria {
                max_loss: Decimal::ZERO,
                ..Default::default()
            },
            ScreeningCriteria {
                min_credit: dec!(-0.05),
                ..Default::default()
            },
            ScreeningCriteria {
                earnings_buffer_days: -1,
                ..Default::default()
            },
            ScreeningCriteria {
                short_delta_range: Some((0.30, 0.10)),
                ..Default::default()
            },
            ScreeningCriteria {
                short_delta_range: Some((0.10, 1.5)),
                ..Default::default()
            },
            ScreeningCriteria {
                strategies: vec![],
                ..Default::default()
            },
        ];
        for criteria in bad {
            assert!(criteria.validate().is_err(), "{criteria:?} should be rejected");
        }
    }

    #[test]
    fn test_widths_sorted_and_deduped() {
        let criteria = ScreeningCriteria {
            spread_widths: vec![dec!(5), dec!(1), dec!(5.0), dec!(2)],
            ..Default::default()
        };
        assert_eq!(criteria.widths(), vec![dec!(1), dec!(2), dec!(5)]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let criteria: ScreeningCriteria = toml::from_str(
            r#"
            min_ror = 25.0
            spread_widths = [2.5, 5]
            strategies = ["bull_put"]
            "#,
        )
        .unwrap();

        assert_eq!(criteria.min_ror, 25.0);
        assert_eq!(criteria.max_ror, 75.0);
        assert_eq!(criteria.spread_widths, vec![dec!(2.5), dec!(5)]);
        assert_eq!(criteria.strategies, vec![SpreadStrategy::BullPut]);
    }
}
