use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::UnderwritingResult;

/// Monetary inputs. Parsed exactly, converted to `f64` when they enter a
/// monthly series.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Reporting currency. Every amount in a deal is in this one currency; no
/// conversion happens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    Other(String),
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Other(code) => f.write_str(code),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Convert an input decimal into the engine's floating-point domain.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// A sweep axis: either an explicit list of values or an inclusive
/// `min..=max` range walked by `step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Values { values: Vec<Decimal> },
    Stepped { min: Decimal, max: Decimal, step: Decimal },
}

impl RangeSpec {
    /// Expand into at most `max_points` concrete points. Stepping happens in
    /// decimal arithmetic so `0.05..=0.07 step 0.005` yields exactly five
    /// points.
    pub fn expand(&self, field: &str, max_points: usize) -> UnderwritingResult<Vec<Decimal>> {
        let too_many = || {
            UnderwritingError::invalid(field, format!("Range has more than {max_points} points"))
        };
        match self {
            RangeSpec::Values { values } => {
                if values.is_empty() {
                    return Err(UnderwritingError::invalid(field, "At least one value is required"));
                }
                if values.len() > max_points {
                    return Err(too_many());
                }
                Ok(values.clone())
            }
            RangeSpec::Stepped { min, max, step } => {
                if *step <= Decimal::ZERO {
                    return Err(UnderwritingError::invalid(field, "Step must be positive"));
                }
                if min > max {
                    return Err(UnderwritingError::invalid(field, "Min must be <= max"));
                }
                let overflow =
                    || UnderwritingError::invalid(field, "Range overflows decimal arithmetic");
                let span = max.checked_sub(*min).ok_or_else(overflow)?;
                // Whole steps that fit in the span; the point count is one more
                let steps = span
                    .checked_div(*step)
                    .map(|n| n.floor())
                    .and_then(|n| n.to_usize())
                    .filter(|n| *n < max_points)
                    .ok_or_else(too_many)?;

                let mut values = Vec::with_capacity(steps + 2);
                for i in 0..=steps {
                    let point = step
                        .checked_mul(Decimal::from(i))
                        .and_then(|offset| min.checked_add(offset))
                        .ok_or_else(overflow)?;
                    if point > *max {
                        break;
                    }
                    values.push(point);
                }
                // Ensure max is included if step doesn't land exactly on it
                if values.last().is_some_and(|last| last < max) {
                    values.push(*max);
                }
                if values.len() > max_points {
                    return Err(too_many());
                }
                Ok(values)
            }
        }
    }
}

/// Metadata attached to every engine result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

impl ComputationMetadata {
    pub fn new(elapsed_us: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stepped_range_is_exact() {
        let spec = RangeSpec::Stepped {
            min: dec!(0.05),
            max: dec!(0.07),
            step: dec!(0.005),
        };
        let values = spec.expand("exit_cap_rates", 100).unwrap();
        assert_eq!(
            values,
            vec![dec!(0.05), dec!(0.055), dec!(0.06), dec!(0.065), dec!(0.07)]
        );
    }

    #[test]
    fn test_stepped_range_includes_max() {
        let spec = RangeSpec::Stepped {
            min: dec!(1),
            max: dec!(10),
            step: dec!(4),
        };
        assert_eq!(spec.expand("x", 100).unwrap(), vec![dec!(1), dec!(5), dec!(9), dec!(10)]);
    }

    #[test]
    fn test_range_rejects_bad_step() {
        let spec = RangeSpec::Stepped {
            min: dec!(1),
            max: dec!(2),
            step: dec!(0),
        };
        assert!(spec.expand("x", 100).is_err());
        let empty = RangeSpec::Values { values: vec![] };
        assert!(empty.expand("x", 100).is_err());
    }

    #[test]
    fn test_stepped_range_near_decimal_limits() {
        let top = RangeSpec::Stepped {
            min: Decimal::MAX - Decimal::ONE,
            max: Decimal::MAX,
            step: Decimal::ONE,
        };
        assert_eq!(
            top.expand("x", 100).unwrap(),
            vec![Decimal::MAX - Decimal::ONE, Decimal::MAX]
        );

        let full = RangeSpec::Stepped {
            min: Decimal::MIN,
            max: Decimal::MAX,
            step: Decimal::MAX,
        };
        assert!(matches!(
            full.expand("x", 100),
            Err(UnderwritingError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_stepped_range_point_limit() {
        let fine = RangeSpec::Stepped {
            min: dec!(0.05),
            max: dec!(0.10),
            step: dec!(0.000000000001),
        };
        let err = fine.expand("exit_cap_rates", 10_000).unwrap_err();
        assert!(err.to_string().contains("more than 10000 points"), "{err}");

        // 1, 2, 3 plus the appended max is one point too many
        let ragged = RangeSpec::Stepped {
            min: dec!(1),
            max: dec!(3.5),
            step: dec!(1),
        };
        assert!(ragged.expand("x", 3).is_err());
        assert_eq!(ragged.expand("x", 4).unwrap().len(), 4);

        let listed = RangeSpec::Values {
            values: vec![dec!(1), dec!(2)],
        };
        assert!(listed.expand("x", 1).is_err());
    }

    #[test]
    fn test_range_deserializes_both_forms() {
        let listed: RangeSpec = serde_json::from_str(r#"{"values": ["0.06", "0.07"]}"#).unwrap();
        assert_eq!(listed.expand("x", 100).unwrap().len(), 2);
        let stepped: RangeSpec =
            serde_json::from_str(r#"{"min": "36", "max": "60", "step": "12"}"#).unwrap();
        assert_eq!(stepped.expand("x", 100).unwrap(), vec![dec!(36), dec!(48), dec!(60)]);
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::default().to_string(), "USD");
        let chf: Currency = serde_json::from_str(r#"{"Other": "CHF"}"#).unwrap();
        assert_eq!(chf.to_string(), "CHF");
    }
}
