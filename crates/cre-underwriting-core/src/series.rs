//! Immutable, fixed-length monthly series.
//!
//! Every operation returns a new [`Series`]. Construction rejects non-finite
//! values, so any NaN or infinity produced mid-computation surfaces as an
//! error at the step that produced it.

use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::UnderwritingResult;

const MONTHS_PER_YEAR: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Series {
    values: Vec<f64>,
}

/// Right-hand side of an elementwise operation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Series(&'a Series),
    Scalar(f64),
}

impl<'a> From<&'a Series> for Operand<'a> {
    fn from(series: &'a Series) -> Self {
        Operand::Series(series)
    }
}

impl From<f64> for Operand<'_> {
    fn from(value: f64) -> Self {
        Operand::Scalar(value)
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = Vec::<f64>::deserialize(deserializer)?;
        Series::new(values).map_err(serde::de::Error::custom)
    }
}

impl Series {
    pub fn new(values: Vec<f64>) -> UnderwritingResult<Self> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(UnderwritingError::NonFiniteValue {
                context: "series construction".into(),
                index,
            });
        }
        Ok(Self { values })
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn constant(len: usize, value: f64) -> UnderwritingResult<Self> {
        Self::new(vec![value; len])
    }

    /// Build from a per-month generator.
    pub fn from_fn<F>(len: usize, f: F) -> UnderwritingResult<Self>
    where
        F: FnMut(usize) -> f64,
    {
        Self::new((0..len).map(f).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn get(&self, month: usize) -> UnderwritingResult<f64> {
        self.values
            .get(month)
            .copied()
            .ok_or_else(|| UnderwritingError::IndexOutOfBounds {
                context: "series".into(),
                index: month,
                length: self.values.len(),
            })
    }

    pub fn map<F>(&self, f: F) -> UnderwritingResult<Self>
    where
        F: Fn(f64) -> f64,
    {
        Self::new(self.values.iter().map(|v| f(*v)).collect())
    }

    fn zip_with<'a, F>(&self, rhs: impl Into<Operand<'a>>, op: F) -> UnderwritingResult<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        match rhs.into() {
            Operand::Scalar(s) => Self::new(self.values.iter().map(|v| op(*v, s)).collect()),
            Operand::Series(other) => {
                if other.len() != self.len() {
                    return Err(UnderwritingError::ShapeMismatch {
                        expected: self.len(),
                        actual: other.len(),
                    });
                }
                Self::new(
                    self.values
                        .iter()
                        .zip(&other.values)
                        .map(|(a, b)| op(*a, *b))
                        .collect(),
                )
            }
        }
    }

    pub fn add<'a>(&self, rhs: impl Into<Operand<'a>>) -> UnderwritingResult<Self> {
        self.zip_with(rhs, |a, b| a + b)
    }

    pub fn subtract<'a>(&self, rhs: impl Into<Operand<'a>>) -> UnderwritingResult<Self> {
        self.zip_with(rhs, |a, b| a - b)
    }

    pub fn multiply<'a>(&self, rhs: impl Into<Operand<'a>>) -> UnderwritingResult<Self> {
        self.zip_with(rhs, |a, b| a * b)
    }

    /// Elementwise division. A zero divisor yields a non-finite value and
    /// therefore an error.
    pub fn divide<'a>(&self, rhs: impl Into<Operand<'a>>) -> UnderwritingResult<Self> {
        self.zip_with(rhs, |a, b| a / b)
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Sum over the half-open range `start..end`.
    pub fn sum_range(&self, start: usize, end: usize) -> UnderwritingResult<f64> {
        if start > end || end > self.values.len() {
            return Err(UnderwritingError::IndexOutOfBounds {
                context: format!("series range {start}..{end}"),
                index: end,
                length: self.values.len(),
            });
        }
        Ok(self.values[start..end].iter().sum())
    }

    pub fn cumulative(&self) -> UnderwritingResult<Self> {
        let mut running = 0.0;
        Self::new(
            self.values
                .iter()
                .map(|v| {
                    running += v;
                    running
                })
                .collect(),
        )
    }

    /// Sum of months `month..month+12`, clipped at the end of the series.
    pub fn forward12(&self, month: usize) -> UnderwritingResult<f64> {
        let end = (month + MONTHS_PER_YEAR).min(self.values.len());
        if month >= self.values.len() {
            return Err(UnderwritingError::IndexOutOfBounds {
                context: "forward12".into(),
                index: month,
                length: self.values.len(),
            });
        }
        self.sum_range(month, end)
    }

    /// Sum of the up-to-12 months ending at (and including) `month`.
    pub fn trailing12(&self, month: usize) -> UnderwritingResult<f64> {
        if month >= self.values.len() {
            return Err(UnderwritingError::IndexOutOfBounds {
                context: "trailing12".into(),
                index: month,
                length: self.values.len(),
            });
        }
        let start = (month + 1).saturating_sub(MONTHS_PER_YEAR);
        self.sum_range(start, month + 1)
    }

    /// Present value at a monthly-compounded annual rate. The value at index
    /// `t` is received at the end of month `t`.
    pub fn discount(&self, annual_rate: f64) -> UnderwritingResult<f64> {
        let monthly = 1.0 + annual_rate / MONTHS_PER_YEAR as f64;
        if !monthly.is_finite() || monthly <= 0.0 {
            return Err(UnderwritingError::invalid(
                "annual_rate",
                "Discount rate must be greater than -1200%",
            ));
        }
        let pv: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(t, v)| v / monthly.powi(t as i32 + 1))
            .sum();
        if !pv.is_finite() {
            return Err(UnderwritingError::NonFiniteValue {
                context: "series discount".into(),
                index: 0,
            });
        }
        Ok(pv)
    }

    /// Totals per 12-month block; a trailing partial year is summed as-is.
    pub fn annual_totals(&self) -> Vec<f64> {
        self.values
            .chunks(MONTHS_PER_YEAR)
            .map(|chunk| chunk.iter().sum())
            .collect()
    }

    /// Replace a single month, returning a new series.
    pub fn with_value(&self, month: usize, value: f64) -> UnderwritingResult<Self> {
        self.get(month)?;
        let mut values = self.values.clone();
        values[month] = value;
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to(n: usize) -> Series {
        Series::from_fn(n, |t| (t + 1) as f64).unwrap()
    }

    #[test]
    fn test_forward12_known_sums() {
        let s = one_to(24);
        assert_eq!(s.forward12(0).unwrap(), 78.0);
        assert_eq!(s.forward12(12).unwrap(), 222.0);
        // Clipped at the end: months 20..24 → 21+22+23+24
        assert_eq!(s.forward12(20).unwrap(), 90.0);
        assert!(s.forward12(24).is_err());
    }

    #[test]
    fn test_trailing12() {
        let s = one_to(24);
        assert_eq!(s.trailing12(11).unwrap(), 78.0);
        assert_eq!(s.trailing12(23).unwrap(), 222.0);
        assert_eq!(s.trailing12(2).unwrap(), 6.0);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(Series::new(vec![1.0, f64::NAN]).is_err());
        let s = Series::constant(3, 1.0).unwrap();
        assert!(s.divide(0.0).is_err());
    }

    #[test]
    fn test_shape_checked_arithmetic() {
        let a = one_to(3);
        let b = one_to(4);
        assert!(matches!(
            a.add(&b),
            Err(UnderwritingError::ShapeMismatch { expected: 3, actual: 4 })
        ));
        let c = a.add(&a).unwrap().subtract(1.0).unwrap();
        assert_eq!(c.values(), &[1.0, 3.0, 5.0]);
        assert_eq!(a.multiply(2.0).unwrap().values(), &[2.0, 4.0, 6.0]);
        assert_eq!(a.divide(&a).unwrap().values(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sum_range_bounds() {
        let s = one_to(5);
        assert_eq!(s.sum_range(1, 3).unwrap(), 5.0);
        assert_eq!(s.sum_range(2, 2).unwrap(), 0.0);
        assert!(s.sum_range(3, 2).is_err());
        assert!(s.sum_range(0, 6).is_err());
    }

    #[test]
    fn test_cumulative_and_annual_totals() {
        let s = one_to(14);
        assert_eq!(s.cumulative().unwrap().get(13).unwrap(), 105.0);
        assert_eq!(s.annual_totals(), vec![78.0, 27.0]);
    }

    #[test]
    fn test_discount_end_of_month() {
        let s = Series::constant(1, 101.0).unwrap();
        let pv = s.discount(0.12).unwrap();
        assert!((pv - 100.0).abs() < 1e-9);
        assert_eq!(Series::zeros(12).discount(0.08).unwrap(), 0.0);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Series = serde_json::from_str("[1.0, 2.0]").unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(serde_json::to_string(&ok).unwrap(), "[1.0,2.0]");
    }
}
