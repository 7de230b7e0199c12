//! Optimizable parameter vectors and their linear/nonlinear layout.

use std::ops::Range;
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result};

/// Kind of a variational parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Linear (CSF-like) coefficient.
    Linear,
    /// Nonlinear parameter, e.g. a Jastrow exponent.
    Nonlinear,
}

/// Half-open index range `[first, last)` of the nonlinear parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NonlinearRange {
    pub first: usize,
    pub last: usize,
}

impl NonlinearRange {
    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    pub fn len(&self) -> usize {
        self.last - self.first
    }

    pub fn contains(&self, i: usize) -> bool {
        i >= self.first && i < self.last
    }

    pub fn as_range(&self) -> Range<usize> {
        self.first..self.last
    }

    /// Locate the nonlinear block. Kinds must already be contiguous.
    pub fn from_kinds(kinds: &[ParameterKind]) -> Self {
        let n = kinds.len();
        match kinds.first() {
            None => NonlinearRange { first: 0, last: 0 },
            Some(ParameterKind::Linear) => {
                let first = kinds
                    .iter()
                    .rposition(|k| *k == ParameterKind::Linear)
                    .map_or(0, |i| i + 1);
                NonlinearRange { first, last: n }
            }
            Some(ParameterKind::Nonlinear) => {
                let last = kinds
                    .iter()
                    .position(|k| *k == ParameterKind::Linear)
                    .unwrap_or(n);
                NonlinearRange { first: 0, last }
            }
        }
    }
}

/// Ordered parameter values tagged with their kinds.
///
/// The linear and nonlinear parameters each form one contiguous block and
/// the layout is fixed once constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterVector {
    values: Vec<f64>,
    kinds: Vec<ParameterKind>,
    nonlinear: NonlinearRange,
}

impl ParameterVector {
    pub fn new(values: Vec<f64>, kinds: Vec<ParameterKind>) -> Result<Self> {
        if values.len() != kinds.len() {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "{} parameter values but {} parameter kinds",
                values.len(),
                kinds.len()
            )));
        }
        let switches = kinds.windows(2).filter(|w| w[0] != w[1]).count();
        if switches > 1 {
            return Err(OptimizeError::InvalidConfiguration(
                "linear and nonlinear parameters must each form one contiguous block".into(),
            ));
        }
        let nonlinear = NonlinearRange::from_kinds(&kinds);
        Ok(Self { values, kinds, nonlinear })
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

    pub fn kinds(&self) -> &[ParameterKind] {
        &self.kinds
    }

    pub fn nonlinear_range(&self) -> NonlinearRange {
        self.nonlinear
    }

    /// Indices of the linear parameters, in order.
    pub fn linear_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|i| !self.nonlinear.contains(*i)).collect()
    }

    /// Replace the values, keeping the layout. Returns `max |new - old|`.
    pub fn set_values(&mut self, values: &[f64]) -> Result<f64> {
        if values.len() != self.values.len() {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "expected {} parameters, got {}",
                self.values.len(),
                values.len()
            )));
        }
        let change = self.max_change(values);
        self.values.copy_from_slice(values);
        Ok(change)
    }

    pub fn max_change(&self, other: &[f64]) -> f64 {
        self.values
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParameterKind::{Linear, Nonlinear};

    #[test]
    fn test_range_linear_first() {
        let r = NonlinearRange::from_kinds(&[Linear, Linear, Nonlinear, Nonlinear, Nonlinear]);
        assert_eq!(r, NonlinearRange { first: 2, last: 5 });
    }

    #[test]
    fn test_range_nonlinear_first() {
        let r = NonlinearRange::from_kinds(&[Nonlinear, Nonlinear, Linear]);
        assert_eq!(r, NonlinearRange { first: 0, last: 2 });
    }

    #[test]
    fn test_range_all_linear_is_empty() {
        let r = NonlinearRange::from_kinds(&[Linear, Linear]);
        assert!(r.is_empty());
        let r = NonlinearRange::from_kinds(&[Nonlinear, Nonlinear]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_non_contiguous_layout_rejected() {
        let err = ParameterVector::new(vec![0.0; 3], vec![Linear, Nonlinear, Linear]).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidConfiguration(_)));
        let err = ParameterVector::new(vec![0.0; 2], vec![Linear]).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_set_values_reports_change() {
        let mut p = ParameterVector::new(vec![1.0, 2.0], vec![Linear, Nonlinear]).unwrap();
        let change = p.set_values(&[1.5, 1.9]).unwrap();
        assert!((change - 0.5).abs() < 1e-12);
        assert_eq!(p.values(), &[1.5, 1.9]);
        assert_eq!(p.linear_indices(), vec![0]);
    }
}
