//! Trust-region damping of the nonlinear part of an update direction.
//!
//! With `D = Σ S(i+1, j+1) dP(i+1) dP(j+1)` over the nonlinear block,
//! the direction is scaled by `1 / (1 - (1-ξ)D / ((1-ξ) + ξ√(1+D)))`.

use nalgebra::DMatrix;
use super::params::NonlinearRange;

/// Mixing parameter ξ of the damping formula.
pub const XI: f64 = 0.5;

#[derive(Copy, Clone, Debug)]
pub struct NonlinearRescaler {
    range: NonlinearRange,
    xi: f64,
}

impl NonlinearRescaler {
    pub fn new(range: NonlinearRange) -> Self {
        Self { range, xi: XI }
    }

    pub fn range(&self) -> NonlinearRange {
        self.range
    }

    /// Scale factor for `direction` (length N+1, anchor at index 0).
    pub fn factor(&self, direction: &[f64], overlap: &DMatrix<f64>) -> f64 {
        if self.range.is_empty() {
            return 1.0;
        }
        let mut d = 0.0;
        for i in self.range.as_range() {
            for j in self.range.as_range() {
                d += overlap[(i + 1, j + 1)] * direction[i + 1] * direction[j + 1];
            }
        }
        let xi = self.xi;
        let rescale = (1.0 - xi) * d / ((1.0 - xi) + xi * (1.0 + d).sqrt());
        1.0 / (1.0 - rescale)
    }

    /// Multiply components 1.. of `direction` by the damping factor; returns it.
    pub fn rescale(&self, direction: &mut [f64], overlap: &DMatrix<f64>) -> f64 {
        let factor = self.factor(direction, overlap);
        for x in direction.iter_mut().skip(1) {
            *x *= factor;
        }
        factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_no_op_without_nonlinear_params() {
        let rescaler = NonlinearRescaler::new(NonlinearRange { first: 2, last: 2 });
        let mut dir = vec![1.0, 0.3, -0.7];
        let before = dir.clone();
        let s = DMatrix::identity(3, 3);
        assert_eq!(rescaler.rescale(&mut dir, &s), 1.0);
        assert_eq!(dir, before);
    }

    #[test]
    fn test_anchor_untouched() {
        let rescaler = NonlinearRescaler::new(NonlinearRange { first: 0, last: 2 });
        let mut dir = vec![1.0, 0.4, -0.2];
        let s = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 2.0, 0.1, 0.0, 0.1, 1.5]);
        let factor = rescaler.rescale(&mut dir, &s);
        assert_eq!(dir[0], 1.0);
        assert_relative_eq!(dir[1], 0.4 * factor);
        assert_relative_eq!(dir[2], -0.2 * factor);
    }

    #[test]
    fn test_factor_matches_formula() {
        // only the nonlinear parameter (index 1) enters D
        let rescaler = NonlinearRescaler::new(NonlinearRange { first: 1, last: 2 });
        let dir = [1.0, 5.0, 0.5];
        let s = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 9.0, 0.0, 0.0, 0.0, 4.0]);
        let d = 4.0 * 0.25;
        let expected = 1.0 / (1.0 - 0.5 * d / (0.5 + 0.5 * (1.0_f64 + d).sqrt()));
        assert_relative_eq!(rescaler.factor(&dir, &s), expected, epsilon = 1e-14);
    }
}
