//! Slater 1s orbital.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use super::traits::SingleWfn;

/// `φ(r) = exp(-α |r - center|)`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Slater1s {
    /// Orbital exponent
    pub alpha: f64,
    pub center: Vector3<f64>,
}

impl Slater1s {
    pub fn new(center: Vector3<f64>, alpha: f64) -> Self {
        Self { alpha, center }
    }

    /// Distance of `r` from the nucleus.
    pub fn distance(&self, r: &Vector3<f64>) -> f64 {
        (r - self.center).norm()
    }
}

impl SingleWfn for Slater1s {
    fn evaluate(&self, r: &Vector3<f64>) -> f64 {
        (-self.alpha * self.distance(r)).exp()
    }

    fn derivative(&self, r: &Vector3<f64>) -> Vector3<f64> {
        let dr = r - self.center;
        let s = dr.norm();
        if s == 0.0 {
            return Vector3::zeros();
        }
        dr * (-self.alpha / s * (-self.alpha * s).exp())
    }

    fn laplacian(&self, r: &Vector3<f64>) -> f64 {
        let s = self.distance(r);
        if s == 0.0 {
            return f64::NEG_INFINITY;
        }
        (self.alpha * self.alpha - 2.0 * self.alpha / s) * (-self.alpha * s).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_slater_gradient_and_laplacian() {
        let orbital = Slater1s::new(Vector3::new(0.3, -0.2, 0.1), 1.2);
        let r = Vector3::new(0.9, 0.4, -0.5);
        let h = 1e-5;
        let grad = orbital.derivative(&r);
        let mut lap = 0.0;
        for axis in 0..3 {
            let mut fwd = r;
            let mut bwd = r;
            fwd[axis] += h;
            bwd[axis] -= h;
            let num = (orbital.evaluate(&fwd) - orbital.evaluate(&bwd)) / (2.0 * h);
            assert_relative_eq!(grad[axis], num, epsilon = 1e-8);
            lap += (orbital.evaluate(&fwd) - 2.0 * orbital.evaluate(&r) + orbital.evaluate(&bwd)) / (h * h);
        }
        assert_relative_eq!(orbital.laplacian(&r), lap, epsilon = 1e-4);
    }
}
