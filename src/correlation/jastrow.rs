//! Electron-electron Jastrow factor for two-electron systems.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Padé pair factor `J(r₁₂) = exp(u)`, `u = -F / (2(1 + r₁₂/F))`.
///
/// `du/dr` is 1/2 at coalescence for any `F`, so the antiparallel-spin cusp
/// holds while `F` sets the correlation range.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PairJastrow {
    /// Correlation length F
    pub cusp_param: f64,
}

impl PairJastrow {
    pub fn new(cusp_param: f64) -> Self {
        Self { cusp_param }
    }

    fn ratio(&self, r12: f64) -> f64 {
        1.0 + r12 / self.cusp_param
    }

    /// `u(r₁₂)`
    pub fn exponent(&self, r: &[Vector3<f64>]) -> f64 {
        let r12 = (r[0] - r[1]).norm();
        -self.cusp_param / (2.0 * self.ratio(r12))
    }

    /// `∂u/∂F`, the log-derivative of `J` with respect to its parameter.
    pub fn param_derivative(&self, r: &[Vector3<f64>]) -> f64 {
        let f = self.cusp_param;
        let r12 = (r[0] - r[1]).norm();
        -(f * f + 2.0 * f * r12) / (2.0 * (f + r12).powi(2))
    }

    /// `J = exp(u)`
    pub fn evaluate(&self, r: &[Vector3<f64>]) -> f64 {
        self.exponent(r).exp()
    }

    pub fn derivative(&self, r: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let r12 = r[0] - r[1];
        let s = r12.norm();
        let grad = self.evaluate(r) / (2.0 * self.ratio(s).powi(2) * s) * r12;
        vec![grad, -grad]
    }

    pub fn laplacian(&self, r: &[Vector3<f64>]) -> Vec<f64> {
        let s = (r[0] - r[1]).norm();
        let f = self.ratio(s);
        // J (u'² + u'' + 2u'/r) with u' = 1/(2f²), u'' = -1/(F f³)
        let lap = (0.25 / f.powi(4) + 1.0 / (s * f.powi(3))) * self.evaluate(r);
        vec![lap, lap]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use rand_distr::{Distribution, StandardNormal};
    use crate::wavefunction::MultiWfn;

    /// The bare factor as a two-electron function, for the numerical derivatives.
    struct Factor(PairJastrow);

    impl MultiWfn for Factor {
        fn initialize(&self, rng: &mut dyn RngCore) -> Vec<Vector3<f64>> {
            (0..2)
                .map(|_| Vector3::from_fn(|_, _| StandardNormal.sample(&mut *rng)))
                .collect()
        }

        fn evaluate(&self, r: &[Vector3<f64>]) -> f64 {
            self.0.evaluate(r)
        }

        fn derivative(&self, r: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
            self.0.derivative(r)
        }

        fn laplacian(&self, r: &[Vector3<f64>]) -> Vec<f64> {
            self.0.laplacian(r)
        }
    }

    fn pair() -> Vec<Vector3<f64>> {
        vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)]
    }

    #[test]
    fn test_jastrow_value() {
        let jastrow = PairJastrow::new(1.0);
        assert_relative_eq!(jastrow.evaluate(&pair()), 0.7788007831, epsilon = 1e-8);
    }

    #[test]
    fn test_jastrow_gradient() {
        let jastrow = PairJastrow::new(1.0);
        let grad = jastrow.derivative(&pair());
        assert_relative_eq!(grad[0].x, -0.09735009789, epsilon = 1e-6);
        assert_relative_eq!(grad[1].x, 0.09735009789, epsilon = 1e-6);
        assert_relative_eq!((grad[0] + grad[1]).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_jastrow_matches_finite_differences() {
        let jastrow = Factor(PairJastrow::new(2.5));
        let mut rng = StdRng::seed_from_u64(7);
        let r = jastrow.initialize(&mut rng);
        let h = 1e-5;

        let grad = jastrow.derivative(&r);
        let num_grad = jastrow.numerical_derivative(&r, h);
        for i in 0..2 {
            assert_relative_eq!(grad[i], num_grad[i], epsilon = 1e-6);
        }
        let lap = jastrow.laplacian(&r);
        let num_lap = jastrow.numerical_laplacian(&r, h);
        for i in 0..2 {
            assert_relative_eq!(lap[i], num_lap[i], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_param_derivative() {
        let r = pair();
        let h = 1e-6;
        let f = 1.3;
        let num = (PairJastrow::new(f + h).exponent(&r) - PairJastrow::new(f - h).exponent(&r)) / (2.0 * h);
        assert_relative_eq!(PairJastrow::new(f).param_derivative(&r), num, epsilon = 1e-8);
    }
}
