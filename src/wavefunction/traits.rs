//! Wave function traits.
//!
//! `SingleWfn` covers one-electron orbitals, `MultiWfn` many-electron trial
//! functions and `OptimizableWfn` the ones exposing variational parameters
//! to the optimizer.

use nalgebra::Vector3;
use rand::RngCore;
use crate::optimize::ParameterKind;

/// Single-center wavefunction (e.g. an atomic orbital).
pub trait SingleWfn {
    fn evaluate(&self, r: &Vector3<f64>) -> f64;

    fn derivative(&self, r: &Vector3<f64>) -> Vector3<f64>;

    fn laplacian(&self, r: &Vector3<f64>) -> f64;
}

/// Multi-electron wavefunction.
pub trait MultiWfn {
    /// Random starting positions drawn from `rng`.
    fn initialize(&self, rng: &mut dyn RngCore) -> Vec<Vector3<f64>>;

    fn evaluate(&self, r: &[Vector3<f64>]) -> f64;

    /// Gradient with respect to each electron.
    fn derivative(&self, r: &[Vector3<f64>]) -> Vec<Vector3<f64>>;

    /// Laplacian with respect to each electron.
    fn laplacian(&self, r: &[Vector3<f64>]) -> Vec<f64>;

    /// Central-difference gradients.
    fn numerical_derivative(&self, r: &[Vector3<f64>], h: f64) -> Vec<Vector3<f64>> {
        let mut grad = vec![Vector3::zeros(); r.len()];
        for i in 0..r.len() {
            for axis in 0..3 {
                let mut r_fwd = r.to_vec();
                let mut r_bwd = r.to_vec();
                r_fwd[i][axis] += h;
                r_bwd[i][axis] -= h;
                grad[i][axis] = (self.evaluate(&r_fwd) - self.evaluate(&r_bwd)) / (2.0 * h);
            }
        }
        grad
    }

    /// Central-difference Laplacians.
    fn numerical_laplacian(&self, r: &[Vector3<f64>], h: f64) -> Vec<f64> {
        let psi = self.evaluate(r);
        let mut laplacian = vec![0.0; r.len()];
        for i in 0..r.len() {
            for axis in 0..3 {
                let mut r_fwd = r.to_vec();
                let mut r_bwd = r.to_vec();
                r_fwd[i][axis] += h;
                r_bwd[i][axis] -= h;
                laplacian[i] += (self.evaluate(&r_fwd) - 2.0 * psi + self.evaluate(&r_bwd)) / (h * h);
            }
        }
        laplacian
    }
}

/// Wavefunction with variational parameters.
///
/// The optimizer works with the log-derivatives `O_i = ∂ ln|Ψ(R)| / ∂p_i`
/// and with the layout returned by `parameter_kinds`.
pub trait OptimizableWfn: MultiWfn {
    fn num_params(&self) -> usize;

    fn get_params(&self) -> Vec<f64>;

    fn set_params(&mut self, params: &[f64]);

    /// `O_i = ∂ ln|Ψ(R)| / ∂p_i` for all parameters.
    fn log_derivatives(&self, r: &[Vector3<f64>]) -> Vec<f64>;

    /// Kind of each parameter; nonlinear unless overridden.
    fn parameter_kinds(&self) -> Vec<ParameterKind> {
        vec![ParameterKind::Nonlinear; self.num_params()]
    }

    /// Central-difference log-derivative with respect to parameter `k`.
    fn numerical_log_derivative(&self, r: &[Vector3<f64>], k: usize, h: f64) -> f64
    where
        Self: Clone,
    {
        let params = self.get_params();
        let mut shifted = self.clone();
        let mut p = params.clone();
        p[k] += h;
        shifted.set_params(&p);
        let fwd = shifted.evaluate(r).abs().ln();
        p[k] = params[k] - h;
        shifted.set_params(&p);
        let bwd = shifted.evaluate(r).abs().ln();
        (fwd - bwd) / (2.0 * h)
    }
}
