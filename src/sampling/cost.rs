//! Correlated-sampling cost function over a fixed ensemble.
//!
//! Samples drawn from `|Ψ_ref|²` are reweighted by `|Ψ(p)/Ψ_ref|²` to
//! estimate energy and variance at other parameters, and to assemble the
//! linear-method matrices
//!
//! ```text
//! S_00 = 1                     S_ij = <Ō_i Ō_j>
//! H_00 = <E_L>                 H_i0 = <Ō_i E_L>
//! H_0j = <Ō_j E_L> + <∂_j E_L> H_ij = <Ō_i Ō_j E_L> + <Ō_i ∂_j E_L>
//! ```
//!
//! with `Ō_i = O_i - <O_i>` and `∂_j E_L` a central difference in `p_j`.

use log::debug;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result};
use crate::linalg::GevMatrixPair;
use crate::optimize::{CostFunctionEvaluator, ParameterKind, SampleSet};
use crate::wavefunction::OptimizableWfn;
use super::traits::EnergyCalculator;
use super::vmc::Configuration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub energy_weight: f64,
    pub variance_weight: f64,
    /// Cost is NaN once `(Σw)² / (n Σw²)` drops below this.
    pub min_effective_fraction: f64,
    /// Parameter step for `∂E_L/∂p`.
    pub fd_step: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            energy_weight: 1.0,
            variance_weight: 0.0,
            min_effective_fraction: 0.1,
            fd_step: 1e-4,
        }
    }
}

impl CostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.energy_weight < 0.0 || self.variance_weight < 0.0 || self.energy_weight + self.variance_weight == 0.0 {
            return Err(OptimizeError::InvalidConfiguration(
                "cost weights must be non-negative and not both zero".into(),
            ));
        }
        if !(self.min_effective_fraction > 0.0 && self.min_effective_fraction <= 1.0) {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "min_effective_fraction must lie in (0, 1], got {}",
                self.min_effective_fraction
            )));
        }
        if !(self.fd_step > 0.0) {
            return Err(OptimizeError::InvalidConfiguration(format!("fd_step must be positive, got {}", self.fd_step)));
        }
        Ok(())
    }
}

/// Reweighted estimates at one parameter set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reweighted {
    pub energy: f64,
    pub variance: f64,
    /// Effective fraction of the samples carrying the weight.
    pub effective_fraction: f64,
}

pub struct CorrelatedSamplingCost<T: OptimizableWfn + EnergyCalculator + Clone> {
    wavefunction: T,
    config: CostConfig,
    samples: Vec<Configuration>,
    reference: Vec<f64>,
}

impl<T: OptimizableWfn + EnergyCalculator + Clone> CorrelatedSamplingCost<T> {
    pub fn new(wavefunction: T, config: CostConfig) -> Self {
        Self { wavefunction, config, samples: Vec::new(), reference: Vec::new() }
    }

    pub fn wavefunction(&self) -> &T {
        &self.wavefunction
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn with_params(&self, params: &[f64]) -> T {
        let mut wfn = self.wavefunction.clone();
        wfn.set_params(params);
        wfn
    }

    /// `|Ψ(p)/Ψ_ref|²` for every sample.
    fn weights(&self, wfn: &T) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.reference.iter())
            .map(|(r, psi_ref)| (wfn.evaluate(r) / psi_ref).powi(2))
            .collect()
    }

    pub fn reweighted(&self, params: &[f64]) -> Option<Reweighted> {
        if self.samples.is_empty() || params.len() != self.wavefunction.num_params() {
            return None;
        }
        let wfn = self.with_params(params);
        let weights = self.weights(&wfn);
        let sum_w: f64 = weights.iter().sum();
        let sum_w2: f64 = weights.iter().map(|w| w * w).sum();
        if !(sum_w > 0.0) || !sum_w.is_finite() || !sum_w2.is_finite() {
            return None;
        }
        let effective_fraction = sum_w * sum_w / (self.samples.len() as f64 * sum_w2);

        let energies: Vec<f64> = self.samples.iter().map(|r| wfn.local_energy(r)).collect();
        let energy = weights.iter().zip(&energies).map(|(w, e)| w * e).sum::<f64>() / sum_w;
        let variance = weights
            .iter()
            .zip(&energies)
            .map(|(w, e)| w * (e - energy).powi(2))
            .sum::<f64>()
            / sum_w;
        Some(Reweighted { energy, variance, effective_fraction })
    }
}

impl<T: OptimizableWfn + EnergyCalculator + Clone> CostFunctionEvaluator for CorrelatedSamplingCost<T> {
    type Configuration = Configuration;

    fn load_samples(&mut self, samples: &SampleSet<Configuration>) -> Result<()> {
        let reference: Vec<f64> = samples
            .configurations
            .iter()
            .map(|r| self.wavefunction.evaluate(r))
            .collect();
        if reference.iter().any(|psi| *psi == 0.0 || !psi.is_finite()) {
            return Err(OptimizeError::Sampling(format!(
                "sample set {} has configurations with vanishing wavefunction",
                samples.root_name
            )));
        }
        self.samples = samples.configurations.clone();
        self.reference = reference;
        debug!("loaded {} samples from {}", self.samples.len(), samples.root_name);
        Ok(())
    }

    fn parameter_kinds(&self) -> Vec<ParameterKind> {
        self.wavefunction.parameter_kinds()
    }

    fn parameters(&self) -> Vec<f64> {
        self.wavefunction.get_params()
    }

    fn build_matrices(&mut self, params: &[f64]) -> Result<GevMatrixPair> {
        let n = self.wavefunction.num_params();
        if params.len() != n {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "expected {} parameters, got {}",
                n,
                params.len()
            )));
        }
        if self.samples.is_empty() {
            return Err(OptimizeError::Sampling("no samples loaded".into()));
        }

        let wfn = self.with_params(params);
        let h = self.config.fd_step;
        let shifted: Vec<(T, T)> = (0..n)
            .map(|j| {
                let mut fwd = params.to_vec();
                let mut bwd = params.to_vec();
                fwd[j] += h;
                bwd[j] -= h;
                (self.with_params(&fwd), self.with_params(&bwd))
            })
            .collect();

        let weights = self.weights(&wfn);
        let sum_w: f64 = weights.iter().sum();
        if !(sum_w > 0.0) || !sum_w.is_finite() {
            return Err(OptimizeError::Sampling("sample weights vanish at these parameters".into()));
        }

        let mut log_derivs = Vec::with_capacity(self.samples.len());
        let mut energies = Vec::with_capacity(self.samples.len());
        let mut energy_derivs = Vec::with_capacity(self.samples.len());
        for r in &self.samples {
            log_derivs.push(wfn.log_derivatives(r));
            energies.push(wfn.local_energy(r));
            energy_derivs.push(
                shifted
                    .iter()
                    .map(|(fwd, bwd)| (fwd.local_energy(r) - bwd.local_energy(r)) / (2.0 * h))
                    .collect::<Vec<f64>>(),
            );
        }

        let mean = |f: &dyn Fn(usize) -> f64| -> f64 {
            weights.iter().enumerate().map(|(k, w)| w * f(k)).sum::<f64>() / sum_w
        };
        let o_mean: Vec<f64> = (0..n).map(|i| mean(&|k| log_derivs[k][i])).collect();
        let centered = |k: usize, i: usize| log_derivs[k][i] - o_mean[i];

        let mut left = DMatrix::zeros(n + 1, n + 1);
        let mut right = DMatrix::zeros(n + 1, n + 1);
        right[(0, 0)] = 1.0;
        left[(0, 0)] = mean(&|k| energies[k]);
        for i in 0..n {
            let oe = mean(&|k| centered(k, i) * energies[k]);
            left[(i + 1, 0)] = oe;
            left[(0, i + 1)] = oe + mean(&|k| energy_derivs[k][i]);
            for j in 0..n {
                right[(i + 1, j + 1)] = mean(&|k| centered(k, i) * centered(k, j));
                left[(i + 1, j + 1)] = mean(&|k| {
                    centered(k, i) * (centered(k, j) * energies[k] + energy_derivs[k][j])
                });
            }
        }

        if left.iter().chain(right.iter()).any(|x| !x.is_finite()) {
            return Err(OptimizeError::Sampling("non-finite entries in the linear-method matrices".into()));
        }
        GevMatrixPair::new(left, right)
    }

    fn evaluate_cost(&mut self, params: &[f64]) -> f64 {
        match self.reweighted(params) {
            Some(est) if est.effective_fraction >= self.config.min_effective_fraction => {
                let cost = self.config.energy_weight * est.energy + self.config.variance_weight * est.variance;
                if cost.is_finite() { cost } else { f64::NAN }
            }
            Some(est) => {
                debug!("effective sample fraction {:.3} too small", est.effective_fraction);
                f64::NAN
            }
            None => f64::NAN,
        }
    }

    fn commit_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.wavefunction.num_params() || params.iter().any(|p| !p.is_finite()) {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "cannot commit parameters {:?}",
                params
            )));
        }
        self.wavefunction.set_params(params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::SampleProvider;
    use crate::sampling::{VmcConfig, VmcSampler};
    use crate::systems::H2MoleculeCI;
    use approx::assert_relative_eq;

    fn loaded() -> (CorrelatedSamplingCost<H2MoleculeCI>, Vec<f64>) {
        let wfn = H2MoleculeCI::new(1.4, 1.0, 1.0, 0.2);
        let config = VmcConfig { n_walkers: 10, warmup_steps: 200, adaptation_interval: 20, ..VmcConfig::default() };
        let mut sampler = VmcSampler::new(wfn.clone(), config);
        let params = wfn.get_params();
        let set = sampler.generate(&params, 1000).unwrap();
        let mut cost = CorrelatedSamplingCost::new(wfn, CostConfig::default());
        cost.load_samples(&set).unwrap();
        (cost, params)
    }

    #[test]
    fn test_reference_weights_are_uniform() {
        let (cost, params) = loaded();
        let est = cost.reweighted(&params).unwrap();
        assert_relative_eq!(est.effective_fraction, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_structure() {
        let (mut cost, params) = loaded();
        let pair = cost.build_matrices(&params).unwrap();
        assert_eq!(pair.dim(), 4);
        assert_eq!(pair.right[(0, 0)], 1.0);
        for i in 1..4 {
            assert_eq!(pair.right[(0, i)], 0.0);
            assert!(pair.right[(i, i)] >= 0.0);
            for j in 1..4 {
                assert_relative_eq!(pair.right[(i, j)], pair.right[(j, i)], epsilon = 1e-12);
            }
        }
        let energy = cost.evaluate_cost(&params);
        assert_relative_eq!(pair.left[(0, 0)], energy, epsilon = 1e-10);
    }

    #[test]
    fn test_far_parameters_give_nan() {
        let (mut cost, mut params) = loaded();
        params[1] = 4.0;
        assert!(cost.evaluate_cost(&params).is_nan());
    }

    #[test]
    fn test_commit_updates_wavefunction() {
        let (mut cost, _) = loaded();
        cost.commit_parameters(&[0.5, 1.1, 1.3]).unwrap();
        assert_eq!(cost.parameters(), vec![0.5, 1.1, 1.3]);
        assert!(cost.commit_parameters(&[0.5]).is_err());
        assert!(cost.commit_parameters(&[f64::NAN, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(CostConfig::default().validate().is_ok());
        let bad = CostConfig { energy_weight: 0.0, variance_weight: 0.0, ..CostConfig::default() };
        assert!(bad.validate().is_err());
    }
}
