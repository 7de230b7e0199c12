use std::time::Duration;
use crate::error::{Result, Stage};
use crate::linalg::GevMatrixPair;
use super::driver::IterationReport;
use super::params::ParameterKind;
use super::stabilize::StabilizerTrial;

/// A fixed ensemble of configurations addressed by a root name.
#[derive(Clone, Debug)]
pub struct SampleSet<C> {
    /// Name of the ensemble, `<root>.s<NNN>`.
    pub root_name: String,
    pub configurations: Vec<C>,
}

impl<C> SampleSet<C> {
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

/// Sampler estimates of the last generated ensemble.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SampleEstimate {
    pub energy: f64,
    pub weight: f64,
    pub variance: f64,
}

/// Produces Monte Carlo ensembles for a given parameter set.
pub trait SampleProvider {
    type Configuration: Clone;

    /// Sample at `params` until at least `min_samples` configurations exist.
    fn generate(&mut self, params: &[f64], min_samples: usize) -> Result<SampleSet<Self::Configuration>>;

    /// Energy, total weight and variance of the last ensemble.
    fn energy_and_weight(&self) -> SampleEstimate;
}

/// Cost function and linear-method matrices over a fixed sample set.
pub trait CostFunctionEvaluator {
    type Configuration: Clone;

    fn load_samples(&mut self, samples: &SampleSet<Self::Configuration>) -> Result<()>;

    fn parameter_kinds(&self) -> Vec<ParameterKind>;

    /// Parameters currently held by the wavefunction.
    fn parameters(&self) -> Vec<f64>;

    /// Build the `(N+1)×(N+1)` pair at `params`.
    fn build_matrices(&mut self, params: &[f64]) -> Result<GevMatrixPair>;

    /// Cost of `params` on the loaded samples; NaN when it cannot be trusted.
    fn evaluate_cost(&mut self, params: &[f64]) -> f64;

    /// Write `params` back into the wavefunction.
    fn commit_parameters(&mut self, params: &[f64]) -> Result<()>;
}

/// Receives timings and reports from the driver.
pub trait MetricsSink {
    fn stage_finished(&mut self, stage: Stage, elapsed: Duration);

    fn trial_recorded(&mut self, _iteration: usize, _trial: &StabilizerTrial) {}

    fn iteration_finished(&mut self, _report: &IterationReport) {}
}
