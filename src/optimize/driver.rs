//! Outer loop of the linear optimizer.
//!
//! Each iteration samples (or reuses) an ensemble, builds the matrix pair at
//! the current parameters, runs the stabilizer search and commits the chosen
//! update back through the cost evaluator. Any failure aborts the run with
//! the failing stage attached to the error.

use std::time::Instant;
use log::info;
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result, Stage};
use crate::linalg::{CsfMode, EigenConfig, GeneralizedEigenSolver};
use super::metrics::NullMetrics;
use super::params::ParameterVector;
use super::rescale::NonlinearRescaler;
use super::stabilize::{StabilizationController, StabilizerConfig, StabilizerPhase};
use super::traits::{CostFunctionEvaluator, MetricsSink, SampleProvider, SampleSet};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Stop once no parameter moves by more than this in one iteration.
    pub param_tol: f64,
    /// Solve `B⁻¹A` with the single-matrix solver instead of the pair.
    pub apply_inverse: bool,
    /// `freeze`, `rescale` or `stability`; no split solve when absent.
    pub csf_option: Option<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            param_tol: 1e-4,
            apply_inverse: true,
            csf_option: None,
        }
    }
}

impl OptimizerConfig {
    pub fn csf_mode(&self) -> Result<Option<CsfMode>> {
        self.csf_option.as_deref().map(|s| s.parse::<CsfMode>()).transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(OptimizeError::InvalidConfiguration("max_iterations must be at least 1".into()));
        }
        if !(self.param_tol > 0.0) {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "param_tol must be positive, got {}",
                self.param_tol
            )));
        }
        self.csf_mode().map(|_| ())
    }
}

/// When to regenerate the sample ensemble.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplePolicy {
    pub min_samples: usize,
    /// Keep the previous ensemble while it holds at least `min_samples`.
    pub reuse_samples: bool,
}

impl Default for SamplePolicy {
    fn default() -> Self {
        Self { min_samples: 1000, reuse_samples: false }
    }
}

/// Mutable state carried across outer iterations.
#[derive(Clone, Debug)]
pub struct OptimizationState {
    pub parameters: ParameterVector,
    /// Completed outer iterations.
    pub iteration: usize,
    pub sample_sets: usize,
}

/// Diagnostics of one outer iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// Root name of the ensemble the iteration worked on.
    pub samples: String,
    pub energy: f64,
    pub weight: f64,
    pub variance: f64,
    /// Cost of the parameters the iteration started from.
    pub start_cost: f64,
    /// Cost of the committed parameters.
    pub cost: f64,
    pub shift: f64,
    pub eigenvalue: f64,
    pub max_change: f64,
    /// The fitted shift was committed rather than the best probed one.
    pub fitted: bool,
    pub trials: usize,
}

#[derive(Clone, Debug)]
pub struct OptimizationReport {
    pub parameters: Vec<f64>,
    pub history: Vec<IterationReport>,
    pub converged: bool,
}

impl OptimizationReport {
    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn final_cost(&self) -> Option<f64> {
        self.history.last().map(|r| r.cost)
    }
}

/// Linear-method optimizer driving a sampler and a cost evaluator.
pub struct LinearOptimizer<P, C, M = NullMetrics>
where
    P: SampleProvider,
    C: CostFunctionEvaluator<Configuration = P::Configuration>,
    M: MetricsSink,
{
    sampler: P,
    cost: C,
    metrics: M,
    config: OptimizerConfig,
    stabilizer: StabilizerConfig,
    solver: GeneralizedEigenSolver,
    policy: SamplePolicy,
    state: OptimizationState,
    samples: Option<SampleSet<P::Configuration>>,
}

impl<P, C> LinearOptimizer<P, C, NullMetrics>
where
    P: SampleProvider,
    C: CostFunctionEvaluator<Configuration = P::Configuration>,
{
    /// Take the starting parameters and their layout from `cost`.
    pub fn new(sampler: P, cost: C) -> Result<Self> {
        let parameters = ParameterVector::new(cost.parameters(), cost.parameter_kinds())?;
        Ok(Self {
            sampler,
            cost,
            metrics: NullMetrics,
            config: OptimizerConfig::default(),
            stabilizer: StabilizerConfig::default(),
            solver: GeneralizedEigenSolver::default(),
            policy: SamplePolicy::default(),
            state: OptimizationState { parameters, iteration: 0, sample_sets: 0 },
            samples: None,
        })
    }
}

impl<P, C, M> LinearOptimizer<P, C, M>
where
    P: SampleProvider,
    C: CostFunctionEvaluator<Configuration = P::Configuration>,
    M: MetricsSink,
{
    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_stabilizer(mut self, stabilizer: StabilizerConfig) -> Self {
        self.stabilizer = stabilizer;
        self
    }

    pub fn with_eigen(mut self, eigen: EigenConfig) -> Self {
        self.solver = GeneralizedEigenSolver::new(eigen);
        self
    }

    pub fn with_sample_policy(mut self, policy: SamplePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics<N: MetricsSink>(self, metrics: N) -> LinearOptimizer<P, C, N> {
        LinearOptimizer {
            sampler: self.sampler,
            cost: self.cost,
            metrics,
            config: self.config,
            stabilizer: self.stabilizer,
            solver: self.solver,
            policy: self.policy,
            state: self.state,
            samples: self.samples,
        }
    }

    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    pub fn sampler(&self) -> &P {
        &self.sampler
    }

    pub fn cost(&self) -> &C {
        &self.cost
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn into_parts(self) -> (P, C, M) {
        (self.sampler, self.cost, self.metrics)
    }

    /// Run outer iterations until the parameters stop moving or the budget is spent.
    pub fn run(&mut self) -> Result<OptimizationReport> {
        self.config.validate()?;
        self.stabilizer.validate()?;
        let csf_mode = self.config.csf_mode()?;

        let mut history = Vec::with_capacity(self.config.max_iterations);
        let mut converged = false;
        for _ in 0..self.config.max_iterations {
            let report = self.iterate(csf_mode)?;
            converged = report.max_change < self.config.param_tol;
            history.push(report);
            if converged {
                info!("converged after {} iterations", history.len());
                break;
            }
        }
        if !converged {
            info!("iteration budget of {} spent without convergence", self.config.max_iterations);
        }

        Ok(OptimizationReport {
            parameters: self.state.parameters.values().to_vec(),
            history,
            converged,
        })
    }

    /// One outer iteration: sample, build, stabilize, commit.
    pub fn iterate(&mut self, csf_mode: Option<CsfMode>) -> Result<IterationReport> {
        let iteration = self.state.iteration + 1;

        let start = Instant::now();
        self.ensure_samples().map_err(|e| e.in_stage(Stage::GenerateSamples))?;
        let estimate = self.sampler.energy_and_weight();
        self.metrics.stage_finished(Stage::GenerateSamples, start.elapsed());

        let start = Instant::now();
        let current = self.state.parameters.values().to_vec();
        let pair = self
            .cost
            .build_matrices(&current)
            .map_err(|e| e.in_stage(Stage::BuildMatrices))?;
        if pair.num_params() != current.len() {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "matrix pair of dimension {} does not match {} parameters",
                pair.dim(),
                current.len()
            ))
            .in_stage(Stage::BuildMatrices));
        }
        let start_cost = self.cost.evaluate_cost(&current);
        self.metrics.stage_finished(Stage::BuildMatrices, start.elapsed());

        let start = Instant::now();
        let controller = StabilizationController {
            config: &self.stabilizer,
            solver: &self.solver,
            rescaler: NonlinearRescaler::new(self.state.parameters.nonlinear_range()),
            csf_mode,
            apply_inverse: self.config.apply_inverse,
        };
        let cost = &mut self.cost;
        let update = controller
            .run(&pair, &self.state.parameters, |p| cost.evaluate_cost(p))
            .map_err(|e| match e {
                OptimizeError::StabilizationExhausted { .. } => e.in_stage(Stage::LineMinimization),
                other => other.in_stage(Stage::Eigenvalue),
            })?;
        let searched = start.elapsed();
        self.metrics.stage_finished(Stage::Eigenvalue, update.eigen_time);
        self.metrics
            .stage_finished(Stage::LineMinimization, searched.saturating_sub(update.eigen_time));
        for trial in &update.trials {
            self.metrics.trial_recorded(iteration, trial);
        }

        let start = Instant::now();
        self.cost
            .commit_parameters(&update.parameters)
            .map_err(|e| e.in_stage(Stage::Commit))?;
        let max_change = self
            .state
            .parameters
            .set_values(&update.parameters)
            .map_err(|e| e.in_stage(Stage::Commit))?;
        self.state.iteration = iteration;
        self.metrics.stage_finished(Stage::Commit, start.elapsed());

        let report = IterationReport {
            iteration,
            samples: self.samples.as_ref().map(|s| s.root_name.clone()).unwrap_or_default(),
            energy: estimate.energy,
            weight: estimate.weight,
            variance: estimate.variance,
            start_cost,
            cost: update.cost,
            shift: update.shift,
            eigenvalue: update.eigenvalue,
            max_change,
            fitted: update.phase == StabilizerPhase::Accepted,
            trials: update.trials.len(),
        };
        self.metrics.iteration_finished(&report);
        Ok(report)
    }

    fn ensure_samples(&mut self) -> Result<()> {
        let reuse = match &self.samples {
            Some(set) => self.policy.reuse_samples && set.len() >= self.policy.min_samples,
            None => false,
        };
        if reuse {
            info!("reusing sample set {}", self.samples.as_ref().map_or("", |s| s.root_name.as_str()));
            return Ok(());
        }
        let set = self
            .sampler
            .generate(self.state.parameters.values(), self.policy.min_samples)?;
        if set.is_empty() {
            return Err(OptimizeError::Sampling(format!("sample set {} is empty", set.root_name)));
        }
        self.cost.load_samples(&set)?;
        self.state.sample_sets += 1;
        info!("generated sample set {} ({} configurations)", set.root_name, set.len());
        self.samples = Some(set);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_validate() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.csf_mode().unwrap(), None);
    }

    #[test]
    fn test_unknown_csf_option_rejected() {
        let config = OptimizerConfig { csf_option: Some("melt".into()), ..OptimizerConfig::default() };
        assert!(matches!(config.validate(), Err(OptimizeError::InvalidConfiguration(_))));
        let config = OptimizerConfig { csf_option: Some("freeze".into()), ..OptimizerConfig::default() };
        assert_eq!(config.csf_mode().unwrap(), Some(CsfMode::Freeze));
    }

    #[test]
    fn test_bad_tolerance_rejected() {
        let config = OptimizerConfig { param_tol: 0.0, ..OptimizerConfig::default() };
        assert!(config.validate().is_err());
        let config = OptimizerConfig { max_iterations: 0, ..OptimizerConfig::default() };
        assert!(config.validate().is_err());
    }
}
