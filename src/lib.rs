//! Linear-method wavefunction optimizer for quantum Monte Carlo.
//!
//! The optimizer repeatedly samples the trial wavefunction, builds the
//! linear-method matrix pair, searches a diagonal stabilizer shift by
//! re-solving the generalized eigenproblem, and commits the best update.
//! Sampling and cost evaluation are pluggable; a VMC sampler and a
//! correlated-sampling cost function for H₂ are included.

pub mod error;
pub mod linalg;
pub mod optimize;
pub mod wavefunction;
pub mod correlation;
pub mod systems;
pub mod sampling;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{OptimizeError, Result, Stage};
pub use linalg::{CsfMode, EigenConfig, EigenSolution, GeneralizedEigenSolver, GevMatrixPair};
pub use optimize::{
    CostFunctionEvaluator, LinearOptimizer, LogMetrics, MetricsSink, NonlinearRescaler, NullMetrics,
    OptimizationReport, OptimizerConfig, ParameterKind, ParameterVector, RecordingMetrics, SampleEstimate,
    SampleProvider, SampleSet, StabilizationController, StabilizerConfig, StabilizerMethod,
};
pub use wavefunction::{MultiWfn, OptimizableWfn, SingleWfn, Slater1s};
pub use correlation::PairJastrow;
pub use systems::H2MoleculeCI;
pub use sampling::{CorrelatedSamplingCost, CostConfig, EnergyCalculator, VmcConfig, VmcSampler};
pub use io::{read_config, RunConfig};
