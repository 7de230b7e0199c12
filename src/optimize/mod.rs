pub mod params;
pub mod rescale;
pub mod stabilize;
pub mod traits;
pub mod metrics;
pub mod driver;

pub use params::{NonlinearRange, ParameterKind, ParameterVector};
pub use rescale::NonlinearRescaler;
pub use stabilize::{fit_stabilizers, FitOutcome, StabilizationController, StabilizedUpdate, StabilizerConfig, StabilizerMethod, StabilizerPhase, StabilizerTrial};
pub use traits::{CostFunctionEvaluator, MetricsSink, SampleEstimate, SampleProvider, SampleSet};
pub use metrics::{LogMetrics, NullMetrics, RecordingMetrics};
pub use driver::{IterationReport, LinearOptimizer, OptimizationReport, OptimizationState, OptimizerConfig, SamplePolicy};
