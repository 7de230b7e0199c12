//! Error taxonomy for the linear optimizer.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OptimizeError>;

/// Stages of one outer iteration, used to tag failures and timings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    GenerateSamples,
    BuildMatrices,
    Eigenvalue,
    LineMinimization,
    Commit,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::GenerateSamples,
        Stage::BuildMatrices,
        Stage::Eigenvalue,
        Stage::LineMinimization,
        Stage::Commit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::GenerateSamples => "generate-samples",
            Stage::BuildMatrices => "build-matrices",
            Stage::Eigenvalue => "eigenvalue",
            Stage::LineMinimization => "line-minimization",
            Stage::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    /// The eigen-decomposition did not converge or produced no usable root.
    #[error("diagonalization failed: {0}")]
    Diagonalization(String),

    /// No stabilizer trial produced a finite cost.
    #[error("stabilization exhausted after {trials} trials without a finite cost")]
    StabilizationExhausted { trials: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("sampling failed: {0}")]
    Sampling(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failure of one driver stage; the run is aborted.
    #[error("stage `{stage}` failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<OptimizeError>,
    },
}

impl OptimizeError {
    /// Wrap the error with the stage it surfaced from.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ OptimizeError::StageFailed { .. } => already,
            other => OptimizeError::StageFailed { stage, source: Box::new(other) },
        }
    }

    /// The underlying error with any stage wrappers removed.
    pub fn root(&self) -> &OptimizeError {
        match self {
            OptimizeError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage tag, if the error was raised by the driver.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OptimizeError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
