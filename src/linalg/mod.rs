//! Dense linear algebra for the linear method: eigen-solves and curve fits.

pub mod eigen;
pub mod fit;

pub use eigen::{CsfMode, EigenConfig, EigenSolution, GeneralizedEigenSolver, GevMatrixPair, SplitSolution, SENTINEL};
pub use fit::{polyfit, polyval, quadratic_minimum, quartic_minimum};
