//! Monte Carlo sampling and the sample-based cost function.

mod traits;
mod vmc;
mod cost;

pub use traits::EnergyCalculator;
pub use vmc::{Configuration, VmcConfig, VmcSampler, VmcStatistics};
pub use cost::{CorrelatedSamplingCost, CostConfig, Reweighted};
