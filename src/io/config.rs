//! YAML run configuration.
//!
//! ```yaml
//! optimizer:
//!   max_iterations: 8
//!   csf_option: freeze
//! stabilizer:
//!   base_shift: 0.001
//!   method: fit
//! sampling:
//!   min_samples: 4000
//!   seed: 7
//! system:
//!   bond_length: 1.4
//! ```
//!
//! Missing sections and keys fall back to their defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result};
use crate::linalg::EigenConfig;
use crate::optimize::{OptimizerConfig, StabilizerConfig};
use crate::sampling::{CostConfig, VmcConfig};
use crate::systems::H2MoleculeCI;

/// Starting point of the H₂ trial function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Bohr
    pub bond_length: f64,
    /// Orbital exponent α
    pub alpha: f64,
    /// Jastrow length F
    pub cusp_param: f64,
    /// Weight c of the valence-bond component
    pub ci_coeff: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { bond_length: 1.4, alpha: 1.0, cusp_param: 1.0, ci_coeff: 0.0 }
    }
}

impl SystemConfig {
    pub fn build(&self) -> H2MoleculeCI {
        H2MoleculeCI::new(self.bond_length, self.alpha, self.cusp_param, self.ci_coeff)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bond_length > 0.0 && self.alpha > 0.0 && self.cusp_param > 0.0) || !self.ci_coeff.is_finite() {
            return Err(OptimizeError::InvalidConfiguration(
                "bond_length, alpha and cusp_param must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub optimizer: OptimizerConfig,
    pub stabilizer: StabilizerConfig,
    pub eigen: EigenConfig,
    pub sampling: VmcConfig,
    pub cost: CostConfig,
    pub system: SystemConfig,
}

impl RunConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        self.stabilizer.validate()?;
        self.sampling.validate()?;
        self.cost.validate()?;
        self.system.validate()?;
        let eigen = &self.eigen;
        if !(eigen.sentinel_threshold > 0.0 && eigen.window_width > 0.0 && eigen.target_offset >= 0.0) {
            return Err(OptimizeError::InvalidConfiguration(
                "eigen thresholds must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Read and validate a configuration file.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let file = File::open(path)?;
    let config: RunConfig = serde_yaml::from_reader(BufReader::new(file))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::CsfMode;
    use crate::optimize::StabilizerMethod;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = RunConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let text = "
optimizer:
  max_iterations: 3
  csf_option: rescale
stabilizer:
  method: best
  too_big: 2.5
eigen:
  window_width: 50.0
sampling:
  seed: 9
system:
  ci_coeff: 0.25
";
        let config = RunConfig::from_yaml(text).unwrap();
        assert_eq!(config.optimizer.max_iterations, 3);
        assert_eq!(config.optimizer.param_tol, 1e-4);
        assert_eq!(config.optimizer.csf_mode().unwrap(), Some(CsfMode::Rescale));
        assert_eq!(config.stabilizer.method, StabilizerMethod::Best);
        assert_eq!(config.stabilizer.too_big, 2.5);
        assert_eq!(config.eigen.window_width, 50.0);
        assert_eq!(config.sampling.seed, 9);
        assert_eq!(config.system.build().ci_coeff, 0.25);
    }

    #[test]
    fn test_unknown_csf_option() {
        let err = RunConfig::from_yaml("optimizer:\n  csf_option: sideways\n").unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unknown_method_is_yaml_error() {
        let err = RunConfig::from_yaml("stabilizer:\n  method: guess\n").unwrap_err();
        assert!(matches!(err, OptimizeError::Yaml(_)));
    }

    #[test]
    fn test_bad_multiplier() {
        let err = RunConfig::from_yaml("stabilizer:\n  shift_multiplier: 0.5\n").unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(read_config("/nonexistent/run.yml"), Err(OptimizeError::Io(_))));
    }
}
