//! Stabilizer (diagonal shift) search for one outer iteration.
//!
//! Each trial adds a shift to the diagonal of a fresh copy of the left
//! matrix, re-solves, damps the nonlinear step and evaluates the cost of
//! the resulting parameters. Once enough finite trials exist a polynomial
//! is fitted through `(shift, cost)` and its minimum is probed as well.

use std::time::{Duration, Instant};
use log::{debug, info, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result};
use crate::linalg::eigen::shift_diagonal;
use crate::linalg::{polyfit, polyval, quadratic_minimum, quartic_minimum, CsfMode, GeneralizedEigenSolver, GevMatrixPair};
use super::params::ParameterVector;
use super::rescale::NonlinearRescaler;

/// How the committed shift is chosen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilizerMethod {
    /// Fit a curve through the trials and probe its minimum.
    Fit,
    /// Commit the best observed trial.
    Best,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// First shift probed.
    pub base_shift: f64,
    /// Ratio between consecutive shifts.
    pub shift_multiplier: f64,
    /// Probing budget per outer iteration (the fitted probe comes on top).
    pub max_trials: usize,
    /// Largest fitted shift that may be accepted.
    pub too_big: f64,
    /// Largest allowed magnitude of any parameter change in one step.
    pub big_change: f64,
    /// Slack when comparing the fitted probe with the best trial.
    pub cost_tolerance: f64,
    pub method: StabilizerMethod,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            base_shift: 1e-3,
            shift_multiplier: 10.0,
            max_trials: 6,
            too_big: 10.0,
            big_change: 1.0,
            cost_tolerance: 0.0,
            method: StabilizerMethod::Fit,
        }
    }
}

impl StabilizerConfig {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(OptimizeError::InvalidConfiguration(msg));
        if !(self.base_shift > 0.0) || !self.base_shift.is_finite() {
            return bad(format!("base_shift must be positive, got {}", self.base_shift));
        }
        if !(self.shift_multiplier > 1.0) || !self.shift_multiplier.is_finite() {
            return bad(format!("shift_multiplier must exceed 1, got {}", self.shift_multiplier));
        }
        if self.max_trials == 0 {
            return bad("max_trials must be at least 1".into());
        }
        if !(self.too_big > 0.0) {
            return bad(format!("too_big must be positive, got {}", self.too_big));
        }
        if !(self.big_change > 0.0) {
            return bad(format!("big_change must be positive, got {}", self.big_change));
        }
        if !(self.cost_tolerance >= 0.0) {
            return bad(format!("cost_tolerance must be non-negative, got {}", self.cost_tolerance));
        }
        Ok(())
    }
}

/// One probed shift and its outcome. A NaN cost marks a failed trial.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizerTrial {
    pub shift: f64,
    pub cost: f64,
    pub eigenvalue: f64,
    /// Damping factor applied by the nonlinear rescaler.
    pub rescale: f64,
    /// Candidate parameters this trial evaluated.
    pub parameters: Vec<f64>,
}

impl StabilizerTrial {
    pub fn is_valid(&self) -> bool {
        self.cost.is_finite()
    }
}

/// Result of fitting a curve through the trials.
#[derive(Clone, Debug, PartialEq)]
pub enum FitOutcome {
    Accepted { shift: f64, predicted: f64 },
    Rejected { shift: f64, predicted: f64, reason: &'static str },
    /// Fewer than three finite trials, or a degenerate fit.
    Unavailable { valid: usize },
}

/// Fit `(shift, cost)` pairs and decide whether the fitted minimum is trustworthy.
///
/// NaN costs are skipped. Three or four points get a quadratic, five or more
/// a quartic. The minimum is accepted only if it is positive, at most
/// `too_big`, and its predicted cost is not above any observed cost.
pub fn fit_stabilizers(points: &[(f64, f64)], too_big: f64) -> FitOutcome {
    let mut valid: Vec<(f64, f64)> = points.iter().copied().filter(|(_, c)| c.is_finite()).collect();
    valid.sort_by(|a, b| a.0.total_cmp(&b.0));
    let n = valid.len();
    let xs: Vec<f64> = valid.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = valid.iter().map(|p| p.1).collect();

    let fitted = if n >= 5 {
        polyfit(&xs, &ys, 4).and_then(|c| {
            quartic_minimum(c.as_slice(), (xs[0], xs[n - 1])).map(|x| (x, polyval(c.as_slice(), x)))
        })
    } else if n >= 3 {
        polyfit(&xs, &ys, 2)
            .and_then(|c| quadratic_minimum(c.as_slice()).map(|x| (x, polyval(c.as_slice(), x))))
    } else {
        None
    };

    let (shift, predicted) = match fitted {
        Some(f) => f,
        None => return FitOutcome::Unavailable { valid: n },
    };
    debug!("{} fit min: {:.6e} val: {:.8}", if n >= 5 { "quartic" } else { "quadratic" }, shift, predicted);

    if !(shift > 0.0) {
        return FitOutcome::Rejected { shift, predicted, reason: "non-positive shift" };
    }
    if shift > too_big {
        return FitOutcome::Rejected { shift, predicted, reason: "shift exceeds upper bound" };
    }
    if ys.iter().any(|c| predicted > *c) {
        return FitOutcome::Rejected { shift, predicted, reason: "prediction above an observed cost" };
    }
    FitOutcome::Accepted { shift, predicted }
}

/// Phases of the search.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StabilizerPhase {
    Initial,
    Probing(f64),
    Fitting,
    /// The fitted shift was committed.
    Accepted,
    /// The best observed trial was committed.
    Rejected,
}

/// Committed update of one outer iteration.
#[derive(Clone, Debug)]
pub struct StabilizedUpdate {
    pub shift: f64,
    pub cost: f64,
    pub eigenvalue: f64,
    pub parameters: Vec<f64>,
    /// `Accepted` or `Rejected`.
    pub phase: StabilizerPhase,
    pub fit: FitOutcome,
    /// All trials in probing order, the fitted probe last if there was one.
    pub trials: Vec<StabilizerTrial>,
    /// Time spent inside eigen-solves.
    pub eigen_time: Duration,
}

/// Runs the shift search on one matrix pair.
pub struct StabilizationController<'a> {
    pub config: &'a StabilizerConfig,
    pub solver: &'a GeneralizedEigenSolver,
    pub rescaler: NonlinearRescaler,
    pub csf_mode: Option<CsfMode>,
    /// Work on `B⁻¹A` with the single-matrix solver.
    pub apply_inverse: bool,
}

impl<'a> StabilizationController<'a> {
    /// Search for a stable update of `current` given the pair built at `current`.
    ///
    /// `cost` receives a scratch copy of the candidate parameters and returns
    /// their cost (NaN when the evaluation is not trustworthy).
    pub fn run<F>(&self, pair: &GevMatrixPair, current: &ParameterVector, mut cost: F) -> Result<StabilizedUpdate>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let base_left = if self.apply_inverse && self.csf_mode.is_none() {
            pair.overlap_inverse_left()?
        } else {
            pair.left.clone()
        };
        let mut eigen_time = Duration::ZERO;
        let mut trials: Vec<StabilizerTrial> = Vec::with_capacity(self.config.max_trials + 1);
        let mut fit = FitOutcome::Unavailable { valid: 0 };
        let mut fitted_trial: Option<StabilizerTrial> = None;
        let mut phase = StabilizerPhase::Initial;

        loop {
            phase = match phase {
                StabilizerPhase::Initial => StabilizerPhase::Probing(self.config.base_shift),
                StabilizerPhase::Probing(shift) => {
                    let trial = self.probe(pair, &base_left, current, shift, &mut cost, &mut eigen_time)?;
                    trials.push(trial);
                    match self.next_shift(&trials) {
                        Some(next) if trials.len() < self.config.max_trials => StabilizerPhase::Probing(next),
                        _ => StabilizerPhase::Fitting,
                    }
                }
                StabilizerPhase::Fitting => {
                    let best = best_trial(&trials)
                        .ok_or(OptimizeError::StabilizationExhausted { trials: trials.len() })?;
                    let best_cost = trials[best].cost;
                    if self.config.method == StabilizerMethod::Fit {
                        let points: Vec<(f64, f64)> = trials.iter().map(|t| (t.shift, t.cost)).collect();
                        fit = fit_stabilizers(&points, self.config.too_big);
                    }
                    match fit {
                        FitOutcome::Accepted { shift, .. } => {
                            let probe = self.probe(pair, &base_left, current, shift, &mut cost, &mut eigen_time)?;
                            let keep = probe.is_valid() && probe.cost <= best_cost + self.config.cost_tolerance;
                            if !keep {
                                debug!("fitted shift {:.4e} gave cost {:.8}; keeping best trial", shift, probe.cost);
                            }
                            trials.push(probe.clone());
                            if keep {
                                fitted_trial = Some(probe);
                                StabilizerPhase::Accepted
                            } else {
                                StabilizerPhase::Rejected
                            }
                        }
                        FitOutcome::Rejected { shift, predicted, reason } => {
                            warn!("fit rejected ({}): shift {:.4e}, predicted {:.8}", reason, shift, predicted);
                            StabilizerPhase::Rejected
                        }
                        FitOutcome::Unavailable { .. } => StabilizerPhase::Rejected,
                    }
                }
                StabilizerPhase::Accepted | StabilizerPhase::Rejected => break,
            };
        }

        let chosen = match fitted_trial {
            Some(t) => t,
            None => {
                let best = best_trial(&trials)
                    .ok_or(OptimizeError::StabilizationExhausted { trials: trials.len() })?;
                trials[best].clone()
            }
        };
        info!(
            "stabilizer {:?}: shift {:.4e}, cost {:.8}, {} trials",
            phase,
            chosen.shift,
            chosen.cost,
            trials.len()
        );
        Ok(StabilizedUpdate {
            shift: chosen.shift,
            cost: chosen.cost,
            eigenvalue: chosen.eigenvalue,
            parameters: chosen.parameters,
            phase,
            fit,
            trials,
            eigen_time,
        })
    }

    /// Solve at one shift and evaluate the resulting parameters.
    fn probe<F>(
        &self,
        pair: &GevMatrixPair,
        base_left: &DMatrix<f64>,
        current: &ParameterVector,
        shift: f64,
        cost: &mut F,
        eigen_time: &mut Duration,
    ) -> Result<StabilizerTrial>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let start = Instant::now();
        let (eigenvalue, mut direction, frozen) = match self.csf_mode {
            Some(mode) => {
                let shifted = GevMatrixPair { left: pair.shifted_left(shift), right: pair.right.clone() };
                let split = self
                    .solver
                    .split_eigenvectors(&shifted, self.rescaler.range(), mode)?;
                if mode == CsfMode::Stability && split.linear_dominant {
                    debug!("linear block dominates at shift {:.4e}", shift);
                }
                (split.solution.eigenvalue, split.solution.eigenvector, split.frozen_linear)
            }
            None if self.apply_inverse => {
                let sol = self.solver.solve_standard(&shift_diagonal(base_left, shift))?;
                (sol.eigenvalue, sol.eigenvector, None)
            }
            None => {
                let sol = self.solver.solve(&pair.shifted_left(shift), &pair.right)?;
                (sol.eigenvalue, sol.eigenvector, None)
            }
        };
        *eigen_time += start.elapsed();

        let rescale = self.rescaler.rescale(direction.as_mut_slice(), &pair.right);
        if let Some(frozen) = frozen {
            for i in current.linear_indices() {
                direction[i + 1] = frozen[i + 1];
            }
        }

        let parameters: Vec<f64> = current
            .values()
            .iter()
            .zip(direction.iter().skip(1))
            .map(|(p, d)| p + d)
            .collect();
        let largest = direction.iter().skip(1).fold(0.0_f64, |m, d| m.max(d.abs()));
        let value = if !(largest <= self.config.big_change) {
            warn!("failed step at shift {:.4e}: largest parameter change {:.4e}", shift, largest);
            f64::NAN
        } else {
            cost(&parameters)
        };
        debug!("shift {:.4e}: λ = {:.8}, rescale {:.4}, cost {:.8}", shift, eigenvalue, rescale, value);

        Ok(StabilizerTrial { shift, cost: value, eigenvalue, rescale, parameters })
    }

    /// Next shift to probe, or `None` once the minimum is bracketed.
    fn next_shift(&self, trials: &[StabilizerTrial]) -> Option<f64> {
        let m = self.config.shift_multiplier;
        let largest = trials.iter().map(|t| t.shift).fold(f64::NEG_INFINITY, f64::max);
        let valid: Vec<&StabilizerTrial> = trials.iter().filter(|t| t.is_valid()).collect();
        if valid.len() < 3 {
            return Some(largest * m);
        }
        let best = best_trial(trials)?;
        let lowest = trials
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.shift.total_cmp(&b.1.shift))
            .map(|(i, _)| i)?;
        let largest_valid = valid.iter().map(|t| t.shift).fold(f64::NEG_INFINITY, f64::max);

        if trials[best].shift >= largest_valid && largest_valid >= largest {
            // still improving toward larger shifts
            Some(largest * m)
        } else if best == lowest {
            // minimum may lie below the probed range
            Some(trials[lowest].shift / m)
        } else {
            None
        }
    }
}

/// Index of the finite trial with the lowest cost; ties keep the earlier trial.
fn best_trial(trials: &[StabilizerTrial]) -> Option<usize> {
    trials
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_valid())
        .fold(None, |best: Option<(usize, f64)>, (i, t)| match best {
            Some((_, c)) if c <= t.cost => best,
            _ => Some((i, t.cost)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::EigenConfig;
    use crate::optimize::params::ParameterKind;
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_fit_accepted() {
        let points = [(0.01, -4.9), (0.1, -4.95), (1.0, -4.7)];
        match fit_stabilizers(&points, 10.0) {
            FitOutcome::Accepted { shift, predicted } => {
                assert_relative_eq!(shift, 0.385, epsilon = 1e-6);
                assert!(predicted <= -4.95);
                assert_relative_eq!(predicted, -5.018371212, epsilon = 1e-6);
            }
            other => panic!("expected accepted fit, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_rejected_above_too_big() {
        let points = [(0.01, -4.9), (0.1, -4.95), (1.0, -4.7)];
        assert!(matches!(
            fit_stabilizers(&points, 0.2),
            FitOutcome::Rejected { reason: "shift exceeds upper bound", .. }
        ));
    }

    #[test]
    fn test_fit_rejected_when_prediction_above_observation() {
        // least-squares parabola bottoms out at -0.805, above the observed -1.2
        let points = [(0.0, 0.0), (1.0, -1.2), (2.0, -0.2), (3.0, 0.1)];
        match fit_stabilizers(&points, 10.0) {
            FitOutcome::Rejected { predicted, reason, .. } => {
                assert_eq!(reason, "prediction above an observed cost");
                assert!(predicted > -1.2);
            }
            other => panic!("expected rejected fit, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_skips_nan_costs() {
        let points = [(0.001, f64::NAN), (0.01, -4.9), (0.1, -4.95), (1.0, -4.7), (5.0, f64::NAN)];
        assert!(matches!(fit_stabilizers(&points, 10.0), FitOutcome::Accepted { .. }));
        let points = [(0.01, -4.9), (0.1, f64::NAN), (1.0, -4.7)];
        assert_eq!(fit_stabilizers(&points, 10.0), FitOutcome::Unavailable { valid: 2 });
    }

    #[test]
    fn test_quartic_fit_with_five_points() {
        // samples of (x - 1)^2 - 3 plus a small quartic term
        let points: Vec<(f64, f64)> = [0.2, 0.6, 1.0, 1.4, 2.0]
            .iter()
            .map(|&x| (x, (x - 1.0_f64).powi(2) - 3.0 + 0.01 * x.powi(4)))
            .collect();
        match fit_stabilizers(&points, 10.0) {
            FitOutcome::Accepted { shift, predicted } => {
                assert!(shift > 0.9 && shift < 1.0, "{}", shift);
                assert!(predicted <= -2.99);
            }
            other => panic!("expected accepted fit, got {:?}", other),
        }
    }

    fn diagonal_pair() -> GevMatrixPair {
        // A = diag(-5, -3, -1) with a weak coupling to the baseline, B = I
        let mut a = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![-5.0, -3.0, -1.0]));
        a[(0, 1)] = 0.1;
        a[(1, 0)] = 0.1;
        a[(0, 2)] = 0.05;
        a[(2, 0)] = 0.05;
        GevMatrixPair::new(a, DMatrix::identity(3, 3)).unwrap()
    }

    fn controller<'a>(
        config: &'a StabilizerConfig,
        solver: &'a GeneralizedEigenSolver,
        params: &ParameterVector,
    ) -> StabilizationController<'a> {
        StabilizationController {
            config,
            solver,
            rescaler: NonlinearRescaler::new(params.nonlinear_range()),
            csf_mode: None,
            apply_inverse: false,
        }
    }

    #[test]
    fn test_all_nan_costs_exhaust() {
        let config = StabilizerConfig { max_trials: 4, ..StabilizerConfig::default() };
        let solver = GeneralizedEigenSolver::new(EigenConfig::default());
        let params = ParameterVector::new(vec![0.0, 0.0], vec![ParameterKind::Nonlinear; 2]).unwrap();
        let pair = diagonal_pair();
        let mut calls = 0;
        let err = controller(&config, &solver, &params)
            .run(&pair, &params, |_| {
                calls += 1;
                f64::NAN
            })
            .unwrap_err();
        assert!(matches!(err, OptimizeError::StabilizationExhausted { trials: 4 }));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_never_commits_nan_trial() {
        let config = StabilizerConfig { max_trials: 5, method: StabilizerMethod::Best, ..StabilizerConfig::default() };
        let solver = GeneralizedEigenSolver::default();
        let params = ParameterVector::new(vec![0.0, 0.0], vec![ParameterKind::Nonlinear; 2]).unwrap();
        let pair = diagonal_pair();
        let mut n = 0;
        let update = controller(&config, &solver, &params)
            .run(&pair, &params, |p| {
                n += 1;
                if n % 2 == 1 { f64::NAN } else { p.iter().map(|x| x * x).sum::<f64>() }
            })
            .unwrap();
        assert!(update.cost.is_finite());
        assert_eq!(update.phase, StabilizerPhase::Rejected);
        assert!(update.trials.iter().any(|t| !t.is_valid()));
    }

    #[test]
    fn test_shift_sequence_and_smooth_cost() {
        let config = StabilizerConfig::default();
        let solver = GeneralizedEigenSolver::default();
        let params = ParameterVector::new(vec![1.0, 1.0], vec![ParameterKind::Nonlinear; 2]).unwrap();
        let pair = diagonal_pair();
        // cost with a minimum in parameter space away from the current point
        let update = controller(&config, &solver, &params)
            .run(&pair, &params, |p| (p[0] - 0.98).powi(2) + (p[1] - 0.99).powi(2))
            .unwrap();
        assert_relative_eq!(update.trials[0].shift, config.base_shift);
        assert!(update.trials.len() <= config.max_trials + 1);
        let best_observed = update
            .trials
            .iter()
            .filter(|t| t.is_valid())
            .map(|t| t.cost)
            .fold(f64::INFINITY, f64::min);
        assert!(update.cost <= best_observed + config.cost_tolerance);
        match update.fit {
            FitOutcome::Accepted { shift, .. } => {
                assert!(shift > 0.0 && shift <= config.too_big, "{}", shift);
                // the confirmation trial is recorded after the probing budget
                assert_relative_eq!(update.trials.last().unwrap().shift, shift);
            }
            FitOutcome::Rejected { .. } | FitOutcome::Unavailable { .. } => {
                assert_eq!(update.phase, StabilizerPhase::Rejected);
                assert_eq!(update.cost, best_observed);
            }
        }
    }

    #[test]
    fn test_rejected_fit_commits_best_trial() {
        // parabola through the three trials bottoms out at shift 0.0385
        let config = StabilizerConfig { too_big: 0.02, ..StabilizerConfig::default() };
        let solver = GeneralizedEigenSolver::default();
        let params = ParameterVector::new(vec![0.0, 0.0], vec![ParameterKind::Nonlinear; 2]).unwrap();
        let pair = diagonal_pair();
        let costs = [-1.0, -1.2, -0.2];
        let mut calls = 0;
        let update = controller(&config, &solver, &params)
            .run(&pair, &params, |_| {
                calls += 1;
                costs[calls - 1]
            })
            .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(update.trials.len(), 3);
        match update.fit {
            FitOutcome::Rejected { shift, reason, .. } => {
                assert_eq!(reason, "shift exceeds upper bound");
                assert_relative_eq!(shift, 0.0385, epsilon = 1e-6);
            }
            other => panic!("expected rejected fit, got {:?}", other),
        }
        assert_eq!(update.phase, StabilizerPhase::Rejected);
        assert_relative_eq!(update.shift, 0.01, epsilon = 1e-15);
        assert_eq!(update.cost, -1.2);
        assert_eq!(update.parameters, update.trials[1].parameters);
    }

    #[test]
    fn test_big_change_marks_trial_failed() {
        let config = StabilizerConfig { big_change: 1e-12, max_trials: 3, ..StabilizerConfig::default() };
        let solver = GeneralizedEigenSolver::default();
        let params = ParameterVector::new(vec![0.0, 0.0], vec![ParameterKind::Nonlinear; 2]).unwrap();
        let pair = diagonal_pair();
        let err = controller(&config, &solver, &params)
            .run(&pair, &params, |_| panic!("cost must not be evaluated"))
            .unwrap_err();
        assert!(matches!(err, OptimizeError::StabilizationExhausted { trials: 3 }));
    }

    #[test]
    fn test_config_validation() {
        assert!(StabilizerConfig::default().validate().is_ok());
        let bad = StabilizerConfig { shift_multiplier: 1.0, ..StabilizerConfig::default() };
        assert!(matches!(bad.validate(), Err(OptimizeError::InvalidConfiguration(_))));
        let bad = StabilizerConfig { max_trials: 0, ..StabilizerConfig::default() };
        assert!(bad.validate().is_err());
    }
}
