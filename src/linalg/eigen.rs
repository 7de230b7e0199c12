//! Eigen-solvers for the linear-method matrix pair.
//!
//! The generalized problem `A v = λ B v` is reduced to a standard one by a
//! shift-invert of the pencil, `M = (A - σB)⁻¹ B`, whose eigenvalues are
//! `ν = 1 / (λ - σ)`. Infinite generalized eigenvalues (directions where
//! `B` is singular) become `ν = 0` and are mapped to a sentinel. The full
//! spectrum is always computed; eigenvectors come from the null space of
//! `M - νI` via an SVD.

use std::str::FromStr;
use log::{debug, warn};
use nalgebra::linalg::{Schur, SVD};
use nalgebra::{Complex, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use crate::error::{OptimizeError, Result};
use crate::optimize::NonlinearRange;

/// Candidates mapped to this value sort after every admissible eigenvalue.
pub const SENTINEL: f64 = 1e100;

const MAX_SWEEPS: usize = 10_000;
const COMPLEX_TOLERANCE: f64 = 1e-8;
const MIN_PENCIL_RCOND: f64 = 1e-12;
const MIN_ANCHOR: f64 = 1e-300;
/// Relative slack on the upper window edge; a root equal to the baseline is admissible.
const WINDOW_EDGE: f64 = 1e-10;
/// Pencil shifts tried in turn (times the matrix scale) until `A - σB` is well conditioned.
const PENCIL_SHIFTS: [f64; 5] = [0.0, 0.577_215_664_9, -1.618_033_988_7, 2.718_281_828_5, -3.141_592_653_6];

/// Tunables of the root selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigenConfig {
    /// Generalized eigenvalues at or above this magnitude are treated as infinite.
    pub sentinel_threshold: f64,
    /// Width of the admissible window below the baseline in the single-matrix solve.
    /// Heuristic bound, not a physical one.
    pub window_width: f64,
    /// Within the window, roots closest to `baseline - target_offset` win.
    pub target_offset: f64,
}

impl Default for EigenConfig {
    fn default() -> Self {
        Self {
            sentinel_threshold: 1e10,
            window_width: 100.0,
            target_offset: 2.0,
        }
    }
}

/// Left (Hamiltonian-derivative) and right (overlap) matrices of dimension N+1.
#[derive(Clone, Debug, PartialEq)]
pub struct GevMatrixPair {
    pub left: DMatrix<f64>,
    pub right: DMatrix<f64>,
}

impl GevMatrixPair {
    pub fn new(left: DMatrix<f64>, right: DMatrix<f64>) -> Result<Self> {
        check_square(&left, "left")?;
        check_square(&right, "right")?;
        if left.nrows() != right.nrows() {
            return Err(OptimizeError::InvalidConfiguration(format!(
                "matrix pair dimensions differ: {} vs {}",
                left.nrows(),
                right.nrows()
            )));
        }
        Ok(Self { left, right })
    }

    /// Matrix dimension, i.e. number of parameters + 1.
    pub fn dim(&self) -> usize {
        self.left.nrows()
    }

    pub fn num_params(&self) -> usize {
        self.dim() - 1
    }

    /// Copy of the left matrix with `shift` added to diagonal entries 1..N.
    pub fn shifted_left(&self, shift: f64) -> DMatrix<f64> {
        shift_diagonal(&self.left, shift)
    }

    /// `B⁻¹ A`, the overlap-inverse form of the left matrix.
    pub fn overlap_inverse_left(&self) -> Result<DMatrix<f64>> {
        self.right
            .clone()
            .lu()
            .solve(&self.left)
            .ok_or_else(|| OptimizeError::Diagonalization("overlap matrix is singular".into()))
    }
}

/// Add `shift` to every diagonal entry except the (0,0) baseline.
pub fn shift_diagonal(m: &DMatrix<f64>, shift: f64) -> DMatrix<f64> {
    let mut shifted = m.clone();
    for i in 1..shifted.nrows() {
        shifted[(i, i)] += shift;
    }
    shifted
}

fn check_square(m: &DMatrix<f64>, name: &str) -> Result<()> {
    if m.nrows() == 0 || m.nrows() != m.ncols() {
        return Err(OptimizeError::InvalidConfiguration(format!(
            "{} matrix must be square and non-empty, got {}x{}",
            name,
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(())
}

/// Selected eigenpair; the eigenvector is normalized so that component 0 is 1.
#[derive(Clone, Debug, PartialEq)]
pub struct EigenSolution {
    pub eigenvalue: f64,
    pub eigenvector: DVector<f64>,
}

impl EigenSolution {
    /// Parameter displacement, components 1..N of the eigenvector.
    pub fn direction(&self) -> Vec<f64> {
        self.eigenvector.iter().skip(1).copied().collect()
    }
}

/// How linear (CSF) and nonlinear parameters are combined in the solve.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CsfMode {
    /// Solve the blocks apart; linear parameters jump to their block minimum.
    Freeze,
    /// Rescale the nonlinear block by the ratio of block eigenvalues and re-solve.
    Rescale,
    /// Solve the full pair and report which block has the lower root.
    Stability,
}

impl FromStr for CsfMode {
    type Err = OptimizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freeze" => Ok(CsfMode::Freeze),
            "rescale" => Ok(CsfMode::Rescale),
            "stability" => Ok(CsfMode::Stability),
            other => Err(OptimizeError::InvalidConfiguration(format!(
                "unknown CSF option `{}` (expected freeze, rescale or stability)",
                other
            ))),
        }
    }
}

/// Result of a block-split solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitSolution {
    pub solution: EigenSolution,
    /// Lowest root of the nonlinear block.
    pub nonlinear_eigenvalue: f64,
    /// Lowest root of the linear block.
    pub linear_eigenvalue: f64,
    /// Unscaled linear step (matrix indexing, zeros outside the linear slots) in freeze mode.
    pub frozen_linear: Option<DVector<f64>>,
    /// True when the linear block has the lower root.
    pub linear_dominant: bool,
}

struct Candidate {
    value: Complex<f64>,
    mapped: f64,
}

impl Candidate {
    fn is_real(&self) -> bool {
        self.value.im.abs() <= COMPLEX_TOLERANCE * self.value.norm()
    }
}

/// Dense eigen-solver with the linear-method root selection rules.
#[derive(Clone, Debug, Default)]
pub struct GeneralizedEigenSolver {
    pub config: EigenConfig,
}

impl GeneralizedEigenSolver {
    pub fn new(config: EigenConfig) -> Self {
        Self { config }
    }

    /// Lowest admissible root of `A v = λ B v`.
    pub fn solve(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<EigenSolution> {
        check_square(a, "left")?;
        check_square(b, "right")?;
        if a.nrows() != b.nrows() {
            return Err(OptimizeError::Diagonalization(format!(
                "matrix pair dimensions differ: {} vs {}",
                a.nrows(),
                b.nrows()
            )));
        }
        let (sigma, m) = self.shift_invert(a, b)?;
        let nus = eigenvalues(&m)?;

        let threshold = self.config.sentinel_threshold;
        let candidates: Vec<Candidate> = nus
            .iter()
            .map(|nu| {
                let lambda = if nu.re == 0.0 { f64::INFINITY } else { sigma + 1.0 / nu.re };
                let candidate = Candidate { value: *nu, mapped: SENTINEL };
                if candidate.is_real() && lambda.is_finite() && lambda.abs() < threshold {
                    Candidate { mapped: lambda, ..candidate }
                } else {
                    candidate
                }
            })
            .collect();

        let best = select(&candidates);
        let winner = &candidates[best];
        if !winner.is_real() {
            return Err(OptimizeError::Diagonalization(
                "lowest generalized eigenvalue is complex".into(),
            ));
        }
        let nu = winner.value.re;
        let vector = null_vector(&(m - DMatrix::identity(a.nrows(), a.nrows()) * nu))?;
        let eigenvector = normalize(vector)?;
        debug!("generalized solve: λ = {:.8e} (σ = {:.3})", winner.mapped, sigma);
        Ok(EigenSolution { eigenvalue: winner.mapped, eigenvector })
    }

    /// Root of `A v = λ v` nearest `A(0,0) - target_offset` inside the energy window.
    pub fn solve_standard(&self, a: &DMatrix<f64>) -> Result<EigenSolution> {
        check_square(a, "left")?;
        let baseline = a[(0, 0)];
        let lower = baseline - self.config.window_width;
        let upper = baseline + WINDOW_EDGE * baseline.abs().max(1.0);
        let target = baseline - self.config.target_offset;
        let lambdas = eigenvalues(a)?;

        let candidates: Vec<Candidate> = lambdas
            .iter()
            .map(|l| {
                let candidate = Candidate { value: *l, mapped: SENTINEL };
                if candidate.is_real() && l.re >= lower && l.re < upper {
                    Candidate { mapped: (l.re - target).powi(2), ..candidate }
                } else {
                    candidate
                }
            })
            .collect();

        let best = select(&candidates);
        let winner = &candidates[best];
        if !winner.is_real() {
            return Err(OptimizeError::Diagonalization("selected eigenvalue is complex".into()));
        }
        if winner.mapped >= SENTINEL {
            warn!(
                "no eigenvalue inside [{:.6}, {:.6}); using λ = {:.6}",
                lower, baseline, winner.value.re
            );
        }
        let lambda = winner.value.re;
        let vector = null_vector(&(a - DMatrix::identity(a.nrows(), a.nrows()) * lambda))?;
        let eigenvector = normalize(vector)?;
        Ok(EigenSolution { eigenvalue: lambda, eigenvector })
    }

    /// Solve the nonlinear and linear blocks separately and combine them per `mode`.
    ///
    /// Falls back to a plain solve when either block is empty.
    pub fn split_eigenvectors(
        &self,
        pair: &GevMatrixPair,
        nonlinear: NonlinearRange,
        mode: CsfMode,
    ) -> Result<SplitSolution> {
        let dim = pair.dim();
        let nl_idx: Vec<usize> = std::iter::once(0)
            .chain(nonlinear.as_range().map(|i| i + 1))
            .collect();
        let lin_idx: Vec<usize> = std::iter::once(0)
            .chain((0..pair.num_params()).filter(|i| !nonlinear.contains(*i)).map(|i| i + 1))
            .collect();

        if nl_idx.len() < 2 || lin_idx.len() < 2 {
            let solution = self.solve(&pair.left, &pair.right)?;
            let eigenvalue = solution.eigenvalue;
            return Ok(SplitSolution {
                solution,
                nonlinear_eigenvalue: eigenvalue,
                linear_eigenvalue: eigenvalue,
                frozen_linear: None,
                linear_dominant: false,
            });
        }

        let (nl_left, nl_right) = sub_pair(pair, &nl_idx);
        let nl = self.solve(&nl_left, &nl_right)?;
        let (lin_left, lin_right) = sub_pair(pair, &lin_idx);
        let lin = self.solve(&lin_left, &lin_right)?;
        let linear_dominant = nl.eigenvalue > lin.eigenvalue;
        debug!(
            "split solve: nonlinear λ = {:.8e}, linear λ = {:.8e}",
            nl.eigenvalue, lin.eigenvalue
        );

        let solution = match mode {
            CsfMode::Freeze => {
                let mut eigenvector = DVector::zeros(dim);
                eigenvector[0] = 1.0;
                for (k, &row) in nl_idx.iter().enumerate().skip(1) {
                    eigenvector[row] = nl.eigenvector[k];
                }
                let mut frozen = DVector::zeros(dim);
                for (k, &row) in lin_idx.iter().enumerate().skip(1) {
                    frozen[row] = lin.eigenvector[k];
                }
                return Ok(SplitSolution {
                    solution: EigenSolution {
                        eigenvalue: nl.eigenvalue.min(lin.eigenvalue),
                        eigenvector,
                    },
                    nonlinear_eigenvalue: nl.eigenvalue,
                    linear_eigenvalue: lin.eigenvalue,
                    frozen_linear: Some(frozen),
                    linear_dominant,
                });
            }
            CsfMode::Rescale => {
                let factor = (lin.eigenvalue / nl.eigenvalue).abs().sqrt();
                let in_block = |i: usize| i > nonlinear.first && i <= nonlinear.last;
                let mut left = pair.left.clone();
                let mut right = pair.right.clone();
                for i in 0..dim {
                    for j in 0..dim {
                        if in_block(i) {
                            left[(i, j)] *= factor;
                            right[(i, j)] *= factor;
                        }
                        if in_block(j) {
                            left[(i, j)] *= factor;
                            right[(i, j)] *= factor;
                        }
                    }
                }
                self.solve(&left, &right)?
            }
            CsfMode::Stability => self.solve(&pair.left, &pair.right)?,
        };

        Ok(SplitSolution {
            solution,
            nonlinear_eigenvalue: nl.eigenvalue,
            linear_eigenvalue: lin.eigenvalue,
            frozen_linear: None,
            linear_dominant,
        })
    }

    /// Pick a pencil shift with `A - σB` well conditioned and form `(A - σB)⁻¹ B`.
    fn shift_invert(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<(f64, DMatrix<f64>)> {
        let scale = a.amax().max(b.amax()).max(1.0);
        for factor in PENCIL_SHIFTS {
            let sigma = factor * scale;
            let pencil = a - b * sigma;
            let svd = SVD::try_new(pencil.clone(), false, false, f64::EPSILON, MAX_SWEEPS)
                .ok_or_else(|| OptimizeError::Diagonalization("SVD of the pencil did not converge".into()))?;
            let smax = svd.singular_values.iter().copied().fold(0.0, f64::max);
            let smin = svd.singular_values.iter().copied().fold(f64::INFINITY, f64::min);
            if !(smax > 0.0) || smin / smax < MIN_PENCIL_RCOND {
                continue;
            }
            if let Some(m) = pencil.lu().solve(b) {
                return Ok((sigma, m));
            }
        }
        Err(OptimizeError::Diagonalization(
            "matrix pencil is singular for every trial shift".into(),
        ))
    }
}

fn sub_pair(pair: &GevMatrixPair, idx: &[usize]) -> (DMatrix<f64>, DMatrix<f64>) {
    let m = idx.len();
    (
        DMatrix::from_fn(m, m, |r, c| pair.left[(idx[r], idx[c])]),
        DMatrix::from_fn(m, m, |r, c| pair.right[(idx[r], idx[c])]),
    )
}

/// Index of the smallest mapped value; ties resolve to the lower index.
fn select(candidates: &[Candidate]) -> usize {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&i, &j| candidates[i].mapped.total_cmp(&candidates[j].mapped));
    order[0]
}

/// All (complex) eigenvalues of a real square matrix.
pub fn eigenvalues(m: &DMatrix<f64>) -> Result<Vec<Complex<f64>>> {
    if m.iter().any(|x| !x.is_finite()) {
        return Err(OptimizeError::Diagonalization("matrix has non-finite entries".into()));
    }
    let schur = Schur::try_new(m.clone(), f64::EPSILON, MAX_SWEEPS).ok_or_else(|| {
        OptimizeError::Diagonalization("Schur decomposition did not converge".into())
    })?;
    Ok(schur.complex_eigenvalues().iter().copied().collect())
}

/// Right singular vector of the smallest singular value.
fn null_vector(m: &DMatrix<f64>) -> Result<DVector<f64>> {
    let svd = SVD::try_new(m.clone(), false, true, f64::EPSILON, MAX_SWEEPS)
        .ok_or_else(|| OptimizeError::Diagonalization("SVD did not converge".into()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| OptimizeError::Diagonalization("SVD returned no right vectors".into()))?;
    let k = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))
        .map_or(0, |(i, _)| i);
    Ok(v_t.row(k).transpose())
}

fn normalize(v: DVector<f64>) -> Result<DVector<f64>> {
    let anchor = v[0];
    if anchor.abs() < MIN_ANCHOR || !anchor.is_finite() {
        return Err(OptimizeError::Diagonalization(
            "eigenvector has a vanishing normalization component".into(),
        ));
    }
    let mut out = v / anchor;
    out[0] = 1.0;
    Ok(out)
}
