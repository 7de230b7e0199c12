//! Trial wavefunctions for the H₂ molecule.
//!
//! Two 1s orbitals `a`, `b` on the nuclei give the molecular-orbital function
//! `Ψ_MO = σ(r₁)σ(r₂) J` with `σ = a + b`, and the Heitler-London valence-bond
//! function `Ψ_VB = (a(r₁)b(r₂) + b(r₁)a(r₂)) J`. `H2MoleculeCI` mixes them,
//! `Ψ = Ψ_MO + c Ψ_VB`, which tunes the ionic weight of the MO function.

use nalgebra::Vector3;
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use crate::correlation::PairJastrow;
use crate::optimize::ParameterKind;
use crate::sampling::EnergyCalculator;
use crate::wavefunction::{MultiWfn, OptimizableWfn, SingleWfn, Slater1s};

/// Orbital-only part of a trial function and its derivatives.
#[derive(Clone, Debug)]
struct Spatial {
    value: f64,
    grad: [Vector3<f64>; 2],
    lap: [f64; 2],
    /// ∂/∂α with the exponent shared by both orbitals
    dalpha: f64,
}

impl Spatial {
    fn add_scaled(&self, other: &Spatial, c: f64) -> Spatial {
        Spatial {
            value: self.value + c * other.value,
            grad: [self.grad[0] + other.grad[0] * c, self.grad[1] + other.grad[1] * c],
            lap: [self.lap[0] + c * other.lap[0], self.lap[1] + c * other.lap[1]],
            dalpha: self.dalpha + c * other.dalpha,
        }
    }

    fn value(&self, jastrow: &PairJastrow, r: &[Vector3<f64>]) -> f64 {
        self.value * jastrow.evaluate(r)
    }

    fn gradient(&self, jastrow: &PairJastrow, r: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let j = jastrow.evaluate(r);
        let gj = jastrow.derivative(r);
        (0..2).map(|i| self.grad[i] * j + gj[i] * self.value).collect()
    }

    fn laplacian(&self, jastrow: &PairJastrow, r: &[Vector3<f64>]) -> Vec<f64> {
        let j = jastrow.evaluate(r);
        let gj = jastrow.derivative(r);
        let lj = jastrow.laplacian(r);
        (0..2)
            .map(|i| self.lap[i] * j + 2.0 * self.grad[i].dot(&gj[i]) + self.value * lj[i])
            .collect()
    }
}

/// Value, gradient, Laplacian, distance and α-derivative of one orbital at one point.
struct OrbitalPoint {
    v: f64,
    g: Vector3<f64>,
    l: f64,
    dv: f64,
}

impl OrbitalPoint {
    fn new(orbital: &Slater1s, r: &Vector3<f64>) -> Self {
        let v = orbital.evaluate(r);
        Self { v, g: orbital.derivative(r), l: orbital.laplacian(r), dv: -orbital.distance(r) * v }
    }
}

fn mo_spatial(a: &Slater1s, b: &Slater1s, r: &[Vector3<f64>]) -> Spatial {
    let (a1, b1) = (OrbitalPoint::new(a, &r[0]), OrbitalPoint::new(b, &r[0]));
    let (a2, b2) = (OrbitalPoint::new(a, &r[1]), OrbitalPoint::new(b, &r[1]));
    let s1 = a1.v + b1.v;
    let s2 = a2.v + b2.v;
    Spatial {
        value: s1 * s2,
        grad: [(a1.g + b1.g) * s2, (a2.g + b2.g) * s1],
        lap: [(a1.l + b1.l) * s2, (a2.l + b2.l) * s1],
        dalpha: (a1.dv + b1.dv) * s2 + s1 * (a2.dv + b2.dv),
    }
}

fn vb_spatial(a: &Slater1s, b: &Slater1s, r: &[Vector3<f64>]) -> Spatial {
    let (a1, b1) = (OrbitalPoint::new(a, &r[0]), OrbitalPoint::new(b, &r[0]));
    let (a2, b2) = (OrbitalPoint::new(a, &r[1]), OrbitalPoint::new(b, &r[1]));
    Spatial {
        value: a1.v * b2.v + b1.v * a2.v,
        grad: [a1.g * b2.v + b1.g * a2.v, b2.g * a1.v + a2.g * b1.v],
        lap: [a1.l * b2.v + b1.l * a2.v, b2.l * a1.v + a2.l * b1.v],
        dalpha: a1.dv * b2.v + a1.v * b2.dv + b1.dv * a2.v + b1.v * a2.dv,
    }
}

/// Electrons start in Gaussian clouds around the two nuclei.
fn initial_positions(a: &Slater1s, b: &Slater1s, rng: &mut dyn RngCore) -> Vec<Vector3<f64>> {
    [a.center, b.center]
        .iter()
        .map(|c| c + Vector3::from_fn(|_, _| StandardNormal.sample(&mut *rng)))
        .collect()
}

/// Coulomb potential of two electrons and two unit-charge nuclei.
pub fn h2_potential(r: &[Vector3<f64>], a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let (r1, r2) = (&r[0], &r[1]);
    1.0 / (r1 - r2).norm()
        - 1.0 / (r1 - a).norm()
        - 1.0 / (r1 - b).norm()
        - 1.0 / (r2 - a).norm()
        - 1.0 / (r2 - b).norm()
        + 1.0 / (a - b).norm()
}

fn local_energy<W: MultiWfn>(w: &W, a: &Slater1s, b: &Slater1s, r: &[Vector3<f64>]) -> f64 {
    let lap: f64 = w.laplacian(r).into_iter().sum();
    -0.5 * lap / w.evaluate(r) + h2_potential(r, &a.center, &b.center)
}

/// Nuclei at `±bond_length/2` on the z axis.
fn orbitals(bond_length: f64, alpha: f64) -> (Slater1s, Slater1s) {
    let half = 0.5 * bond_length;
    (
        Slater1s::new(Vector3::new(0.0, 0.0, half), alpha),
        Slater1s::new(Vector3::new(0.0, 0.0, -half), alpha),
    )
}

/// `Ψ = Ψ_MO + c Ψ_VB` with parameters `[c, α, F]`.
///
/// `c` is a linear (CSF-like) coefficient; the shared orbital exponent `α`
/// and the Jastrow length `F` are nonlinear.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct H2MoleculeCI {
    pub orbital1: Slater1s,
    pub orbital2: Slater1s,
    pub jastrow: PairJastrow,
    pub ci_coeff: f64,
}

impl H2MoleculeCI {
    pub fn new(bond_length: f64, alpha: f64, cusp_param: f64, ci_coeff: f64) -> Self {
        let (orbital1, orbital2) = orbitals(bond_length, alpha);
        Self { orbital1, orbital2, jastrow: PairJastrow::new(cusp_param), ci_coeff }
    }

    fn parts(&self, r: &[Vector3<f64>]) -> (Spatial, Spatial) {
        let mo = mo_spatial(&self.orbital1, &self.orbital2, r);
        let vb = vb_spatial(&self.orbital1, &self.orbital2, r);
        (mo, vb)
    }

    fn spatial(&self, r: &[Vector3<f64>]) -> Spatial {
        let (mo, vb) = self.parts(r);
        mo.add_scaled(&vb, self.ci_coeff)
    }
}

impl MultiWfn for H2MoleculeCI {
    fn initialize(&self, rng: &mut dyn RngCore) -> Vec<Vector3<f64>> {
        initial_positions(&self.orbital1, &self.orbital2, rng)
    }

    fn evaluate(&self, r: &[Vector3<f64>]) -> f64 {
        self.spatial(r).value(&self.jastrow, r)
    }

    fn derivative(&self, r: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        self.spatial(r).gradient(&self.jastrow, r)
    }

    fn laplacian(&self, r: &[Vector3<f64>]) -> Vec<f64> {
        self.spatial(r).laplacian(&self.jastrow, r)
    }
}

impl EnergyCalculator for H2MoleculeCI {
    fn local_energy(&self, positions: &[Vector3<f64>]) -> f64 {
        local_energy(self, &self.orbital1, &self.orbital2, positions)
    }
}

impl OptimizableWfn for H2MoleculeCI {
    fn num_params(&self) -> usize {
        3
    }

    fn get_params(&self) -> Vec<f64> {
        vec![self.ci_coeff, self.orbital1.alpha, self.jastrow.cusp_param]
    }

    fn set_params(&mut self, params: &[f64]) {
        self.ci_coeff = params[0];
        self.orbital1.alpha = params[1];
        self.orbital2.alpha = params[1];
        self.jastrow.cusp_param = params[2];
    }

    fn log_derivatives(&self, r: &[Vector3<f64>]) -> Vec<f64> {
        let (mo, vb) = self.parts(r);
        let total = mo.add_scaled(&vb, self.ci_coeff);
        vec![
            vb.value / total.value,
            total.dalpha / total.value,
            self.jastrow.param_derivative(r),
        ]
    }

    fn parameter_kinds(&self) -> Vec<ParameterKind> {
        vec![ParameterKind::Linear, ParameterKind::Nonlinear, ParameterKind::Nonlinear]
    }
}
