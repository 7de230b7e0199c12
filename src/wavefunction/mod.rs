//! Wavefunction traits and orbitals.

mod traits;
mod slater;

pub use traits::{SingleWfn, MultiWfn, OptimizableWfn};
pub use slater::Slater1s;
