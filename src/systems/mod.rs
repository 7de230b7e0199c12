//! Physical systems.

mod hydrogen;

pub use hydrogen::{h2_potential, H2MoleculeCI};
