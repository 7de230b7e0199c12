use nalgebra::Vector3;

/// Local energy `E_L = HΨ / Ψ` at a configuration.
pub trait EnergyCalculator {
    fn local_energy(&self, positions: &[Vector3<f64>]) -> f64;
}
