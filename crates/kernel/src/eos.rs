//! Equation of state of the weakly compressible solver.

/// Linear equation of state.
///
/// ```text
/// P = k (rho - rho0)
/// ```
///
/// # Arguments
/// * `density` - Current density rho (kg/m^3).
/// * `rest_density` - Reference rest density rho0 (kg/m^3).
/// * `gas_stiffness` - Stiffness k.
///
/// # Returns
/// Pressure. Negative (tension) if `density < rest_density`.
pub fn linear_eos(density: f32, rest_density: f32, gas_stiffness: f32) -> f32 {
    gas_stiffness * (density - rest_density)
}
