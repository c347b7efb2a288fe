//! SPH operators shared by both solvers.
//!
//! Every buffer here is in hash order. Fluid-fluid sums run over the
//! neighbour list of the particle (which contains the particle itself) and
//! fluid-boundary sums over its boundary list, where boundary particle `k`
//! contributes with its phi `Psi_k` in place of a mass.

use glam::{Vec3, Vec4};

use crate::compute::{Device, Kernel, KernelParams};
use crate::config::{PhysicsSettings, SimulationSettings, SolverMethod};
use crate::error::Result;
use crate::grid::NeighborList;
use crate::sph::{st_cohesion, st_curvature, SmoothingKernelConstants};

/// Restitution applied to the normal velocity when a particle hits the
/// container.
pub const CONTAINER_RESTITUTION: f32 = 0.2;

/// PCISPH particles are lighter so that the rest lattice sits slightly
/// below rest density.
pub const PCISPH_MASS_DIVISOR: f32 = 1.15;

/// Mass of one fluid particle of radius `radius`.
///
/// ```text
/// m = rho0 (2 r)^3              WCSPH
/// m = rho0 (2 r)^3 / 1.15       PCISPH
/// ```
pub fn particle_mass(method: SolverMethod, rest_density: f32, radius: f32) -> f32 {
    let spacing = 2.0 * radius;
    let mass = rest_density * spacing * spacing * spacing;
    match method {
        SolverMethod::Wcsph => mass,
        SolverMethod::Pcisph => mass / PCISPH_MASS_DIVISOR,
    }
}

/// Constants bound to every solver kernel.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SphParams {
    /// Kernel normalization constants.
    pub kernels: SmoothingKernelConstants,
    /// Gravity vector.
    pub gravity: Vec3,
    /// Container extents, centred at the origin.
    pub container: Vec3,
    /// Mass of one fluid particle.
    pub particle_mass: f32,
    /// Radius of one fluid particle.
    pub particle_radius: f32,
    /// Rest density.
    pub rest_density: f32,
    /// Kinematic viscosity.
    pub viscosity: f32,
    /// Surface tension coefficient.
    pub surface_tension: f32,
    /// Equation of state stiffness.
    pub gas_stiffness: f32,
    /// Time step.
    pub time_step: f32,
    /// Per-component velocity clamp.
    pub max_vel: f32,
}

impl SphParams {
    /// Derive the constants from the settings.
    pub fn new(physics: &PhysicsSettings, sim: &SimulationSettings, container: Vec3) -> Self {
        Self {
            kernels: SmoothingKernelConstants::new(sim.fluid_support_radius),
            gravity: Vec3::new(0.0, -physics.gravity, 0.0),
            container,
            particle_mass: particle_mass(sim.method, physics.rest_density, sim.fluid_particle_radius),
            particle_radius: sim.fluid_particle_radius,
            rest_density: physics.rest_density,
            viscosity: physics.kinematic_viscosity,
            surface_tension: physics.surface_tension,
            gas_stiffness: physics.gas_stiffness,
            time_step: sim.time_step,
            max_vel: sim.max_vel,
        }
    }
}

impl KernelParams for SphParams {
    fn validate(&self) -> Vec<String> {
        let mut log = Vec::new();
        let h = self.kernels.support_radius;
        if !(h.is_finite() && h > 0.0) {
            log.push(format!("support radius must be positive, got {h}"));
        }
        if !(self.particle_radius > 0.0) {
            log.push(format!("particle radius must be positive, got {}", self.particle_radius));
        }
        if !(self.particle_mass > 0.0) {
            log.push(format!("particle mass must be positive, got {}", self.particle_mass));
        }
        if !(self.rest_density > 0.0) {
            log.push(format!("rest density must be positive, got {}", self.rest_density));
        }
        if !(self.time_step > 0.0) {
            log.push(format!("time step must be positive, got {}", self.time_step));
        }
        if !(self.max_vel > 0.0) {
            log.push(format!("max velocity must be positive, got {}", self.max_vel));
        }
        if !(self.container.min_element() > 0.0) {
            log.push(format!("container extents must be positive, got {}", self.container));
        }
        log
    }
}

/// Kernels run by both solvers.
#[derive(Debug, Clone)]
pub struct SphKernels {
    /// Density summation.
    pub density: Kernel<SphParams>,
    /// Pressure from density (equation of state or correction).
    pub pressure_update: Kernel<SphParams>,
    /// Surface normals.
    pub normals: Kernel<SphParams>,
    /// Gravity, viscosity and surface tension.
    pub non_pressure: Kernel<SphParams>,
    /// Pressure gradient.
    pub pressure: Kernel<SphParams>,
    /// Time integration.
    pub integrate: Kernel<SphParams>,
}

impl SphKernels {
    /// Build every kernel with the same constants.
    pub fn build(device: &Device, params: SphParams) -> Result<Self> {
        Ok(Self {
            density: device.build_kernel("compute_density", params)?,
            pressure_update: device.build_kernel("update_pressure", params)?,
            normals: device.build_kernel("compute_normals", params)?,
            non_pressure: device.build_kernel("compute_non_pressure_forces", params)?,
            pressure: device.build_kernel("compute_pressure_forces", params)?,
            integrate: device.build_kernel("integrate", params)?,
        })
    }

    /// Bound constants.
    pub fn params(&self) -> &SphParams {
        self.density.params()
    }
}

/// Neighbourhood of the sorted fluid for one step.
#[derive(Debug, Clone, Copy)]
pub struct Neighbourhood<'a> {
    /// Sorted fluid positions the lists were built from.
    pub positions: &'a [Vec4],
    /// Fluid-fluid lists.
    pub fluid: &'a NeighborList,
    /// Sorted boundary positions.
    pub boundary_positions: &'a [Vec4],
    /// Sorted boundary velocities.
    pub boundary_velocities: &'a [Vec4],
    /// Sorted boundary phi.
    pub boundary_phi: &'a [f32],
    /// Fluid-boundary lists.
    pub boundary: &'a NeighborList,
}

/// Boundary samples around each sorted fluid particle, read during
/// integration to keep particles out of rigid bodies.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryContact<'a> {
    /// Sorted boundary positions.
    pub positions: &'a [Vec4],
    /// Sorted boundary velocities.
    pub velocities: &'a [Vec4],
    /// Fluid-boundary lists.
    pub neighbors: &'a NeighborList,
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Density at `positions` (the step's positions, or predicted ones):
///
/// ```text
/// rho_i = m sum_j W_poly6(x_i - x_j) + sum_k Psi_k W_poly6(x_i - x_k)
/// ```
///
/// Neighbours that moved out of the support radius contribute nothing.
pub fn compute_density(kernel: &Kernel<SphParams>, positions: &[Vec4], nb: &Neighbourhood<'_>, densities: &mut [f32]) {
    kernel.dispatch(densities, |p, i, rho| {
        let h = p.kernels.support_radius;
        let xi = positions[i].truncate();
        let mut fluid = 0.0;
        for &j in nb.fluid.neighbors(i) {
            let r = (xi - positions[j as usize].truncate()).length();
            if r <= h {
                fluid += p.kernels.poly6(r);
            }
        }
        let mut boundary = 0.0;
        for &k in nb.boundary.neighbors(i) {
            let k = k as usize;
            let r = (xi - nb.boundary_positions[k].truncate()).length();
            if r <= h {
                boundary += nb.boundary_phi[k] * p.kernels.poly6(r);
            }
        }
        *rho = p.particle_mass * fluid + boundary;
    });
}

/// Surface normals `n_i = h sum_j (m / rho_j) grad W_poly6(x_i - x_j)`.
pub fn compute_normals(kernel: &Kernel<SphParams>, nb: &Neighbourhood<'_>, densities: &[f32], normals: &mut [Vec4]) {
    kernel.dispatch(normals, |p, i, n| {
        let xi = nb.positions[i].truncate();
        let mut sum = Vec3::ZERO;
        for &j in nb.fluid.neighbors(i) {
            let j = j as usize;
            let rho_j = densities[j];
            if j == i || rho_j <= f32::EPSILON {
                continue;
            }
            let r = xi - nb.positions[j].truncate();
            sum += (p.particle_mass / rho_j) * p.kernels.poly6_gradient(r, r.length());
        }
        *n = (p.kernels.support_radius * sum).extend(0.0);
    });
}

/// Gravity, viscosity and surface tension accelerations.
///
/// ```text
/// a_visc = nu sum_j m (v_j - v_i) / rho_j lapl W(r_ij)
///        + nu sum_k (Psi_k / rho0) (v_k - v_i) lapl W(r_ik)
/// a_st   = -gamma sum_j K_ij (m C(r_ij) r_ij / |r_ij| + (n_i - n_j))
/// ```
pub fn compute_non_pressure(
    kernel: &Kernel<SphParams>,
    nb: &Neighbourhood<'_>,
    velocities: &[Vec4],
    densities: &[f32],
    normals: &[Vec4],
    accelerations: &mut [Vec4],
) {
    kernel.dispatch(accelerations, |p, i, a| {
        let k = &p.kernels;
        let xi = nb.positions[i].truncate();
        let vi = velocities[i].truncate();
        let ni = normals[i].truncate();
        let rho_i = densities[i];

        let mut viscosity = Vec3::ZERO;
        let mut tension = Vec3::ZERO;
        for &j in nb.fluid.neighbors(i) {
            let j = j as usize;
            let rho_j = densities[j];
            if j == i || rho_j <= f32::EPSILON {
                continue;
            }
            let r = xi - nb.positions[j].truncate();
            let r_norm = r.length();
            let vj = velocities[j].truncate();
            viscosity += (vj - vi) * (p.particle_mass / rho_j * k.viscosity_laplacian(r_norm));

            if rho_i > f32::EPSILON {
                let cohesion = p.particle_mass
                    * k.st_spline
                    * st_cohesion(r, r_norm, k.support_radius, k.st_term, p.rest_density, rho_i, rho_j);
                let curvature = st_curvature(p.rest_density, rho_i, rho_j, ni, normals[j].truncate());
                tension -= p.surface_tension * (cohesion + curvature);
            }
        }
        for &b in nb.boundary.neighbors(i) {
            let b = b as usize;
            let r_norm = (xi - nb.boundary_positions[b].truncate()).length();
            let vb = nb.boundary_velocities[b].truncate();
            viscosity += (vb - vi) * (nb.boundary_phi[b] / p.rest_density * k.viscosity_laplacian(r_norm));
        }

        *a = (p.viscosity * viscosity + tension + p.gravity).extend(0.0);
    });
}

/// Pressure acceleration.
///
/// ```text
/// a_p = -sum_j m (p_i / rho_i^2 + p_j / rho_j^2) grad W_spiky(x_i - x_j)
///       -sum_k Psi_k (max(p_i, 0) / rho_i^2) grad W_spiky(x_i - x_k)
/// ```
pub fn compute_pressure(
    kernel: &Kernel<SphParams>,
    nb: &Neighbourhood<'_>,
    densities: &[f32],
    pressures: &[f32],
    accelerations: &mut [Vec4],
) {
    kernel.dispatch(accelerations, |p, i, a| {
        let rho_i = densities[i];
        if rho_i <= f32::EPSILON {
            *a = Vec4::ZERO;
            return;
        }
        let xi = nb.positions[i].truncate();
        let term_i = pressures[i] / (rho_i * rho_i);
        let mut sum = Vec3::ZERO;
        for &j in nb.fluid.neighbors(i) {
            let j = j as usize;
            let rho_j = densities[j];
            if j == i || rho_j <= f32::EPSILON {
                continue;
            }
            let r = xi - nb.positions[j].truncate();
            let term_j = pressures[j] / (rho_j * rho_j);
            sum -= p.particle_mass * (term_i + term_j) * p.kernels.spiky_gradient(r, r.length());
        }
        let term_b = pressures[i].max(0.0) / (rho_i * rho_i);
        for &b in nb.boundary.neighbors(i) {
            let b = b as usize;
            let r = xi - nb.boundary_positions[b].truncate();
            sum -= nb.boundary_phi[b] * term_b * p.kernels.spiky_gradient(r, r.length());
        }
        *a = sum.extend(0.0);
    });
}

// ---------------------------------------------------------------------------
// Integration helpers
// ---------------------------------------------------------------------------

/// Clamp each velocity component to `[-max_vel, max_vel]`.
#[inline]
pub fn clamp_velocity(v: Vec3, max_vel: f32) -> Vec3 {
    v.clamp(Vec3::splat(-max_vel), Vec3::splat(max_vel))
}

/// Clamp `x` into the origin-centred box of extents `container` and reflect
/// the outward component of each velocity with [`CONTAINER_RESTITUTION`].
#[inline]
pub fn confine<const N: usize>(container: Vec3, x: Vec3, mut velocities: [Vec3; N]) -> (Vec3, [Vec3; N]) {
    let half = 0.5 * container;
    let mut x = x.to_array();
    for axis in 0..3 {
        let outward = if x[axis] < -half[axis] {
            x[axis] = -half[axis];
            -1.0
        } else if x[axis] > half[axis] {
            x[axis] = half[axis];
            1.0
        } else {
            continue;
        };
        for v in velocities.iter_mut() {
            if v[axis] * outward > 0.0 {
                v[axis] *= -CONTAINER_RESTITUTION;
            }
        }
    }
    (Vec3::from_array(x), velocities)
}

/// Keep sorted particle `i`, moved to `x`, at least one particle radius
/// outside the boundary surface sampled around it.
///
/// The local surface is the kernel-weighted mean of the boundary samples in
/// the particle's list:
///
/// ```text
/// d = sum_k W(x - x_k) (x - x_k) / sum_k W(x - x_k)
/// n = d / |d|
/// ```
///
/// When `|d|` is below the particle radius the particle is projected out
/// along `n`, and the inward normal component of each velocity relative to
/// the surface is reflected with [`CONTAINER_RESTITUTION`].
pub fn resolve_boundary_contact<const N: usize>(
    p: &SphParams,
    contact: &BoundaryContact<'_>,
    i: usize,
    x: Vec3,
    mut velocities: [Vec3; N],
) -> (Vec3, [Vec3; N]) {
    let h = p.kernels.support_radius;
    let mut weight = 0.0;
    let mut offset = Vec3::ZERO;
    let mut surface_velocity = Vec3::ZERO;
    for &k in contact.neighbors.neighbors(i) {
        let k = k as usize;
        let d = x - contact.positions[k].truncate();
        let r = d.length();
        if r >= h {
            continue;
        }
        let w = p.kernels.poly6(r);
        weight += w;
        offset += w * d;
        surface_velocity += w * contact.velocities[k].truncate();
    }
    if weight <= 0.0 {
        return (x, velocities);
    }
    let offset = offset / weight;
    let depth = p.particle_radius - offset.length();
    let Some(normal) = offset.try_normalize() else {
        return (x, velocities);
    };
    if depth <= 0.0 {
        return (x, velocities);
    }

    let surface_velocity = surface_velocity / weight;
    for v in velocities.iter_mut() {
        let approach = (*v - surface_velocity).dot(normal);
        if approach < 0.0 {
            *v -= (1.0 + CONTAINER_RESTITUTION) * approach * normal;
        }
    }
    (x + depth * normal, velocities)
}

/// Symplectic Euler step with velocity clamp and container.
#[inline]
pub fn advance(p: &SphParams, x: Vec4, v: Vec4, a: Vec3) -> (Vec4, Vec4) {
    let v = clamp_velocity(v.truncate() + a * p.time_step, p.max_vel);
    let x = x.truncate() + v * p.time_step;
    let (x, [v]) = confine(p.container, x, [v]);
    (x.extend(1.0), v.extend(0.0))
}
