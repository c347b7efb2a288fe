//! Rigid-body boundaries as particles (Akinci et al. 2012).
//!
//! Each rigid body added to the handler becomes a [`BoundarySurface`]: its
//! surface is sampled into body-local points stored in one shared buffer,
//! the surface owning the contiguous range `[origin, origin + size)`. Every
//! resample rebuilds all ranges together, in insertion order.
//!
//! Boundary particles carry a volume-derived density contribution, phi,
//! that corrects the density deficiency of fluid particles near walls:
//!
//! ```text
//! phi_b = rho0 / sum_k W_poly6(x_b - x_k) / phi_coefficient
//! ```
//!
//! where `k` runs over the samples of the same surface. The handler also keeps
//! a hash-sorted copy of all boundary particles with its own cell intervals,
//! so the fluid can search boundary neighbours with the same grid.

use std::ops::Range;
use std::sync::{Arc, Weak};

use glam::{Affine3A, Vec3, Vec4};

use crate::body::RigidBody;
use crate::compute::{reduce_sum, Device, DeviceBuffer, Kernel, KernelParams};
use crate::config::{PhysicsSettings, SimulationSettings};
use crate::error::Result;
use crate::grid::{CellInterval, NeighborList, NeighborStats, UniformGrid};
use crate::sort::SortPipeline;
use crate::sph::SmoothingKernelConstants;

/// Sampling state of a [`BoundaryHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    /// No surface has been added yet.
    Unsampled,
    /// Surfaces are sampled, buffers allocated and phi computed.
    Sampled,
}

/// One rigid body's view into the shared boundary buffers.
#[derive(Debug, Clone)]
pub struct BoundarySurface {
    id: String,
    body: Weak<dyn RigidBody>,
    can_move: bool,
    origin: usize,
    size: usize,
    pose: Affine3A,
}

impl BoundarySurface {
    /// Caller-supplied identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the surface follows its body on every sync.
    pub fn can_move(&self) -> bool {
        self.can_move
    }

    /// First particle of the surface in the unsorted boundary buffers.
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// Number of particles of the surface.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `origin..origin + size`.
    pub fn range(&self) -> Range<usize> {
        self.origin..self.origin + self.size
    }

    /// The owning body, if it is still alive.
    pub fn body(&self) -> Option<Arc<dyn RigidBody>> {
        self.body.upgrade()
    }
}

/// Sorted fluid state read by [`BoundaryHandler::apply_fluid_forces`].
#[derive(Debug, Clone, Copy)]
pub struct FluidView<'a> {
    /// Hash-sorted fluid positions.
    pub positions: &'a [Vec4],
    /// Fluid velocities, in the same order.
    pub velocities: &'a [Vec4],
    /// Fluid densities, in the same order.
    pub densities: &'a [f32],
    /// Fluid pressures, in the same order.
    pub pressures: &'a [f32],
    /// Cell intervals of the sorted fluid.
    pub cell_intervals: &'a [CellInterval],
    /// Mass of one fluid particle.
    pub particle_mass: f32,
    /// Kinematic viscosity of the fluid.
    pub viscosity: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct BoundaryParams {
    kernels: SmoothingKernelConstants,
    rest_density: f32,
    phi_coefficient: f32,
    particle_spacing: f32,
}

impl BoundaryParams {
    fn new(physics: &PhysicsSettings, sim: &SimulationSettings) -> Self {
        Self {
            kernels: SmoothingKernelConstants::new(sim.fluid_support_radius),
            rest_density: physics.rest_density,
            phi_coefficient: sim.phi_coefficient,
            particle_spacing: 2.0 * sim.boundary_particle_radius,
        }
    }
}

impl KernelParams for BoundaryParams {
    fn validate(&self) -> Vec<String> {
        let mut log = Vec::new();
        let h = self.kernels.support_radius;
        if !(h.is_finite() && h > 0.0) {
            log.push(format!("support radius must be positive, got {h}"));
        }
        if !(self.particle_spacing.is_finite() && self.particle_spacing > 0.0) {
            log.push(format!("boundary particle spacing must be positive, got {}", self.particle_spacing));
        }
        if self.rest_density <= 0.0 {
            log.push(format!("rest density must be positive, got {}", self.rest_density));
        }
        if self.phi_coefficient <= 0.0 {
            log.push(format!("phi coefficient must be positive, got {}", self.phi_coefficient));
        }
        log
    }
}

#[derive(Debug, Clone)]
struct BoundaryKernels {
    transform: Kernel<BoundaryParams>,
    phi: Kernel<BoundaryParams>,
    fluid_forces: Kernel<BoundaryParams>,
}

impl BoundaryKernels {
    fn build(device: &Device, params: BoundaryParams) -> Result<Self> {
        Ok(Self {
            transform: device.build_kernel("transform_boundary", params)?,
            phi: device.build_kernel("compute_boundary_phi", params)?,
            fluid_forces: device.build_kernel("boundary_fluid_forces", params)?,
        })
    }

    fn params(&self) -> &BoundaryParams {
        self.transform.params()
    }
}

/// Owner of every boundary particle.
#[derive(Debug)]
pub struct BoundaryHandler {
    device: Device,
    grid: UniformGrid,
    sort: SortPipeline,
    kernels: BoundaryKernels,
    state: BoundaryState,
    surfaces: Vec<BoundarySurface>,

    local_positions: DeviceBuffer<Vec4>,
    positions: DeviceBuffer<Vec4>,
    velocities: DeviceBuffer<Vec4>,
    phi: DeviceBuffer<f32>,
    hashes: DeviceBuffer<u32>,
    mask: DeviceBuffer<u32>,
    sorted_positions: DeviceBuffer<Vec4>,
    sorted_velocities: DeviceBuffer<Vec4>,
    sorted_phi: DeviceBuffer<f32>,
    cell_intervals: DeviceBuffer<CellInterval>,
    forces: DeviceBuffer<Vec4>,
    torques: DeviceBuffer<Vec4>,
}

impl BoundaryHandler {
    /// Create an empty handler. The grid matches the fluid grid: same
    /// domain, cells of one support radius.
    pub fn new(device: &Device, physics: &PhysicsSettings, sim: &SimulationSettings) -> Result<Self> {
        let grid = UniformGrid::new(device, sim.grid_size, sim.fluid_support_radius, sim.hash_encoding)?;
        let cell_intervals = DeviceBuffer::zeroed("boundary_cell_intervals", grid.cell_count())?;
        Ok(Self {
            device: device.clone(),
            sort: SortPipeline::new(device)?,
            kernels: BoundaryKernels::build(device, BoundaryParams::new(physics, sim))?,
            grid,
            state: BoundaryState::Unsampled,
            surfaces: Vec::new(),
            local_positions: DeviceBuffer::new("boundary_local_positions"),
            positions: DeviceBuffer::new("boundary_positions"),
            velocities: DeviceBuffer::new("boundary_velocities"),
            phi: DeviceBuffer::new("boundary_phi"),
            hashes: DeviceBuffer::new("boundary_hashes"),
            mask: DeviceBuffer::new("boundary_mask"),
            sorted_positions: DeviceBuffer::new("boundary_sorted_positions"),
            sorted_velocities: DeviceBuffer::new("boundary_sorted_velocities"),
            sorted_phi: DeviceBuffer::new("boundary_sorted_phi"),
            cell_intervals,
            forces: DeviceBuffer::new("boundary_forces"),
            torques: DeviceBuffer::new("boundary_torques"),
        })
    }

    // -----------------------------------------------------------------------
    // Surfaces and parameters
    // -----------------------------------------------------------------------

    /// Add a rigid body as a boundary and resample every surface.
    ///
    /// The handler keeps a weak handle only; the caller owns the body.
    ///
    /// # Arguments
    /// * `body` - The rigid body.
    /// * `id` - Identifier reported in logs.
    /// * `can_move` - Whether [`BoundaryHandler::sync`] follows the body
    ///   every step. Static surfaces are transformed only on resample.
    pub fn add_boundary(&mut self, body: &Arc<dyn RigidBody>, id: impl Into<String>, can_move: bool) -> Result<()> {
        let surface = BoundarySurface {
            id: id.into(),
            body: Arc::downgrade(body),
            can_move,
            origin: 0,
            size: 0,
            pose: body.transform(),
        };
        tracing::info!(id = %surface.id, can_move, mass = body.mass(), "boundary added");
        self.surfaces.push(surface);
        self.resample()
    }

    /// Change the boundary particle radius (spacing is twice the radius).
    pub fn set_particle_radius(&mut self, radius: f32) -> Result<()> {
        let mut params = *self.kernels.params();
        params.particle_spacing = 2.0 * radius;
        self.update_params(params)
    }

    /// Change the kernel support radius used for phi and fluid forces. The
    /// grid cells follow, so neighbour scans stay within the support.
    pub fn set_support_radius(&mut self, support_radius: f32) -> Result<()> {
        self.set_cell_size(support_radius)?;
        let mut params = *self.kernels.params();
        params.kernels = SmoothingKernelConstants::new(support_radius);
        self.update_params(params)
    }

    /// Change the divisor applied to phi.
    pub fn set_phi_coefficient(&mut self, phi_coefficient: f32) -> Result<()> {
        let mut params = *self.kernels.params();
        params.phi_coefficient = phi_coefficient;
        self.update_params(params)
    }

    /// Change the grid cell size. Rebuilds the interval buffer and re-sorts.
    pub fn set_cell_size(&mut self, cell_size: f32) -> Result<()> {
        if cell_size == self.grid.info().cell_size {
            return Ok(());
        }
        self.grid.set_cell_size(cell_size)?;
        self.cell_intervals.reallocate(self.grid.cell_count())?;
        if self.state == BoundaryState::Sampled {
            self.sort_particles();
        }
        Ok(())
    }

    /// Apply new settings, resampling at most once.
    pub fn reconfigure(&mut self, physics: &PhysicsSettings, sim: &SimulationSettings) -> Result<()> {
        let info = self.grid.info();
        if info.size != sim.grid_size || self.grid.encoding() != sim.hash_encoding {
            self.grid = UniformGrid::new(&self.device, sim.grid_size, sim.fluid_support_radius, sim.hash_encoding)?;
            self.cell_intervals.reallocate(self.grid.cell_count())?;
        } else {
            self.set_cell_size(sim.fluid_support_radius)?;
        }
        let params = BoundaryParams::new(physics, sim);
        if params == *self.kernels.params() {
            if self.state == BoundaryState::Sampled {
                self.sort_particles();
            }
            return Ok(());
        }
        self.update_params(params)
    }

    fn update_params(&mut self, params: BoundaryParams) -> Result<()> {
        if params == *self.kernels.params() {
            return Ok(());
        }
        self.kernels = BoundaryKernels::build(&self.device, params)?;
        if self.surfaces.is_empty() {
            return Ok(());
        }
        self.resample()
    }

    /// Sample every surface again, rebuild the ranges, recompute phi and
    /// transform all surfaces.
    fn resample(&mut self) -> Result<()> {
        let spacing = self.kernels.params().particle_spacing;
        let mut local = Vec::new();
        for surface in self.surfaces.iter_mut() {
            let origin = local.len();
            match surface.body.upgrade() {
                Some(body) => {
                    local.extend(body.surface_sampling(spacing).into_iter().map(|p| p.extend(1.0)));
                }
                None => {
                    tracing::warn!(id = %surface.id, "rigid body dropped; keeping its last boundary samples");
                    local.extend_from_slice(&self.local_positions[surface.range()]);
                }
            }
            surface.origin = origin;
            surface.size = local.len() - origin;
        }

        let count = local.len();
        self.local_positions.upload(&local)?;
        for buffer in [&mut self.positions, &mut self.velocities, &mut self.sorted_positions, &mut self.sorted_velocities] {
            buffer.reallocate(count)?;
        }
        for buffer in [&mut self.forces, &mut self.torques] {
            buffer.reallocate(count)?;
        }
        for buffer in [&mut self.phi, &mut self.sorted_phi] {
            buffer.reallocate(count)?;
        }
        self.hashes.reallocate(count)?;
        self.mask.reallocate(count)?;
        self.sort.reserve(count)?;

        self.compute_phi();
        self.state = BoundaryState::Sampled;
        self.sync(true);

        tracing::info!(
            surfaces = self.surfaces.len(),
            particles = count,
            spacing,
            "boundary resampled"
        );
        Ok(())
    }

    /// Phi of every surface, from its own body-local samples. Uses the sorted
    /// buffers as scratch; [`BoundaryHandler::sync`] rebuilds them afterwards.
    fn compute_phi(&mut self) {
        for surface in &self.surfaces {
            let range = surface.range();
            let n = range.len();
            if n == 0 {
                continue;
            }
            let local = &self.local_positions[range.clone()];
            let hashes = &mut self.hashes[..n];
            let mask = &mut self.mask[..n];
            self.grid.compute_hashes(local, hashes, mask);
            self.sort.radix_sort(hashes, mask);
            let sorted = &mut self.sorted_positions[..n];
            self.sort.gather(local, mask, sorted);
            self.grid.compute_cell_intervals(sorted, hashes, &mut self.cell_intervals);

            let sorted = &self.sorted_positions[..n];
            let grid = &self.grid;
            let intervals = &self.cell_intervals;
            self.kernels.phi.dispatch(&mut self.sorted_phi[..n], |p, i, phi| {
                // Includes the particle itself, so the sum is positive.
                let h = p.kernels.support_radius;
                let mut sum = 0.0;
                grid.for_each_neighbor(sorted[i], sorted, intervals, |_, _, r| {
                    if r <= h {
                        sum += p.kernels.poly6(r);
                    }
                    true
                });
                *phi = p.rest_density / sum / p.phi_coefficient;
            });
            self.sort.scatter(&self.sorted_phi[..n], &self.mask[..n], &mut self.phi[range]);
        }
    }

    // -----------------------------------------------------------------------
    // Per-step operations
    // -----------------------------------------------------------------------

    /// Move boundary particles to their bodies' current poses and re-sort.
    ///
    /// Only movable surfaces are transformed unless `sync_all` is set. A
    /// surface whose body was dropped keeps its last pose and gets zero
    /// velocity. Nothing is re-sorted when no surface was transformed.
    pub fn sync(&mut self, sync_all: bool) {
        if self.state == BoundaryState::Unsampled || self.local_positions.is_empty() {
            return;
        }
        let mut moved = false;
        for surface in self.surfaces.iter_mut() {
            if surface.size == 0 || !(sync_all || surface.can_move) {
                continue;
            }
            let (pose, linear, angular) = match surface.body.upgrade() {
                Some(body) => (body.transform(), body.linear_vel(), body.angular_vel()),
                None if sync_all => (surface.pose, Vec3::ZERO, Vec3::ZERO),
                None => continue,
            };
            surface.pose = pose;

            let range = surface.range();
            let local = &self.local_positions[range.clone()];
            let centre = Vec3::from(pose.translation);
            self.kernels.transform.dispatch_zip(
                &mut self.positions[range.clone()],
                &mut self.velocities[range],
                |_, i, x, v| {
                    let arm = pose.transform_vector3(local[i].truncate());
                    *x = (centre + arm).extend(1.0);
                    *v = (linear + angular.cross(arm)).extend(0.0);
                },
            );
            moved = true;
        }
        if moved {
            self.sort_particles();
        }
    }

    /// Hash, sort and gather every boundary particle, then rebuild intervals.
    fn sort_particles(&mut self) {
        self.grid.compute_hashes(&self.positions, &mut self.hashes, &mut self.mask);
        self.sort.radix_sort(&mut self.hashes, &mut self.mask);
        self.sort.gather(&self.positions, &self.mask, &mut self.sorted_positions);
        self.sort.gather(&self.velocities, &self.mask, &mut self.sorted_velocities);
        self.sort.gather(&self.phi, &self.mask, &mut self.sorted_phi);
        self.grid.compute_cell_intervals(&self.sorted_positions, &self.hashes, &mut self.cell_intervals);
    }

    /// Build fluid-boundary neighbour lists.
    ///
    /// With no boundary particles every row is emptied and no search runs.
    pub fn build_neighbourhood(&self, fluid_positions: &[Vec4], list: &mut NeighborList) -> NeighborStats {
        if self.sorted_positions.is_empty() {
            list.clear();
            return NeighborStats::default();
        }
        self.grid.compute_neighbor_list(fluid_positions, &self.sorted_positions, &self.cell_intervals, list)
    }

    /// Push the fluid's pressure and viscous forces onto dynamic bodies.
    ///
    /// For boundary particle `k` of a body with positive mass, summed over
    /// fluid neighbours `i`:
    ///
    /// ```text
    /// F_k = m Psi_k (p_i / rho_i^2) grad W_spiky(x_i - x_k)
    ///     - m nu (Psi_k / rho0) (v_k - v_i) lapl W_visc(|x_i - x_k|)
    /// T_k = (x_k - x_cm) x F_k
    /// ```
    ///
    /// Negative pressures are clamped to zero. Each body receives the sums
    /// over its surface.
    pub fn apply_fluid_forces(&mut self, fluid: &FluidView<'_>) {
        if self.local_positions.is_empty() || fluid.positions.is_empty() {
            return;
        }
        for surface in &self.surfaces {
            let Some(body) = surface.body.upgrade() else {
                continue;
            };
            if body.mass() <= 0.0 || surface.size == 0 {
                continue;
            }
            let range = surface.range();
            let centre = body.position();
            let positions = &self.positions[range.clone()];
            let velocities = &self.velocities[range.clone()];
            let phi = &self.phi[range.clone()];
            let grid = &self.grid;

            self.kernels.fluid_forces.dispatch_zip(
                &mut self.forces[range.clone()],
                &mut self.torques[range.clone()],
                |p, k, f, t| {
                    let xk = positions[k];
                    let vk = velocities[k].truncate();
                    let psi = phi[k];
                    let mut force = Vec3::ZERO;
                    grid.for_each_neighbor(xk, fluid.positions, fluid.cell_intervals, |i, r, r_norm| {
                        let rho = fluid.densities[i];
                        if rho <= f32::EPSILON || r_norm > p.kernels.support_radius {
                            return true;
                        }
                        let pressure = fluid.pressures[i].max(0.0);
                        let vi = fluid.velocities[i].truncate();
                        // r = x_k - x_i
                        force += fluid.particle_mass * psi * (pressure / (rho * rho))
                            * p.kernels.spiky_gradient(-r, r_norm);
                        force -= fluid.particle_mass * fluid.viscosity * (psi / p.rest_density)
                            * p.kernels.viscosity_laplacian(r_norm)
                            * (vk - vi);
                        true
                    });
                    *f = force.extend(0.0);
                    *t = (xk.truncate() - centre).cross(force).extend(0.0);
                },
            );

            let force = reduce_sum(&self.forces[range.clone()]).truncate();
            let torque = reduce_sum(&self.torques[range]).truncate();
            tracing::trace!(id = %surface.id, ?force, ?torque, "fluid force on body");
            body.apply_force_n_torque(force, torque);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Sampling state.
    pub fn state(&self) -> BoundaryState {
        self.state
    }

    /// Total number of boundary particles.
    pub fn particle_count(&self) -> usize {
        self.local_positions.len()
    }

    /// Surfaces in insertion order.
    pub fn surfaces(&self) -> &[BoundarySurface] {
        &self.surfaces
    }

    /// World-space positions in surface order.
    pub fn positions(&self) -> &[Vec4] {
        &self.positions
    }

    /// Velocities in surface order.
    pub fn velocities(&self) -> &[Vec4] {
        &self.velocities
    }

    /// Phi in surface order.
    pub fn phi(&self) -> &[f32] {
        &self.phi
    }

    /// Hash-sorted positions.
    pub fn sorted_positions(&self) -> &[Vec4] {
        &self.sorted_positions
    }

    /// Velocities in hash order.
    pub fn sorted_velocities(&self) -> &[Vec4] {
        &self.sorted_velocities
    }

    /// Phi in hash order.
    pub fn sorted_phi(&self) -> &[f32] {
        &self.sorted_phi
    }

    /// Cell intervals of the sorted boundary particles.
    pub fn cell_intervals(&self) -> &[CellInterval] {
        &self.cell_intervals
    }

    /// Grid used for the boundary particles.
    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    /// Current boundary particle radius.
    pub fn particle_radius(&self) -> f32 {
        0.5 * self.kernels.params().particle_spacing
    }

    /// Current support radius.
    pub fn support_radius(&self) -> f32 {
        self.kernels.params().kernels.support_radius
    }

    /// Current phi divisor.
    pub fn phi_coefficient(&self) -> f32 {
        self.kernels.params().phi_coefficient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::KinematicBody;
    use crate::sampling::Shape;

    fn settings() -> (PhysicsSettings, SimulationSettings) {
        let sim = SimulationSettings { grid_size: 1.0, ..Default::default() };
        (PhysicsSettings::default(), sim)
    }

    fn handler() -> BoundaryHandler {
        let (physics, sim) = settings();
        BoundaryHandler::new(&Device::default(), &physics, &sim).unwrap()
    }

    fn plane(position: Vec3, mass: f32) -> Arc<dyn RigidBody> {
        Arc::new(KinematicBody::new(Shape::Plane { width: 0.2, depth: 0.2 }, mass, position))
    }

    #[test]
    fn starts_unsampled() {
        let h = handler();
        assert_eq!(h.state(), BoundaryState::Unsampled);
        assert_eq!(h.particle_count(), 0);

        let mut list = NeighborList::new("nl", 4);
        list.allocate(1).unwrap();
        let stats = h.build_neighbourhood(&[Vec4::W], &mut list);
        assert_eq!(stats.truncated, 0);
        assert!(list.neighbors(0).is_empty());
    }

    #[test]
    fn add_boundary_samples_and_computes_phi() {
        let mut h = handler();
        let body = plane(Vec3::new(0.0, -0.1, 0.0), 0.0);
        h.add_boundary(&body, "floor", false).unwrap();
        assert_eq!(h.state(), BoundaryState::Sampled);
        // 0.2 / 0.016 = 12.5 -> 13 samples per side.
        assert_eq!(h.particle_count(), 13 * 13);
        assert!(h.phi().iter().all(|&p| p.is_finite() && p > 0.0));
        assert!(h.positions().iter().all(|p| (p.y + 0.1).abs() < 1e-6 && p.w == 1.0));

        // Edge samples have fewer neighbours, hence a larger phi.
        let centre = h.positions().iter().position(|p| p.x.abs() < 1e-3 && p.z.abs() < 1e-3).unwrap();
        assert!(h.phi()[0] > h.phi()[centre]);
    }

    #[test]
    fn ranges_stay_contiguous() {
        let mut h = handler();
        let a = plane(Vec3::ZERO, 0.0);
        let b = plane(Vec3::Y * 0.3, 1.0);
        h.add_boundary(&a, "a", false).unwrap();
        h.add_boundary(&b, "b", true).unwrap();
        let s = h.surfaces();
        assert_eq!(s[0].range(), 0..169);
        assert_eq!(s[1].range(), 169..338);
    }

    #[test]
    fn radius_change_resamples() {
        let mut h = handler();
        let body = plane(Vec3::ZERO, 0.0);
        h.add_boundary(&body, "floor", false).unwrap();
        let before = h.particle_count();
        h.set_particle_radius(0.02).unwrap();
        assert!(h.particle_count() < before);
        assert!((h.particle_radius() - 0.02).abs() < 1e-7);

        // Same value: nothing to do.
        let phi = h.phi().to_vec();
        h.set_particle_radius(0.02).unwrap();
        assert_eq!(h.phi(), &phi[..]);
    }

    #[test]
    fn phi_coefficient_divides_phi() {
        let mut h = handler();
        let body = plane(Vec3::ZERO, 0.0);
        h.add_boundary(&body, "floor", false).unwrap();
        let phi = h.phi().to_vec();
        h.set_phi_coefficient(2.0).unwrap();
        for (a, b) in phi.iter().zip(h.phi()) {
            assert!((a / 2.0 - b).abs() <= 1e-3 * a);
        }
    }

    #[test]
    fn support_radius_change_moves_grid_cells() {
        let mut h = handler();
        let body = plane(Vec3::ZERO, 0.0);
        h.add_boundary(&body, "floor", false).unwrap();

        for support in [0.02, 0.05] {
            h.set_support_radius(support).unwrap();
            assert_eq!(h.grid().info().cell_size, support);
            assert_eq!(h.cell_intervals().len(), h.grid().cell_count());
            let bad = h.phi().iter().filter(|p| !(p.is_finite() && **p > 0.0)).count();
            assert_eq!(bad, 0, "support {support}: {bad} of {} phi values not positive", h.phi().len());
        }
    }

    #[test]
    fn moving_surface_follows_body() {
        let mut h = handler();
        let body = Arc::new(KinematicBody::new(Shape::Plane { width: 0.1, depth: 0.1 }, 1.0, Vec3::ZERO));
        let dyn_body: Arc<dyn RigidBody> = body.clone();
        h.add_boundary(&dyn_body, "paddle", true).unwrap();

        body.set_pose(Vec3::new(0.0, 0.2, 0.0), glam::Quat::IDENTITY);
        body.set_velocity(Vec3::X, Vec3::ZERO);
        h.sync(false);
        assert!(h.positions().iter().all(|p| (p.y - 0.2).abs() < 1e-6));
        assert!(h.velocities().iter().all(|v| (v.truncate() - Vec3::X).length() < 1e-6));
        assert!(h.sorted_positions().iter().all(|p| (p.y - 0.2).abs() < 1e-6));
    }

    #[test]
    fn dropped_body_keeps_samples_without_forces() {
        let mut h = handler();
        let body = plane(Vec3::ZERO, 1.0);
        h.add_boundary(&body, "gone", true).unwrap();
        let count = h.particle_count();
        drop(body);

        let keep = plane(Vec3::Y, 0.0);
        h.add_boundary(&keep, "kept", false).unwrap();
        assert_eq!(h.surfaces()[0].size(), count);
        assert!(h.surfaces()[0].body().is_none());
        h.sync(false);
    }
}
