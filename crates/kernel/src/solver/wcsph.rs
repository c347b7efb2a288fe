//! Weakly compressible SPH.
//!
//! Pressure comes straight from density through the linear equation of
//! state. Time integration is leapfrog: half-step velocities are kept
//! between steps and full-step velocities are their running average.

use glam::Vec4;

use crate::body::FluidVolume;
use crate::compute::{Device, DeviceBuffer};
use crate::config::{PhysicsSettings, SimulationSettings};
use crate::eos::linear_eos;
use crate::error::Result;
use crate::grid::NeighborStats;

use super::operators::{
    clamp_velocity, compute_density, compute_non_pressure, compute_normals, compute_pressure, confine,
    resolve_boundary_contact, BoundaryContact, Neighbourhood,
};
use super::{delegate_to_core, FluidSimulation, SolverCore};

/// Neighbour list capacity per particle.
pub const WCSPH_MAX_NEIGHBORS: usize = 100;

/// Weakly compressible solver.
pub struct WcsphSolver {
    core: SolverCore,
    /// Half-step velocities in render order.
    velocities_half: DeviceBuffer<Vec4>,
    /// Half-step velocities in hash order.
    sorted_velocities_half: DeviceBuffer<Vec4>,
}

impl WcsphSolver {
    /// Create an empty solver. Fluid is added with
    /// [`FluidSimulation::add_volume`].
    pub fn new(device: &Device, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<Self> {
        let mut solver = Self {
            core: SolverCore::new(device, physics, settings, WCSPH_MAX_NEIGHBORS)?,
            velocities_half: DeviceBuffer::new("fluid_velocities_half"),
            sorted_velocities_half: DeviceBuffer::new("fluid_sorted_velocities_half"),
        };
        solver.initialize()?;
        Ok(solver)
    }

    fn initialize(&mut self) -> Result<()> {
        let count = self.core.fluid.len();
        self.velocities_half.reallocate(count)?;
        self.sorted_velocities_half.reallocate(count)?;
        Ok(())
    }

    /// Neighbour search statistics of the last step.
    pub fn neighbor_stats(&self) -> NeighborStats {
        self.core.neighbor_stats
    }

    /// Densities of the last step, in hash order.
    pub fn densities(&self) -> &[f32] {
        &self.core.fluid.densities
    }

    fn step(&mut self) {
        let SolverCore { grid, sort, boundary, render, fluid, kernels, neighbor_stats, .. } = &mut self.core;

        boundary.sync(false);
        if fluid.is_empty() {
            return;
        }
        let mut positions = render.acquire();

        fluid.sort(grid, sort, &positions);
        sort.gather(&self.velocities_half, &fluid.mask, &mut self.sorted_velocities_half);
        *neighbor_stats = fluid.build_neighbourhood(grid, boundary);

        let nb = Neighbourhood {
            positions: &fluid.sorted_positions,
            fluid: &fluid.fluid_neighbors,
            boundary_positions: boundary.sorted_positions(),
            boundary_velocities: boundary.sorted_velocities(),
            boundary_phi: boundary.sorted_phi(),
            boundary: &fluid.boundary_neighbors,
        };

        compute_density(&kernels.density, &fluid.sorted_positions, &nb, &mut fluid.densities);
        let densities = &fluid.densities;
        kernels.pressure_update.dispatch(&mut fluid.pressures, |p, i, pressure| {
            *pressure = linear_eos(densities[i], p.rest_density, p.gas_stiffness);
        });
        compute_normals(&kernels.normals, &nb, &fluid.densities, &mut fluid.normals);
        compute_non_pressure(
            &kernels.non_pressure,
            &nb,
            &fluid.sorted_velocities,
            &fluid.densities,
            &fluid.normals,
            &mut fluid.accelerations,
        );
        compute_pressure(&kernels.pressure, &nb, &fluid.densities, &fluid.pressures, &mut fluid.pressure_accelerations);

        let params = kernels.params();
        boundary.apply_fluid_forces(&fluid.view(params.particle_mass, params.viscosity));

        let contact = BoundaryContact {
            positions: boundary.sorted_positions(),
            velocities: boundary.sorted_velocities(),
            neighbors: &fluid.boundary_neighbors,
        };

        // Leapfrog:
        //   v(t+dt/2) = v(t-dt/2) + a dt
        //   x(t+dt)   = x(t) + v(t+dt/2) dt
        //   v(t)      = (v(t-dt/2) + v(t+dt/2)) / 2
        let accelerations = &fluid.accelerations;
        let pressure_accelerations = &fluid.pressure_accelerations;
        kernels.integrate.dispatch_zip3(
            &mut fluid.sorted_positions,
            &mut fluid.sorted_velocities,
            &mut self.sorted_velocities_half,
            |p, i, x, v, v_half| {
                let a = accelerations[i].truncate() + pressure_accelerations[i].truncate();
                let half = clamp_velocity(v_half.truncate() + a * p.time_step, p.max_vel);
                let next = x.truncate() + half * p.time_step;
                let full = 0.5 * (v_half.truncate() + half);
                let (next, [full, half]) = resolve_boundary_contact(p, &contact, i, next, [full, half]);
                let (next, [full, half]) = confine(p.container, next, [full, half]);
                *x = next.extend(x.w);
                *v = full.extend(0.0);
                *v_half = half.extend(0.0);
            },
        );

        fluid.write_back(sort, &mut positions);
        sort.scatter(&self.sorted_velocities_half, &fluid.mask, &mut self.velocities_half);
    }
}

impl FluidSimulation for WcsphSolver {
    fn simulate(&mut self) {
        self.step();
    }

    fn reset(&mut self, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<()> {
        self.core.reset(physics, settings)?;
        self.initialize()
    }

    fn add_volume(&mut self, volume: Box<dyn FluidVolume>) -> Result<()> {
        self.core.volumes.push(volume);
        self.core.init_particles()?;
        self.initialize()
    }

    fn set_rect_limits(&mut self, width: f32, height: f32, depth: f32) -> Result<()> {
        self.core.set_rect_limits(width, height, depth)
    }

    delegate_to_core!();
}
