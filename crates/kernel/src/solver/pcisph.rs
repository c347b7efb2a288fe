//! Predictive-corrective incompressible SPH (Solenthaler & Pajarola 2009).
//!
//! Each step computes the non-pressure accelerations once, then iterates:
//!
//! 1. predict positions with the current total acceleration,
//! 2. compute the predicted density,
//! 3. correct the pressure by `delta (rho* - rho0)`, never below zero,
//! 4. recompute the pressure acceleration.
//!
//! The loop runs at least [`SimulationSettings::PCISPH_MIN_ITERATIONS`]
//! times and stops once the largest relative density error drops below
//! `pcisph.error_ratio`, or after `pcisph.max_iterations`.

use glam::{IVec3, Vec3, Vec4};

use crate::body::FluidVolume;
use crate::compute::{reduce_max, Device, DeviceBuffer};
use crate::config::{PhysicsSettings, SimulationSettings};
use crate::error::{Result, SimError};
use crate::grid::NeighborStats;

use super::operators::{
    advance, clamp_velocity, compute_density, compute_non_pressure, compute_normals, compute_pressure, confine,
    resolve_boundary_contact, BoundaryContact, Neighbourhood, SphParams,
};
use super::{delegate_to_core, FluidSimulation, SolverCore};

/// Neighbour list capacity per particle.
pub const PCISPH_MAX_NEIGHBORS: usize = 50;

/// Iteration cap of the relaxation step run after (re)seeding.
pub const RELAXATION_MAX_ITERATIONS: u32 = 100;

/// Outcome of one PCISPH step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PcisphStepReport {
    /// Prediction-correction iterations run.
    pub iterations: u32,
    /// `(max rho* - rho0) / rho0` after the last checked iteration.
    pub density_error_ratio: f32,
    /// Whether the error dropped below the threshold.
    pub converged: bool,
}

/// Pressure scale factor `delta` for a full neighbourhood.
///
/// Evaluated on a prototype lattice of spacing `2r` filling the support
/// sphere:
///
/// ```text
/// beta  = 2 (dt m / rho0)^2
/// delta = -1 / (beta (-sum grad W . sum grad W_spiky - sum (grad W . grad W_spiky)))
/// ```
pub fn density_scale_factor(params: &SphParams, particle_radius: f32) -> f32 {
    let kernels = &params.kernels;
    let h = kernels.support_radius;
    let spacing = 2.0 * particle_radius;
    let extent = h + particle_radius;
    let steps = (2.0 * extent / spacing + 1e-4).floor() as i32;

    let mut grad_sum = Vec3::ZERO;
    let mut spiky_sum = Vec3::ZERO;
    let mut dot_sum = 0.0;
    for x in 0..=steps {
        for y in 0..=steps {
            for z in 0..=steps {
                let r = IVec3::new(x, y, z).as_vec3() * spacing - Vec3::splat(extent);
                let r_norm = r.length();
                if r_norm >= h || r_norm <= f32::EPSILON {
                    continue;
                }
                let grad = kernels.poly6_gradient(r, r_norm);
                let spiky = kernels.spiky_gradient(r, r_norm);
                grad_sum += grad;
                spiky_sum += spiky;
                dot_sum += grad.dot(spiky);
            }
        }
    }

    let beta = 2.0 * (params.time_step * params.particle_mass / params.rest_density).powi(2);
    -1.0 / (beta * (-grad_sum.dot(spiky_sum) - dot_sum))
}

/// What a step is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    /// A simulation step: fluid forces reach the rigid bodies.
    Simulate,
    /// Relaxation of freshly seeded fluid: bodies are left alone.
    Relax,
}

/// Predictive-corrective solver.
pub struct PcisphSolver {
    core: SolverCore,
    scale_factor: f32,
    predicted_positions: DeviceBuffer<Vec4>,
    predicted_densities: DeviceBuffer<f32>,
    last_step: PcisphStepReport,
}

impl PcisphSolver {
    /// Create an empty solver. Fluid is added with
    /// [`FluidSimulation::add_volume`].
    pub fn new(device: &Device, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<Self> {
        let mut solver = Self {
            core: SolverCore::new(device, physics, settings, PCISPH_MAX_NEIGHBORS)?,
            scale_factor: 0.0,
            predicted_positions: DeviceBuffer::new("fluid_predicted_positions"),
            predicted_densities: DeviceBuffer::new("fluid_predicted_densities"),
            last_step: PcisphStepReport::default(),
        };
        solver.initialize()?;
        Ok(solver)
    }

    /// Size the prediction buffers, derive `delta`, then relax the seeded
    /// fluid with one long step and discard the velocities it produced.
    /// The relaxation step pushes no force onto rigid bodies.
    fn initialize(&mut self) -> Result<()> {
        let count = self.core.fluid.len();
        self.predicted_positions.reallocate(count)?;
        self.predicted_densities.reallocate(count)?;

        let scale_factor = density_scale_factor(self.core.params(), self.core.settings.fluid_particle_radius);
        if !(scale_factor.is_finite() && scale_factor > 0.0) {
            return Err(SimError::Config(format!(
                "no PCISPH scale factor for particle radius {} and support radius {}",
                self.core.settings.fluid_particle_radius, self.core.settings.fluid_support_radius
            )));
        }
        self.scale_factor = scale_factor;
        tracing::debug!(scale_factor, "pcisph scale factor");

        if count > 0 {
            let report =
                self.step(SimulationSettings::PCISPH_MIN_ITERATIONS, RELAXATION_MAX_ITERATIONS, StepKind::Relax);
            self.core.fluid.velocities.fill(Vec4::ZERO);
            tracing::info!(
                iterations = report.iterations,
                error = report.density_error_ratio,
                "relaxed seeded fluid"
            );
        }
        self.last_step = PcisphStepReport::default();
        Ok(())
    }

    /// Report of the last step.
    pub fn last_step(&self) -> PcisphStepReport {
        self.last_step
    }

    /// Pressure scale factor in use.
    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Neighbour search statistics of the last step.
    pub fn neighbor_stats(&self) -> NeighborStats {
        self.core.neighbor_stats
    }

    /// Densities at the start of the last step, in hash order.
    pub fn densities(&self) -> &[f32] {
        &self.core.fluid.densities
    }

    fn step(&mut self, min_iterations: u32, max_iterations: u32, kind: StepKind) -> PcisphStepReport {
        let error_ratio = self.core.settings.pcisph.error_ratio;
        let SolverCore { grid, sort, boundary, render, fluid, kernels, neighbor_stats, .. } = &mut self.core;

        boundary.sync(false);
        if fluid.is_empty() {
            return PcisphStepReport { converged: true, ..Default::default() };
        }
        let mut positions = render.acquire();

        fluid.sort(grid, sort, &positions);
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
        compute_normals(&kernels.normals, &nb, &fluid.densities, &mut fluid.normals);
        compute_non_pressure(
            &kernels.non_pressure,
            &nb,
            &fluid.sorted_velocities,
            &fluid.densities,
            &fluid.normals,
            &mut fluid.accelerations,
        );
        fluid.pressures.fill(0.0);
        fluid.pressure_accelerations.fill(Vec4::ZERO);

        let rest_density = kernels.params().rest_density;
        let scale_factor = self.scale_factor;
        let mut report = PcisphStepReport::default();
        for iteration in 1..=max_iterations {
            let x = &fluid.sorted_positions;
            let v = &fluid.sorted_velocities;
            let a = &fluid.accelerations;
            let a_p = &fluid.pressure_accelerations;
            kernels.integrate.dispatch(&mut self.predicted_positions, |p, i, predicted| {
                let (next, _) = advance(p, x[i], v[i], a[i].truncate() + a_p[i].truncate());
                *predicted = next;
            });

            compute_density(&kernels.density, &self.predicted_positions, &nb, &mut self.predicted_densities);
            let predicted = &self.predicted_densities;
            kernels.pressure_update.dispatch(&mut fluid.pressures, |p, i, pressure| {
                *pressure = (*pressure + scale_factor * (predicted[i] - p.rest_density)).max(0.0);
            });

            compute_pressure(&kernels.pressure, &nb, &fluid.densities, &fluid.pressures, &mut fluid.pressure_accelerations);

            report.iterations = iteration;
            if iteration >= min_iterations || iteration == max_iterations {
                let max_density = reduce_max(&self.predicted_densities).unwrap_or(rest_density);
                report.density_error_ratio = (max_density - rest_density) / rest_density;
                if iteration >= min_iterations && report.density_error_ratio < error_ratio {
                    report.converged = true;
                    break;
                }
            }
        }

        if report.converged {
            tracing::debug!(iterations = report.iterations, error = report.density_error_ratio, "pcisph step");
        } else {
            tracing::warn!(
                iterations = report.iterations,
                error = report.density_error_ratio,
                threshold = error_ratio,
                "pcisph density error above threshold at iteration cap"
            );
        }

        if kind == StepKind::Simulate {
            let params = kernels.params();
            boundary.apply_fluid_forces(&fluid.view(params.particle_mass, params.viscosity));
        }

        let contact = BoundaryContact {
            positions: boundary.sorted_positions(),
            velocities: boundary.sorted_velocities(),
            neighbors: &fluid.boundary_neighbors,
        };
        let a = &fluid.accelerations;
        let a_p = &fluid.pressure_accelerations;
        kernels.integrate.dispatch_zip(
            &mut fluid.sorted_positions,
            &mut fluid.sorted_velocities,
            |p, i, x, v| {
                let acceleration = a[i].truncate() + a_p[i].truncate();
                let vel = clamp_velocity(v.truncate() + acceleration * p.time_step, p.max_vel);
                let next = x.truncate() + vel * p.time_step;
                let (next, [vel]) = resolve_boundary_contact(p, &contact, i, next, [vel]);
                let (next, [vel]) = confine(p.container, next, [vel]);
                *x = next.extend(x.w);
                *v = vel.extend(0.0);
            },
        );

        fluid.write_back(sort, &mut positions);
        report
    }
}

impl FluidSimulation for PcisphSolver {
    fn simulate(&mut self) {
        let max_iterations = self.core.settings.pcisph.max_iterations;
        self.last_step = self.step(SimulationSettings::PCISPH_MIN_ITERATIONS, max_iterations, StepKind::Simulate);
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
