//! Fluid solvers.
//!
//! Both solvers share the neighbourhood pipeline and the boundary coupling;
//! they differ in how pressure is obtained:
//!
//! - [`WcsphSolver`]: explicit equation of state, one pass per step.
//! - [`PcisphSolver`]: prediction-correction loop driving the density error
//!   below a threshold.
//!
//! [`Solver`] selects one of them from [`SimulationSettings::method`].

pub mod operators;
pub mod pcisph;
pub mod wcsph;

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::body::{FluidVolume, RigidBody};
use crate::boundary::BoundaryHandler;
use crate::compute::{Device, SharedBuffer};
use crate::config::{validate_settings, PhysicsSettings, SimulationSettings, SolverMethod};
use crate::error::{Result, SimError};
use crate::grid::{NeighborStats, UniformGrid};
use crate::particle::FluidParticles;
use crate::sort::SortPipeline;

use operators::{SphKernels, SphParams};

pub use pcisph::{PcisphSolver, PcisphStepReport};
pub use wcsph::WcsphSolver;

/// Operations every fluid solver offers to the scene and render layers.
pub trait FluidSimulation {
    /// Advance the simulation by one time step.
    fn simulate(&mut self);

    /// Apply new settings and restart from the fluid volumes.
    fn reset(&mut self, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<()>;

    /// Number of fluid particles.
    fn particle_count(&self) -> usize;

    /// Number of boundary particles.
    fn boundary_particle_count(&self) -> usize;

    /// Couple a rigid body with the fluid.
    fn add_boundary(&mut self, body: &Arc<dyn RigidBody>, id: &str, can_move: bool) -> Result<()>;

    /// Add a fluid volume and restart from all volumes.
    fn add_volume(&mut self, volume: Box<dyn FluidVolume>) -> Result<()>;

    /// Confine the fluid to an origin-centred box.
    fn set_rect_limits(&mut self, width: f32, height: f32, depth: f32) -> Result<()>;

    /// Fluid positions in render order.
    fn positions(&self) -> &[Vec4];

    /// Fluid velocities in render order.
    fn velocities(&self) -> &[Vec4];

    /// Generation counter of the render buffer.
    fn render_generation(&self) -> u64;

    /// World-space boundary particle positions, surface by surface.
    fn boundary_positions(&self) -> &[Vec4];

    /// Time integration scheme.
    fn method(&self) -> SolverMethod;

    /// Physical constants in use.
    fn physics(&self) -> &PhysicsSettings;

    /// Numerical settings in use.
    fn settings(&self) -> &SimulationSettings;

    /// Back the render positions with the render buffer `handle`. On
    /// failure the previous buffer stays bound.
    fn bind_render_buffer(&mut self, handle: u32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Shared solver state
// ---------------------------------------------------------------------------

/// State common to both solvers.
pub(crate) struct SolverCore {
    pub device: Device,
    pub physics: PhysicsSettings,
    pub settings: SimulationSettings,
    pub grid: UniformGrid,
    pub sort: SortPipeline,
    pub boundary: BoundaryHandler,
    pub volumes: Vec<Box<dyn FluidVolume>>,
    pub render: SharedBuffer,
    pub fluid: FluidParticles,
    pub container: Option<Vec3>,
    pub kernels: SphKernels,
    pub neighbor_stats: NeighborStats,
}

impl SolverCore {
    pub fn new(
        device: &Device,
        physics: &PhysicsSettings,
        settings: &SimulationSettings,
        max_neighbors: usize,
    ) -> Result<Self> {
        validate_settings(physics, settings)?;
        let grid = UniformGrid::new(
            device,
            settings.grid_size,
            settings.fluid_support_radius,
            settings.hash_encoding,
        )?;
        let mut core = Self {
            device: device.clone(),
            physics: physics.clone(),
            settings: settings.clone(),
            sort: SortPipeline::new(device)?,
            boundary: BoundaryHandler::new(device, physics, settings)?,
            volumes: Vec::new(),
            render: SharedBuffer::new("fluid_positions", None),
            fluid: FluidParticles::new(max_neighbors),
            container: None,
            kernels: SphKernels::build(device, SphParams::new(physics, settings, Vec3::splat(settings.grid_size)))?,
            neighbor_stats: NeighborStats::default(),
            grid,
        };
        core.init_particles()?;
        Ok(core)
    }

    /// Container extents: the explicit rect limits, or the grid domain.
    pub fn container(&self) -> Vec3 {
        self.container.unwrap_or(Vec3::splat(self.settings.grid_size))
    }

    pub fn params(&self) -> &SphParams {
        self.kernels.params()
    }

    pub fn rebuild_kernels(&mut self) -> Result<()> {
        let params = SphParams::new(&self.physics, &self.settings, self.container());
        self.kernels = SphKernels::build(&self.device, params)?;
        Ok(())
    }

    /// Apply new settings to the grid, the boundary and the kernels, then
    /// restart from the volumes.
    pub fn reset(&mut self, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<()> {
        validate_settings(physics, settings)?;
        if settings.method != self.settings.method {
            return Err(SimError::Config(format!(
                "solver method is fixed at construction ({:?}); build a new solver for {:?}",
                self.settings.method, settings.method
            )));
        }
        self.physics = physics.clone();
        self.settings = settings.clone();

        self.boundary.reconfigure(physics, settings)?;
        let info = self.grid.info();
        if info.size != settings.grid_size
            || info.cell_size != settings.fluid_support_radius
            || self.grid.encoding() != settings.hash_encoding
        {
            self.grid = UniformGrid::new(
                &self.device,
                settings.grid_size,
                settings.fluid_support_radius,
                settings.hash_encoding,
            )?;
        }
        self.rebuild_kernels()?;
        self.init_particles()
    }

    /// Sample every volume and reallocate the fluid buffers.
    pub fn init_particles(&mut self) -> Result<()> {
        let radius = self.settings.fluid_particle_radius;
        let positions: Vec<Vec4> = self.volumes.iter().flat_map(|v| v.particles(radius)).collect();
        let count = positions.len();
        self.render.upload(&positions)?;
        self.fluid.allocate(count, self.grid.cell_count())?;
        self.sort.reserve(count)?;
        tracing::info!(
            method = ?self.settings.method,
            particles = count,
            volumes = self.volumes.len(),
            mass = self.params().particle_mass,
            "fluid initialised"
        );
        Ok(())
    }

    pub fn add_boundary(&mut self, body: &Arc<dyn RigidBody>, id: &str, can_move: bool) -> Result<()> {
        self.boundary.add_boundary(body, id, can_move)
    }

    pub fn set_rect_limits(&mut self, width: f32, height: f32, depth: f32) -> Result<()> {
        let previous = self.container;
        self.container = Some(Vec3::new(width, height, depth));
        if let Err(err) = self.rebuild_kernels() {
            self.container = previous;
            return Err(err);
        }
        tracing::info!(width, height, depth, "container limits set");
        Ok(())
    }

    pub fn bind_render_buffer(&mut self, handle: u32) -> Result<()> {
        let mut render = SharedBuffer::new("fluid_positions", Some(handle));
        // Carry the positions over; the generation restarts with the upload.
        render.upload(self.render.as_slice())?;
        self.render = render;
        tracing::info!(handle, particles = self.render.as_slice().len(), "render buffer bound");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Solver selection
// ---------------------------------------------------------------------------

/// A fluid solver chosen at runtime.
pub enum Solver {
    /// Weakly compressible SPH.
    Wcsph(WcsphSolver),
    /// Predictive-corrective incompressible SPH.
    Pcisph(PcisphSolver),
}

impl Solver {
    /// Build the solver selected by `settings.method`.
    pub fn new(device: &Device, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<Self> {
        Ok(match settings.method {
            SolverMethod::Wcsph => Solver::Wcsph(WcsphSolver::new(device, physics, settings)?),
            SolverMethod::Pcisph => Solver::Pcisph(PcisphSolver::new(device, physics, settings)?),
        })
    }

    fn inner(&self) -> &dyn FluidSimulation {
        match self {
            Solver::Wcsph(s) => s,
            Solver::Pcisph(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FluidSimulation {
        match self {
            Solver::Wcsph(s) => s,
            Solver::Pcisph(s) => s,
        }
    }

    /// Report of the last PCISPH step, if this is a PCISPH solver.
    pub fn pcisph_report(&self) -> Option<PcisphStepReport> {
        match self {
            Solver::Pcisph(s) => Some(s.last_step()),
            Solver::Wcsph(_) => None,
        }
    }
}

impl FluidSimulation for Solver {
    fn simulate(&mut self) {
        self.inner_mut().simulate()
    }

    fn reset(&mut self, physics: &PhysicsSettings, settings: &SimulationSettings) -> Result<()> {
        self.inner_mut().reset(physics, settings)
    }

    fn particle_count(&self) -> usize {
        self.inner().particle_count()
    }

    fn boundary_particle_count(&self) -> usize {
        self.inner().boundary_particle_count()
    }

    fn add_boundary(&mut self, body: &Arc<dyn RigidBody>, id: &str, can_move: bool) -> Result<()> {
        self.inner_mut().add_boundary(body, id, can_move)
    }

    fn add_volume(&mut self, volume: Box<dyn FluidVolume>) -> Result<()> {
        self.inner_mut().add_volume(volume)
    }

    fn set_rect_limits(&mut self, width: f32, height: f32, depth: f32) -> Result<()> {
        self.inner_mut().set_rect_limits(width, height, depth)
    }

    fn positions(&self) -> &[Vec4] {
        self.inner().positions()
    }

    fn velocities(&self) -> &[Vec4] {
        self.inner().velocities()
    }

    fn render_generation(&self) -> u64 {
        self.inner().render_generation()
    }

    fn boundary_positions(&self) -> &[Vec4] {
        self.inner().boundary_positions()
    }

    fn method(&self) -> SolverMethod {
        self.inner().method()
    }

    fn physics(&self) -> &PhysicsSettings {
        self.inner().physics()
    }

    fn settings(&self) -> &SimulationSettings {
        self.inner().settings()
    }

    fn bind_render_buffer(&mut self, handle: u32) -> Result<()> {
        self.inner_mut().bind_render_buffer(handle)
    }
}

/// Implements the parts of [`FluidSimulation`] that only touch the shared
/// core. The solver provides `simulate`, `reset`, `add_volume` and
/// `set_rect_limits`.
macro_rules! delegate_to_core {
    () => {
        fn particle_count(&self) -> usize {
            self.core.fluid.len()
        }

        fn boundary_particle_count(&self) -> usize {
            self.core.boundary.particle_count()
        }

        fn add_boundary(
            &mut self,
            body: &std::sync::Arc<dyn crate::body::RigidBody>,
            id: &str,
            can_move: bool,
        ) -> crate::error::Result<()> {
            self.core.add_boundary(body, id, can_move)
        }

        fn positions(&self) -> &[glam::Vec4] {
            self.core.render.as_slice()
        }

        fn velocities(&self) -> &[glam::Vec4] {
            &self.core.fluid.velocities
        }

        fn render_generation(&self) -> u64 {
            self.core.render.generation()
        }

        fn boundary_positions(&self) -> &[glam::Vec4] {
            self.core.boundary.positions()
        }

        fn method(&self) -> crate::config::SolverMethod {
            self.core.settings.method
        }

        fn physics(&self) -> &crate::config::PhysicsSettings {
            &self.core.physics
        }

        fn settings(&self) -> &crate::config::SimulationSettings {
            &self.core.settings
        }

        fn bind_render_buffer(&mut self, handle: u32) -> crate::error::Result<()> {
            self.core.bind_render_buffer(handle)
        }
    };
}

pub(crate) use delegate_to_core;
