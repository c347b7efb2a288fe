//! Engine configuration: physical constants and solver settings.
//!
//! Settings are plain immutable values. They are handed to a solver on
//! construction and again on `reset`; nothing in the engine keeps a global
//! copy.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Time-integration scheme used by the fluid solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SolverMethod {
    /// Weakly compressible SPH (explicit equation of state).
    #[default]
    Wcsph,
    /// Predictive-corrective incompressible SPH.
    Pcisph,
}

/// How a wrapped cell coordinate is turned into a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HashEncoding {
    /// Row-major cell id `x + n * (y + n * z)`.
    CellId,
    /// Z-order curve code. Neighbouring cells land close together in memory.
    #[default]
    Morton,
}

/// Physical constants of the simulated fluid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsSettings {
    /// Rest density (kg/m^3).
    #[serde(default = "default_rest_density")]
    pub rest_density: f32,
    /// Kinematic viscosity coefficient.
    #[serde(default = "default_kinematic_viscosity")]
    pub kinematic_viscosity: f32,
    /// Magnitude of gravity along -y (m/s^2).
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Stiffness of the linear equation of state (WCSPH only).
    #[serde(default = "default_gas_stiffness")]
    pub gas_stiffness: f32,
    /// Surface tension coefficient.
    #[serde(default = "default_surface_tension")]
    pub surface_tension: f32,
}

/// Settings specific to the PCISPH solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcisphSettings {
    /// Upper bound on prediction-correction iterations per step.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Relative density error below which the iteration stops.
    #[serde(default = "default_error_ratio")]
    pub error_ratio: f32,
}

/// Numerical settings of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Fixed time step (s).
    #[serde(default = "default_time_step")]
    pub time_step: f32,
    /// Per-component velocity clamp (m/s).
    #[serde(default = "default_max_vel")]
    pub max_vel: f32,
    /// Radius of a fluid particle (m). Particle spacing is twice this.
    #[serde(default = "default_particle_radius")]
    pub fluid_particle_radius: f32,
    /// Kernel support radius (m). Also the grid cell size.
    #[serde(default = "default_support_radius")]
    pub fluid_support_radius: f32,
    /// Radius used when sampling rigid-body surfaces (m).
    #[serde(default = "default_particle_radius")]
    pub boundary_particle_radius: f32,
    /// Divisor applied to the boundary phi field.
    #[serde(default = "default_phi_coefficient")]
    pub phi_coefficient: f32,
    /// Edge length of the cubic grid domain, centred at the origin (m).
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    /// Cell hash encoding.
    #[serde(default)]
    pub hash_encoding: HashEncoding,
    /// Solver selector.
    #[serde(default)]
    pub method: SolverMethod,
    /// PCISPH-only options.
    #[serde(default)]
    pub pcisph: PcisphSettings,
}

/// Full engine configuration as stored in a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Physical constants.
    #[serde(default)]
    pub physics: PhysicsSettings,
    /// Numerical settings.
    #[serde(default)]
    pub simulation: SimulationSettings,
}

// Default values
fn default_rest_density() -> f32 {
    998.29
}

fn default_kinematic_viscosity() -> f32 {
    0.0035105
}

fn default_gravity() -> f32 {
    9.8
}

fn default_gas_stiffness() -> f32 {
    3.0
}

fn default_surface_tension() -> f32 {
    0.0728
}

fn default_max_iterations() -> u32 {
    7
}

fn default_error_ratio() -> f32 {
    0.01
}

fn default_time_step() -> f32 {
    0.01
}

fn default_max_vel() -> f32 {
    50.0
}

fn default_particle_radius() -> f32 {
    0.008
}

fn default_support_radius() -> f32 {
    0.032
}

fn default_phi_coefficient() -> f32 {
    1.0
}

fn default_grid_size() -> f32 {
    5.0
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            rest_density: default_rest_density(),
            kinematic_viscosity: default_kinematic_viscosity(),
            gravity: default_gravity(),
            gas_stiffness: default_gas_stiffness(),
            surface_tension: default_surface_tension(),
        }
    }
}

impl Default for PcisphSettings {
    fn default() -> Self {
        Self { max_iterations: default_max_iterations(), error_ratio: default_error_ratio() }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            time_step: default_time_step(),
            max_vel: default_max_vel(),
            fluid_particle_radius: default_particle_radius(),
            fluid_support_radius: default_support_radius(),
            boundary_particle_radius: default_particle_radius(),
            phi_coefficient: default_phi_coefficient(),
            grid_size: default_grid_size(),
            hash_encoding: HashEncoding::default(),
            method: SolverMethod::default(),
            pcisph: PcisphSettings::default(),
        }
    }
}

impl PhysicsSettings {
    /// Validate the physical constants.
    pub fn validate(&self) -> Result<(), String> {
        if self.rest_density <= 0.0 {
            return Err("rest_density must be positive".to_string());
        }
        if self.kinematic_viscosity < 0.0 {
            return Err("kinematic_viscosity must be non-negative".to_string());
        }
        if self.gas_stiffness < 0.0 {
            return Err("gas_stiffness must be non-negative".to_string());
        }
        if self.surface_tension < 0.0 {
            return Err("surface_tension must be non-negative".to_string());
        }
        Ok(())
    }
}

impl SimulationSettings {
    /// Minimum number of PCISPH iterations before convergence is checked.
    pub const PCISPH_MIN_ITERATIONS: u32 = 3;

    /// Validate the numerical settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_step <= 0.0 {
            return Err("time_step must be positive".to_string());
        }
        if self.max_vel <= 0.0 {
            return Err("max_vel must be positive".to_string());
        }
        if self.fluid_particle_radius <= 0.0 || self.boundary_particle_radius <= 0.0 {
            return Err("particle radii must be positive".to_string());
        }
        if self.fluid_support_radius < self.fluid_particle_radius {
            return Err("fluid_support_radius must be at least fluid_particle_radius".to_string());
        }
        if self.phi_coefficient <= 0.0 {
            return Err("phi_coefficient must be positive".to_string());
        }
        if self.grid_size < self.fluid_support_radius {
            return Err("grid_size must be at least one cell wide".to_string());
        }
        if self.pcisph.max_iterations < Self::PCISPH_MIN_ITERATIONS {
            return Err(format!(
                "pcisph.max_iterations must be at least {}",
                Self::PCISPH_MIN_ITERATIONS
            ));
        }
        if self.pcisph.error_ratio <= 0.0 {
            return Err("pcisph.error_ratio must be positive".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate both halves of the configuration.
    pub fn validate(&self) -> Result<()> {
        self.physics.validate().map_err(SimError::Config)?;
        self.simulation.validate().map_err(SimError::Config)
    }
}

/// Validate a settings pair, mapping failures into [`SimError::Config`].
pub(crate) fn validate_settings(physics: &PhysicsSettings, sim: &SimulationSettings) -> Result<()> {
    physics.validate().map_err(SimError::Config)?;
    sim.validate().map_err(SimError::Config)
}
