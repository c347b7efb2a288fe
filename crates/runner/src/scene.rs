//! Demo scene description: a fixed tank, a block of fluid and a cube
//! held in it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use sph_kernel::{
    BoxVolume, EngineConfig, FluidSimulation, KinematicBody, Result, RigidBody, Shape, Solver,
};

/// Runner configuration file: engine settings plus the scene to build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Engine settings.
    #[serde(flatten)]
    pub engine: EngineConfig,
    /// Scene layout.
    #[serde(default)]
    pub scene: SceneConfig,
}

impl RunnerConfig {
    /// Load a configuration file and validate the engine half.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: RunnerConfig = serde_json::from_str(&contents)?;
        config.engine.validate()?;
        Ok(config)
    }
}

/// Scene layout and run length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Tank extents (m).
    #[serde(default = "default_tank")]
    pub tank: Vec3,
    /// Fluid block extents (m).
    #[serde(default = "default_fluid_size")]
    pub fluid_size: Vec3,
    /// Fluid block centre (m).
    #[serde(default = "default_fluid_center")]
    pub fluid_center: Vec3,
    /// Edge of the immersed cube (m). Zero disables it.
    #[serde(default = "default_cube_side")]
    pub cube_side: f32,
    /// Cube mass (kg).
    #[serde(default = "default_cube_mass")]
    pub cube_mass: f32,
    /// Cube position (m).
    #[serde(default = "default_cube_position")]
    pub cube_position: Vec3,
    /// Number of steps to run.
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Steps between progress reports.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            tank: default_tank(),
            fluid_size: default_fluid_size(),
            fluid_center: default_fluid_center(),
            cube_side: default_cube_side(),
            cube_mass: default_cube_mass(),
            cube_position: default_cube_position(),
            steps: default_steps(),
            report_every: default_report_every(),
        }
    }
}

fn default_tank() -> Vec3 {
    Vec3::new(0.4, 0.3, 0.4)
}

fn default_fluid_size() -> Vec3 {
    Vec3::new(0.38, 0.12, 0.38)
}

fn default_fluid_center() -> Vec3 {
    Vec3::new(0.0, -0.08, 0.0)
}

fn default_cube_side() -> f32 {
    0.08
}

fn default_cube_mass() -> f32 {
    0.25
}

fn default_cube_position() -> Vec3 {
    Vec3::new(0.0, 0.02, 0.0)
}

fn default_steps() -> u64 {
    500
}

fn default_report_every() -> u64 {
    50
}

/// Built scene: the solver and the body whose forces are reported.
pub struct Scene {
    /// Fluid solver with every boundary and volume added.
    pub solver: Solver,
    /// Immersed cube, if any.
    pub cube: Option<Arc<KinematicBody>>,
}

impl Scene {
    /// Build the solver and populate it.
    pub fn build(config: &RunnerConfig) -> Result<Self> {
        let device = sph_kernel::Device::default();
        let engine = &config.engine;
        let scene = &config.scene;
        let mut solver = Solver::new(&device, &engine.physics, &engine.simulation)?;

        let tank: Arc<dyn RigidBody> = Arc::new(KinematicBody::fixed(
            Shape::Tank { width: scene.tank.x, height: scene.tank.y, depth: scene.tank.z },
            Vec3::ZERO,
        ));
        solver.add_boundary(&tank, "tank", false)?;

        let cube = if scene.cube_side > 0.0 {
            let cube = Arc::new(KinematicBody::new(
                Shape::Cube { side: scene.cube_side },
                scene.cube_mass,
                scene.cube_position,
            ));
            let dyn_cube: Arc<dyn RigidBody> = cube.clone();
            solver.add_boundary(&dyn_cube, "cube", true)?;
            Some(cube)
        } else {
            None
        };

        solver.set_rect_limits(scene.tank.x, scene.tank.y, scene.tank.z)?;
        solver.add_volume(Box::new(BoxVolume::new(scene.fluid_size, scene.fluid_center)))?;
        Ok(Self { solver, cube })
    }
}
