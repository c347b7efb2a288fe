//! Headless SPH runner.
//!
//! Builds the demo scene from an optional JSON configuration, steps it and
//! logs progress. Forces on the immersed cube can be written to a JSON file.
//!
//! Usage: `sph-runner [config.json] [forces.json]`

mod scene;

use std::process::ExitCode;
use std::time::Instant;

use serde::Serialize;
use sph_kernel::{FluidSimulation, Result, Solver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scene::{RunnerConfig, Scene};

/// Force on the cube at a single step.
#[derive(Debug, Clone, Serialize)]
struct ForceRecord {
    /// Step number
    step: u64,
    /// Simulated time (s)
    sim_time: f64,
    /// Net force [Fx, Fy, Fz] (N)
    force: [f32; 3],
    /// Net torque [Tx, Ty, Tz] (N·m)
    torque: [f32; 3],
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sph_runner=info,sph_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let forces_path = args.next();

    match run(config_path.as_deref(), forces_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<&str>, forces_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            tracing::info!(path, "loading configuration");
            RunnerConfig::load(path)?
        }
        None => RunnerConfig::default(),
    };
    let sim = &config.engine.simulation;
    tracing::info!(method = ?sim.method, dt = sim.time_step, steps = config.scene.steps, "starting SPH runner");

    let Scene { mut solver, cube } = Scene::build(&config)?;
    tracing::info!(
        fluid = solver.particle_count(),
        boundary = solver.boundary_particle_count(),
        "scene built"
    );

    let dt = f64::from(sim.time_step);
    let report_every = config.scene.report_every.max(1);
    let mut records = Vec::new();
    let start = Instant::now();

    for step in 1..=config.scene.steps {
        solver.simulate();

        if let Some(cube) = &cube {
            let (force, torque) = cube.last_force_n_torque();
            records.push(ForceRecord { step, sim_time: step as f64 * dt, force: force.into(), torque: torque.into() });
        }

        if step % report_every == 0 {
            report(&solver, step, dt, start.elapsed().as_secs_f64());
        }
    }

    if let Some(path) = forces_path {
        std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
        tracing::info!(path, records = records.len(), "force history written");
    }
    Ok(())
}

fn report(solver: &Solver, step: u64, dt: f64, wall: f64) {
    let positions = solver.positions();
    let n = positions.len().max(1) as f32;
    let mean_height = positions.iter().map(|p| p.y).sum::<f32>() / n;
    let max_speed = solver
        .velocities()
        .iter()
        .map(|v| v.truncate().length())
        .fold(0.0f32, f32::max);

    match solver.pcisph_report() {
        Some(r) => tracing::info!(
            step,
            sim_time = step as f64 * dt,
            mean_height,
            max_speed,
            iterations = r.iterations,
            density_error = r.density_error_ratio,
            steps_per_s = step as f64 / wall,
            "progress"
        ),
        None => tracing::info!(
            step,
            sim_time = step as f64 * dt,
            mean_height,
            max_speed,
            steps_per_s = step as f64 / wall,
            "progress"
        ),
    }
}
