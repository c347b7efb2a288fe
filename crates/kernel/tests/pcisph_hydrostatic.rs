//! PCISPH fluid at rest in a fixed tank.
//!
//! A column seeded one particle radius off the floor and walls should hold
//! its predicted density within `error_ratio` of rest density on most
//! steps. A step that does not get there must stop exactly at the
//! iteration cap. A block released mid-tank collapses and spreads without
//! leaving the tank.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use sph_kernel::{
    BoxVolume, Device, FluidSimulation, FluidVolume, KinematicBody, PcisphSettings, PhysicsSettings, RigidBody,
    Shape, SimulationSettings, Solver, SolverMethod,
};

const TANK: Vec3 = Vec3::new(0.096, 0.3, 0.096);

/// Lattice of spacing `2r` filling the tank floor, `layers` deep, with the
/// outer particles one radius away from the walls and the floor.
struct Column {
    layers: u32,
}

impl FluidVolume for Column {
    fn particles(&self, particle_radius: f32) -> Vec<Vec4> {
        let spacing = 2.0 * particle_radius;
        let across = ((TANK.x - spacing) / spacing + 1e-3).floor() as u32 + 1;
        let start = Vec3::new(-0.5 * TANK.x, -0.5 * TANK.y, -0.5 * TANK.z) + Vec3::splat(particle_radius);
        let mut out = Vec::new();
        for j in 0..self.layers {
            for i in 0..across {
                for k in 0..across {
                    let p = start + Vec3::new(i as f32, j as f32, k as f32) * spacing;
                    out.push(p.extend(1.0));
                }
            }
        }
        out
    }
}

fn settings() -> (PhysicsSettings, SimulationSettings) {
    let physics = PhysicsSettings { rest_density: 1000.0, ..Default::default() };
    let settings = SimulationSettings {
        grid_size: 1.0,
        time_step: 0.002,
        method: SolverMethod::Pcisph,
        ..Default::default()
    };
    (physics, settings)
}

fn tank() -> Arc<dyn RigidBody> {
    Arc::new(KinematicBody::fixed(Shape::Tank { width: TANK.x, height: TANK.y, depth: TANK.z }, Vec3::ZERO))
}

#[test]
fn resting_column_converges() {
    let (physics, settings) = settings();
    let PcisphSettings { max_iterations, error_ratio } = settings.pcisph.clone();
    assert_eq!((max_iterations, error_ratio), (7, 0.01));
    let r = settings.fluid_particle_radius;

    let mut solver = Solver::new(&Device::default(), &physics, &settings).unwrap();
    let tank = tank();
    solver.add_boundary(&tank, "tank", false).unwrap();
    solver.add_volume(Box::new(Column { layers: 12 })).unwrap();
    let n = solver.particle_count();
    assert_eq!(n, 6 * 6 * 12);

    let start_height = mean_height(solver.positions());
    let steps = 300;
    let mut converged = 0;
    let mut worst_error = 0.0f32;
    for step in 0..steps {
        solver.simulate();
        let report = solver.pcisph_report().unwrap();
        assert!(
            (SimulationSettings::PCISPH_MIN_ITERATIONS..=max_iterations).contains(&report.iterations),
            "step {step}: {} iterations",
            report.iterations
        );
        if report.converged {
            assert!(report.density_error_ratio < error_ratio, "step {step}: {report:?}");
            converged += 1;
        } else {
            assert_eq!(report.iterations, max_iterations, "step {step} stopped early without converging");
        }
        worst_error = worst_error.max(report.density_error_ratio);
    }
    eprintln!("{n} particles, {converged}/{steps} steps converged, worst density error ratio {worst_error:.4}");
    assert!(2 * converged > steps, "only {converged} of {steps} steps converged");

    let positions = solver.positions();
    assert!(positions.iter().all(|p| p.is_finite()));
    let half = 0.5 * TANK;
    assert!(positions.iter().all(|p| p.y > -half.y), "fluid leaked through the floor");
    assert!(
        positions.iter().all(|p| p.x.abs() < half.x + r && p.z.abs() < half.z + r),
        "fluid leaked through a wall"
    );
    // At rest the column may settle a little but never rises.
    assert!(mean_height(positions) <= start_height + r);
}

#[test]
fn block_collapses_inside_tank() {
    let (physics, settings) = settings();
    let h = settings.fluid_support_radius;
    let max_iterations = settings.pcisph.max_iterations;

    let mut solver = Solver::new(&Device::default(), &physics, &settings).unwrap();
    let tank: Arc<dyn RigidBody> =
        Arc::new(KinematicBody::fixed(Shape::Tank { width: 0.2, height: 0.2, depth: 0.2 }, Vec3::ZERO));
    solver.add_boundary(&tank, "tank", false).unwrap();
    solver
        .add_volume(Box::new(BoxVolume::new(Vec3::splat(0.08), Vec3::new(0.0, -0.05, 0.0))))
        .unwrap();
    let n = solver.particle_count();
    assert!(n > 0);

    let start_height = mean_height(solver.positions());
    for step in 0..200 {
        solver.simulate();
        let report = solver.pcisph_report().unwrap();
        assert!(report.density_error_ratio.is_finite(), "step {step}: {report:?}");
        assert!(report.converged || report.iterations == max_iterations, "step {step}: {report:?}");
    }

    let positions = solver.positions();
    assert_eq!(positions.len(), n);
    assert!(positions.iter().all(|p| p.is_finite()));
    assert!(positions.iter().all(|p| p.y > -0.1 - h), "fluid leaked through the floor");
    assert!(positions.iter().all(|p| p.x.abs() < 0.1 + h && p.z.abs() < 0.1 + h), "fluid leaked through a wall");
    assert!(mean_height(positions) <= start_height + 1e-3);
}

fn mean_height(positions: &[Vec4]) -> f32 {
    positions.iter().map(|p| p.y).sum::<f32>() / positions.len() as f32
}
