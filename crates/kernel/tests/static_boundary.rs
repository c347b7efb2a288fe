//! Static boundaries stay put.
//!
//! A surface added with `can_move = false` is only transformed by a full
//! sync, never by the per-step sync, even if its body's pose changes.
//! Running a solver next to it leaves its particles and phi untouched.

use std::sync::Arc;

use glam::{Quat, Vec3, Vec4};
use sph_kernel::{
    BoundaryHandler, BoxVolume, Device, FluidSimulation, KinematicBody, PhysicsSettings, RigidBody, Shape,
    SimulationSettings, Solver,
};

fn settings() -> SimulationSettings {
    SimulationSettings { grid_size: 1.0, time_step: 0.002, ..Default::default() }
}

#[test]
fn per_step_sync_ignores_static_surfaces() {
    let mut h = BoundaryHandler::new(&Device::default(), &PhysicsSettings::default(), &settings()).unwrap();
    let body = Arc::new(KinematicBody::fixed(Shape::Plane { width: 0.2, depth: 0.2 }, Vec3::ZERO));
    let dyn_body: Arc<dyn RigidBody> = body.clone();
    h.add_boundary(&dyn_body, "floor", false).unwrap();
    let before = h.positions().to_vec();

    body.set_pose(Vec3::new(0.0, 0.3, 0.0), Quat::IDENTITY);
    h.sync(false);
    assert_eq!(h.positions(), &before[..], "static surface moved on a per-step sync");

    h.sync(true);
    assert!(h.positions().iter().all(|p| (p.y - 0.3).abs() < 1e-6), "full sync did not apply the new pose");
}

#[test]
fn solver_leaves_static_boundary_untouched() {
    let physics = PhysicsSettings::default();
    let mut solver = Solver::new(&Device::default(), &physics, &settings()).unwrap();
    let floor = Arc::new(KinematicBody::fixed(Shape::Plane { width: 0.2, depth: 0.2 }, Vec3::new(0.0, -0.1, 0.0)));
    let dyn_floor: Arc<dyn RigidBody> = floor.clone();
    solver.add_boundary(&dyn_floor, "floor", false).unwrap();
    solver
        .add_volume(Box::new(BoxVolume::new(Vec3::splat(0.048), Vec3::new(0.0, -0.06, 0.0))))
        .unwrap();

    let before: Vec<Vec4> = solver.boundary_positions().to_vec();
    for _ in 0..50 {
        solver.simulate();
    }
    assert_eq!(solver.boundary_positions(), &before[..], "static boundary particles moved");
    assert_eq!(solver.boundary_particle_count(), before.len());

    // The floor has no mass, so it never receives a force.
    assert_eq!(floor.last_force_n_torque(), (Vec3::ZERO, Vec3::ZERO));
}
