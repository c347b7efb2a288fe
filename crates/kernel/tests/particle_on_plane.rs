//! A single fluid particle dropped on a static plane comes to rest on it.
//!
//! Whatever the solver and the drop height, the particle must end up one
//! particle radius above the boundary samples, within the distance it can
//! travel in one step (`max_vel * time_step`), without crossing the plane
//! or sliding off.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use sph_kernel::{
    Device, FluidSimulation, FluidVolume, KinematicBody, PhysicsSettings, RigidBody, Shape, SimulationSettings,
    Solver, SolverMethod,
};

const PLANE_Y: f32 = -0.1;

struct Drop {
    height: f32,
}

impl FluidVolume for Drop {
    fn particles(&self, _particle_radius: f32) -> Vec<Vec4> {
        vec![Vec4::new(0.0, PLANE_Y + self.height, 0.0, 1.0)]
    }
}

/// Final position, final velocity and lowest height above the plane.
fn drop_on_plane(method: SolverMethod, height: f32, steps: usize) -> (Vec4, Vec4, f32) {
    let physics = PhysicsSettings { surface_tension: 0.0, ..Default::default() };
    let settings =
        SimulationSettings { grid_size: 1.0, time_step: 0.002, max_vel: 2.0, method, ..Default::default() };

    let mut solver = Solver::new(&Device::default(), &physics, &settings).unwrap();
    let floor: Arc<dyn RigidBody> =
        Arc::new(KinematicBody::fixed(Shape::Plane { width: 0.2, depth: 0.2 }, Vec3::new(0.0, PLANE_Y, 0.0)));
    solver.add_boundary(&floor, "floor", false).unwrap();
    solver.add_volume(Box::new(Drop { height })).unwrap();
    assert_eq!(solver.particle_count(), 1);

    let mut lowest = f32::INFINITY;
    for _ in 0..steps {
        solver.simulate();
        lowest = lowest.min(solver.positions()[0].y - PLANE_Y);
    }
    (solver.positions()[0], solver.velocities()[0], lowest)
}

#[test]
fn particle_settles_on_plane() {
    let settings = SimulationSettings { time_step: 0.002, max_vel: 2.0, ..Default::default() };
    let r = settings.fluid_particle_radius;
    let tolerance = settings.max_vel * settings.time_step;

    for height in [1.5 * r, 4.0 * r, 0.05, 0.1] {
        let mut rests = Vec::new();
        for method in [SolverMethod::Wcsph, SolverMethod::Pcisph] {
            let (x, v, lowest) = drop_on_plane(method, height, 3000);
            let rest = x.y - PLANE_Y;
            eprintln!(
                "{method:?} from {:.1} r: rest {:.3} r, lowest {:.3} r, |v| {:.2e}",
                height / r,
                rest / r,
                lowest / r,
                v.length()
            );

            assert!(x.is_finite() && v.is_finite());
            assert!(lowest > 0.0, "{method:?} from {height}: crossed the plane");
            assert!(
                (rest - r).abs() <= tolerance,
                "{method:?} from {height}: rest height {rest}, expected {r} +- {tolerance}"
            );
            assert!(v.length() < 0.05, "{method:?} from {height}: still moving: {v}");
            assert!(x.x.abs() < r && x.z.abs() < r, "{method:?} from {height}: drifted sideways: {x}");
            rests.push(rest);
        }
        assert!((rests[0] - rests[1]).abs() <= tolerance, "solvers disagree from {height}: {rests:?}");
    }
}
