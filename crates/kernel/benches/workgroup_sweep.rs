//! Work-group size sweep over the fluid step.
//!
//! Steps a WCSPH block with every candidate local size and writes the best
//! one as the default of a dispatch profile.
//! Run with: cargo bench -p sph-kernel --bench workgroup_sweep [-- <profile.json>]

use std::time::Instant;

use glam::Vec3;
use sph_kernel::{BoxVolume, Device, DispatchProfile, FluidSimulation, PhysicsSettings, SimulationSettings, Solver};

fn bench_local_size(local_size: usize, side: f32, n_steps: usize) -> f64 {
    let profile = DispatchProfile { default_local_size: local_size, ..Default::default() };
    let settings = SimulationSettings { grid_size: 2.0, time_step: 0.002, ..Default::default() };
    let mut solver =
        Solver::new(&Device::new(profile), &PhysicsSettings::default(), &settings).expect("solver build failed");
    solver
        .add_volume(Box::new(BoxVolume::new(Vec3::splat(side), Vec3::ZERO)))
        .expect("volume");

    // Warmup
    for _ in 0..3 {
        solver.simulate();
    }

    let start = Instant::now();
    for _ in 0..n_steps {
        solver.simulate();
    }
    let elapsed = start.elapsed().as_secs_f64();
    let sps = n_steps as f64 / elapsed;

    println!(
        "  local={:>4}  {:>6} particles  {:>3} steps  {:.3}s  {:>8.1} steps/s",
        local_size,
        solver.particle_count(),
        n_steps,
        elapsed,
        sps
    );
    sps
}

fn main() {
    println!("=== Work-group Size Sweep ===\n");

    let output = std::env::args()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .unwrap_or_else(|| "dispatch_profile.json".to_string());
    let local_sizes = [32, 64, 128, 256, 512];
    let mut profile = DispatchProfile::default();

    // (cube side in m, steps)
    for &(side, steps) in &[(0.3f32, 20), (0.5, 10)] {
        println!("--- fluid cube of side {side} m ---");
        let mut best_local = DispatchProfile::DEFAULT_LOCAL_SIZE;
        let mut best_sps = 0.0f64;

        for &local in &local_sizes {
            let sps = bench_local_size(local, side, steps);
            if sps > best_sps {
                best_sps = sps;
                best_local = local;
            }
        }
        println!("  Best: local={} ({:.1} steps/s)\n", best_local, best_sps);
        // The largest scene decides.
        profile.default_local_size = best_local;
    }

    match profile.save(&output) {
        Ok(()) => println!("Profile written to {output}"),
        Err(e) => eprintln!("Could not write {output}: {e}"),
    }
}
