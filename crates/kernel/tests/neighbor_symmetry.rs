//! Neighbour list symmetry and completeness.
//!
//! Without truncation, `j` is a neighbour of `i` exactly when `i` is a
//! neighbour of `j`, and the lists match a brute-force search over all pairs
//! within the support radius.

use std::collections::BTreeSet;

use glam::Vec4;
use sph_kernel::{BoundaryHandler, Device, FluidParticles, PhysicsSettings, SimulationSettings, SortPipeline, UniformGrid};

fn scattered_positions(count: usize, half_extent: f32) -> Vec<Vec4> {
    let mut state = 0x1234_5678u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32) * 2.0 - 1.0
    };
    (0..count)
        .map(|_| Vec4::new(next() * half_extent, next() * half_extent, next() * half_extent, 1.0))
        .collect()
}

#[test]
fn lists_are_symmetric_and_complete() {
    let device = Device::default();
    let physics = PhysicsSettings::default();
    let sim = SimulationSettings { grid_size: 1.0, ..Default::default() };
    let h = sim.fluid_support_radius;
    let grid = UniformGrid::new(&device, sim.grid_size, h, sim.hash_encoding).unwrap();
    let boundary = BoundaryHandler::new(&device, &physics, &sim).unwrap();
    let mut sort = SortPipeline::new(&device).unwrap();

    let positions = scattered_positions(400, 0.1);
    let mut fluid = FluidParticles::new(100);
    fluid.allocate(positions.len(), grid.cell_count()).unwrap();
    fluid.sort(&grid, &mut sort, &positions);
    let stats = fluid.build_neighbourhood(&grid, &boundary);
    assert_eq!(stats.truncated, 0, "lists were truncated; lower the particle density");

    let n = positions.len();
    let lists: Vec<BTreeSet<u32>> = (0..n)
        .map(|i| fluid.fluid_neighbors.neighbors(i).iter().copied().collect())
        .collect();

    let mut pairs = 0;
    for i in 0..n {
        assert!(lists[i].contains(&(i as u32)), "particle {i} is not its own neighbour");
        for &j in &lists[i] {
            assert!(lists[j as usize].contains(&(i as u32)), "{j} in list of {i} but not the reverse");
        }
        let xi = fluid.sorted_positions[i].truncate();
        for j in 0..n {
            let d = (xi - fluid.sorted_positions[j].truncate()).length();
            if (d - h).abs() < 1e-6 {
                continue;
            }
            let listed = lists[i].contains(&(j as u32));
            assert_eq!(listed, d < h, "pair ({i}, {j}) at distance {d}: listed = {listed}");
            pairs += listed as usize;
        }
    }
    eprintln!("{n} particles, {pairs} directed neighbour pairs");
}

#[test]
fn truncation_is_counted() {
    let device = Device::default();
    let grid = UniformGrid::new(&device, 1.0, 0.032, Default::default()).unwrap();
    let physics = PhysicsSettings::default();
    let sim = SimulationSettings { grid_size: 1.0, ..Default::default() };
    let boundary = BoundaryHandler::new(&device, &physics, &sim).unwrap();
    let mut sort = SortPipeline::new(&device).unwrap();

    let positions = vec![Vec4::new(0.0, 0.0, 0.0, 1.0); 20];
    let mut fluid = FluidParticles::new(8);
    fluid.allocate(positions.len(), grid.cell_count()).unwrap();
    fluid.sort(&grid, &mut sort, &positions);
    let stats = fluid.build_neighbourhood(&grid, &boundary);
    assert_eq!(stats.truncated, 20);
    assert!((0..20).all(|i| fluid.fluid_neighbors.neighbors(i).len() == 8));
}
