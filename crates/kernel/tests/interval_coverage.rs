//! Cell interval coverage.
//!
//! After hashing, sorting and building intervals, every sorted particle must
//! belong to exactly one interval, and that interval must be the one of the
//! cell the particle lies in. Checked for both hash encodings.

use glam::Vec4;
use sph_kernel::{Device, FluidParticles, HashEncoding, SortPipeline, UniformGrid};

fn scattered_positions(count: usize, half_extent: f32) -> Vec<Vec4> {
    let mut state = 0x9e37_79b9u32;
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

fn check_coverage(encoding: HashEncoding, positions: &[Vec4]) {
    let device = Device::default();
    let grid = UniformGrid::new(&device, 1.0, 0.032, encoding).unwrap();
    let mut sort = SortPipeline::new(&device).unwrap();
    let mut fluid = FluidParticles::new(100);
    fluid.allocate(positions.len(), grid.cell_count()).unwrap();
    fluid.sort(&grid, &mut sort, positions);

    let info = grid.info();
    let mut owner = vec![usize::MAX; positions.len()];
    let mut occupied = 0;
    for (cell, interval) in fluid.cell_intervals.iter().enumerate() {
        if interval.is_empty() {
            continue;
        }
        occupied += 1;
        for i in interval.range() {
            assert_eq!(owner[i], usize::MAX, "sorted particle {i} is in two intervals");
            owner[i] = cell;
            let actual = info.cell_id(info.cell_coordinates(fluid.sorted_positions[i].truncate()));
            assert_eq!(actual as usize, cell, "sorted particle {i} lies in cell {actual}, interval of cell {cell}");
        }
    }
    assert!(owner.iter().all(|&c| c != usize::MAX), "some sorted particles are in no interval");
    eprintln!("{encoding:?}: {} particles in {occupied} occupied cells", positions.len());
}

#[test]
fn cell_id_intervals_cover_every_particle() {
    check_coverage(HashEncoding::CellId, &scattered_positions(20_000, 0.45));
}

#[test]
fn morton_intervals_cover_every_particle() {
    check_coverage(HashEncoding::Morton, &scattered_positions(20_000, 0.45));
}

#[test]
fn positions_outside_the_domain_are_covered() {
    // Everything wraps into some cell.
    check_coverage(HashEncoding::Morton, &scattered_positions(5_000, 3.0));
}

#[test]
fn dense_cluster_in_one_cell() {
    let positions = vec![Vec4::new(0.01, 0.01, 0.01, 1.0); 300];
    check_coverage(HashEncoding::CellId, &positions);
}
