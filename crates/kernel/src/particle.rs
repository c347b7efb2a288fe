//! Fluid particle storage.
//!
//! All buffers are parallel: index `i` refers to the same particle in every
//! buffer of the same order. Two orders exist:
//!
//! - render order: the order particles were seeded in. The render positions
//!   (held by the solver in a [`crate::compute::SharedBuffer`]) and
//!   `velocities` stay in this order between steps.
//! - hash order: rebuilt each step by sorting on cell hash. Every `sorted_*`
//!   buffer and every per-step field (density, pressure, ...) uses it.
//!
//! `mask` maps hash order back to render order: sorted particle `i` is render
//! particle `mask[i]`.

use glam::Vec4;

use crate::boundary::{BoundaryHandler, FluidView};
use crate::compute::DeviceBuffer;
use crate::error::Result;
use crate::grid::{CellInterval, NeighborList, NeighborStats, UniformGrid};
use crate::sort::SortPipeline;

/// Buffers of one fluid particle set.
#[derive(Debug, Clone)]
pub struct FluidParticles {
    /// Velocities in render order.
    pub velocities: DeviceBuffer<Vec4>,
    /// Cell hash per particle, ascending after sorting.
    pub hashes: DeviceBuffer<u32>,
    /// Permutation from hash order to render order.
    pub mask: DeviceBuffer<u32>,
    /// Positions in hash order.
    pub sorted_positions: DeviceBuffer<Vec4>,
    /// Velocities in hash order.
    pub sorted_velocities: DeviceBuffer<Vec4>,
    /// Density (kg/m^3).
    pub densities: DeviceBuffer<f32>,
    /// Pressure.
    pub pressures: DeviceBuffer<f32>,
    /// Surface normals used by surface tension.
    pub normals: DeviceBuffer<Vec4>,
    /// Non-pressure acceleration: gravity, viscosity, surface tension.
    pub accelerations: DeviceBuffer<Vec4>,
    /// Pressure acceleration.
    pub pressure_accelerations: DeviceBuffer<Vec4>,
    /// Intervals of the sorted particles, one per grid cell.
    pub cell_intervals: DeviceBuffer<CellInterval>,
    /// Fluid-fluid neighbours.
    pub fluid_neighbors: NeighborList,
    /// Fluid-boundary neighbours.
    pub boundary_neighbors: NeighborList,
}

impl FluidParticles {
    /// Create an empty set with neighbour rows of `max_neighbors` slots.
    pub fn new(max_neighbors: usize) -> Self {
        Self {
            velocities: DeviceBuffer::new("fluid_velocities"),
            hashes: DeviceBuffer::new("fluid_hashes"),
            mask: DeviceBuffer::new("fluid_mask"),
            sorted_positions: DeviceBuffer::new("fluid_sorted_positions"),
            sorted_velocities: DeviceBuffer::new("fluid_sorted_velocities"),
            densities: DeviceBuffer::new("fluid_densities"),
            pressures: DeviceBuffer::new("fluid_pressures"),
            normals: DeviceBuffer::new("fluid_normals"),
            accelerations: DeviceBuffer::new("fluid_accelerations"),
            pressure_accelerations: DeviceBuffer::new("fluid_pressure_accelerations"),
            cell_intervals: DeviceBuffer::new("fluid_cell_intervals"),
            fluid_neighbors: NeighborList::new("fluid_neighbors", max_neighbors),
            boundary_neighbors: NeighborList::new("boundary_neighbors", max_neighbors),
        }
    }

    /// Reallocate every buffer for `count` particles at rest and a grid of
    /// `cell_count` cells.
    pub fn allocate(&mut self, count: usize, cell_count: usize) -> Result<()> {
        for buffer in [
            &mut self.velocities,
            &mut self.sorted_positions,
            &mut self.sorted_velocities,
            &mut self.normals,
            &mut self.accelerations,
            &mut self.pressure_accelerations,
        ] {
            buffer.reallocate(count)?;
        }
        self.hashes.reallocate(count)?;
        self.mask.reallocate(count)?;
        self.densities.reallocate(count)?;
        self.pressures.reallocate(count)?;
        self.cell_intervals.reallocate(cell_count)?;
        self.fluid_neighbors.allocate(count)?;
        self.boundary_neighbors.allocate(count)?;
        Ok(())
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.velocities.len()
    }

    /// Whether the set holds no particles.
    pub fn is_empty(&self) -> bool {
        self.velocities.is_empty()
    }

    /// Hash, sort and gather positions and velocities, then rebuild the
    /// cell intervals.
    ///
    /// # Arguments
    /// * `positions` - Render-order positions.
    pub fn sort(&mut self, grid: &UniformGrid, sort: &mut SortPipeline, positions: &[Vec4]) {
        grid.compute_hashes(positions, &mut self.hashes, &mut self.mask);
        sort.radix_sort(&mut self.hashes, &mut self.mask);
        sort.gather(positions, &self.mask, &mut self.sorted_positions);
        sort.gather(&self.velocities, &self.mask, &mut self.sorted_velocities);
        grid.compute_cell_intervals(&self.sorted_positions, &self.hashes, &mut self.cell_intervals);
    }

    /// Rebuild fluid-fluid and fluid-boundary neighbour lists.
    pub fn build_neighbourhood(&mut self, grid: &UniformGrid, boundary: &BoundaryHandler) -> NeighborStats {
        let fluid = grid.compute_neighbor_list(
            &self.sorted_positions,
            &self.sorted_positions,
            &self.cell_intervals,
            &mut self.fluid_neighbors,
        );
        let solid = boundary.build_neighbourhood(&self.sorted_positions, &mut self.boundary_neighbors);
        NeighborStats { truncated: fluid.truncated + solid.truncated }
    }

    /// Sorted state seen by the boundary force feedback.
    pub fn view(&self, particle_mass: f32, viscosity: f32) -> FluidView<'_> {
        FluidView {
            positions: &self.sorted_positions,
            velocities: &self.sorted_velocities,
            densities: &self.densities,
            pressures: &self.pressures,
            cell_intervals: &self.cell_intervals,
            particle_mass,
            viscosity,
        }
    }

    /// Scatter sorted positions and velocities back to render order.
    pub fn write_back(&mut self, sort: &SortPipeline, positions: &mut [Vec4]) {
        sort.scatter(&self.sorted_positions, &self.mask, positions);
        sort.scatter(&self.sorted_velocities, &self.mask, &mut self.velocities);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Device;
    use crate::config::{HashEncoding, PhysicsSettings, SimulationSettings};

    #[test]
    fn empty_particle_set() {
        let fluid = FluidParticles::new(8);
        assert_eq!(fluid.len(), 0);
        assert!(fluid.is_empty());
    }

    #[test]
    fn sort_then_write_back_restores_render_order() {
        let device = Device::default();
        let grid = UniformGrid::new(&device, 1.0, 0.1, HashEncoding::Morton).unwrap();
        let mut sort = SortPipeline::new(&device).unwrap();
        let mut fluid = FluidParticles::new(8);
        let positions = vec![
            Vec4::new(0.3, 0.3, 0.3, 1.0),
            Vec4::new(-0.3, -0.3, -0.3, 1.0),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        ];
        fluid.allocate(3, grid.cell_count()).unwrap();
        fluid.velocities[0] = Vec4::X;

        fluid.sort(&grid, &mut sort, &positions);
        assert!(fluid.hashes.windows(2).all(|w| w[0] <= w[1]));
        let moved = fluid.mask.iter().position(|&m| m == 0).unwrap();
        assert_eq!(fluid.sorted_velocities[moved], Vec4::X);

        let mut out = vec![Vec4::ZERO; 3];
        fluid.write_back(&sort, &mut out);
        assert_eq!(out, positions);
        assert_eq!(fluid.velocities[0], Vec4::X);
    }

    #[test]
    fn neighbourhood_without_boundary() {
        let device = Device::default();
        let sim = SimulationSettings { grid_size: 1.0, ..Default::default() };
        let physics = PhysicsSettings::default();
        let grid = UniformGrid::new(&device, 1.0, sim.fluid_support_radius, sim.hash_encoding).unwrap();
        let boundary = BoundaryHandler::new(&device, &physics, &sim).unwrap();
        let mut sort = SortPipeline::new(&device).unwrap();

        let positions = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(0.016, 0.0, 0.0, 1.0)];
        let mut fluid = FluidParticles::new(8);
        fluid.allocate(2, grid.cell_count()).unwrap();
        fluid.sort(&grid, &mut sort, &positions);
        let stats = fluid.build_neighbourhood(&grid, &boundary);
        assert_eq!(stats.truncated, 0);
        assert_eq!(fluid.fluid_neighbors.neighbors(0).len(), 2);
        assert!(fluid.boundary_neighbors.neighbors(0).is_empty());
    }
}
