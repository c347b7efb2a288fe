//! Uniform spatial hash grid.
//!
//! A cubic domain of edge `size`, centred at the origin, is divided into
//! `cells_per_side^3` cubic cells of edge `cell_size`. Coordinates wrap
//! periodically, so every position (even far outside the domain, or NaN)
//! lands in a valid cell; particles that wrap onto each other are told apart
//! by the distance test of the neighbour search.
//!
//! The grid drives three stages of the neighbourhood pipeline:
//!
//! ```text
//! positions -> compute_hashes -> (radix sort) -> compute_cell_intervals
//!           -> compute_neighbor_list
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{IVec3, UVec3, Vec3, Vec4};

use crate::compute::{Device, DeviceBuffer, Kernel, KernelParams};
use crate::config::HashEncoding;
use crate::error::Result;
use crate::morton::{morton_3d_encode, MAX_MORTON_32_COORD};

/// Cell offsets visited by the neighbour search: the particle's own cell
/// first, then the 26 surrounding cells.
pub const NEIGHBOR_OFFSETS: [IVec3; 27] = neighbor_offsets();

const fn neighbor_offsets() -> [IVec3; 27] {
    let mut out = [IVec3::ZERO; 27];
    let mut n = 1;
    let mut x = -1;
    while x <= 1 {
        let mut y = -1;
        while y <= 1 {
            let mut z = -1;
            while z <= 1 {
                if !(x == 0 && y == 0 && z == 0) {
                    out[n] = IVec3::new(x, y, z);
                    n += 1;
                }
                z += 1;
            }
            y += 1;
        }
        x += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Grid geometry, laid out for upload as a uniform block.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GridInfo {
    /// Edge length of the cubic domain.
    pub size: f32,
    /// Edge length of one cell.
    pub cell_size: f32,
    /// `ceil(size / cell_size)`.
    pub cells_per_side: u32,
    /// `cells_per_side^3`, saturated on overflow (rejected at build).
    pub cell_count: u32,
}

impl GridInfo {
    /// Derive the geometry for a domain of edge `size` split into cells of
    /// edge `cell_size`.
    pub fn new(size: f32, cell_size: f32) -> Self {
        let cells_per_side = (size / cell_size).ceil().max(1.0) as u32;
        let cell_count = cells_per_side.saturating_mul(cells_per_side).saturating_mul(cells_per_side);
        Self { size, cell_size, cells_per_side, cell_count }
    }

    /// Wrapped integer cell coordinates of `p`.
    ///
    /// ```text
    /// c = floor((p + size/2) / cell_size) mod cells_per_side
    /// ```
    #[inline]
    pub fn cell_coordinates(&self, p: Vec3) -> UVec3 {
        let c = ((p + Vec3::splat(0.5 * self.size)) / self.cell_size).floor().as_ivec3();
        self.wrap(c)
    }

    /// Wrap signed cell coordinates into `[0, cells_per_side)`.
    #[inline]
    pub fn wrap(&self, c: IVec3) -> UVec3 {
        c.rem_euclid(IVec3::splat(self.cells_per_side as i32)).as_uvec3()
    }

    /// Row-major cell id `x + n * (y + n * z)`.
    #[inline]
    pub fn cell_id(&self, c: UVec3) -> u32 {
        let n = self.cells_per_side;
        c.x + n * (c.y + n * c.z)
    }

    /// Sort key of a wrapped cell under `encoding`.
    #[inline]
    pub fn hash(&self, c: UVec3, encoding: HashEncoding) -> u32 {
        match encoding {
            HashEncoding::CellId => self.cell_id(c),
            HashEncoding::Morton => morton_3d_encode(c.x, c.y, c.z) as u32,
        }
    }
}

/// Half-open range `[begin, end)` of sorted particles occupying one cell.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellInterval {
    /// First sorted index in the cell.
    pub begin: u32,
    /// One past the last sorted index in the cell.
    pub end: u32,
}

impl CellInterval {
    /// Interval of an empty cell.
    pub const EMPTY: CellInterval = CellInterval { begin: 0, end: 0 };

    /// Sorted indices covered by this interval.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.begin as usize..self.end.max(self.begin) as usize
    }

    /// Whether no particle occupies the cell.
    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

// ---------------------------------------------------------------------------
// Neighbour lists
// ---------------------------------------------------------------------------

/// Fixed-capacity neighbour lists, one row of `max_neighbors` slots per
/// reference particle.
#[derive(Debug, Clone)]
pub struct NeighborList {
    max_neighbors: usize,
    entries: DeviceBuffer<u32>,
    lengths: DeviceBuffer<u32>,
}

impl NeighborList {
    /// Create an empty list with rows of `max_neighbors` slots.
    pub fn new(label: &'static str, max_neighbors: usize) -> Self {
        Self {
            max_neighbors,
            entries: DeviceBuffer::new(label),
            lengths: DeviceBuffer::new("neighbor_lengths"),
        }
    }

    /// Allocate rows for `count` reference particles. All rows start empty.
    pub fn allocate(&mut self, count: usize) -> Result<()> {
        self.entries.reallocate(count * self.max_neighbors)?;
        self.lengths.reallocate(count)?;
        Ok(())
    }

    /// Slots per row.
    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Whether the list has no rows.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Neighbours of reference particle `i`, as sorted candidate indices.
    #[inline]
    pub fn neighbors(&self, i: usize) -> &[u32] {
        let start = i * self.max_neighbors;
        &self.entries[start..start + self.lengths[i] as usize]
    }

    /// Mark every row empty.
    pub fn clear(&mut self) {
        self.lengths.fill(0);
    }
}

/// Outcome of one neighbour list build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighborStats {
    /// Reference particles that had more in-range candidates than slots.
    pub truncated: usize,
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GridParams {
    info: GridInfo,
    morton: u32,
    _pad: [u32; 3],
}

impl GridParams {
    fn encoding(&self) -> HashEncoding {
        if self.morton != 0 {
            HashEncoding::Morton
        } else {
            HashEncoding::CellId
        }
    }
}

impl KernelParams for GridParams {
    fn validate(&self) -> Vec<String> {
        let mut log = Vec::new();
        let info = &self.info;
        if !(info.size.is_finite() && info.size > 0.0) {
            log.push(format!("grid size must be positive and finite, got {}", info.size));
        }
        if !(info.cell_size.is_finite() && info.cell_size > 0.0) {
            log.push(format!("cell size must be positive and finite, got {}", info.cell_size));
        }
        if (info.cells_per_side as u64).pow(3) > u32::MAX as u64 {
            log.push(format!("{} cells per side overflows 32-bit cell ids", info.cells_per_side));
        }
        if self.morton != 0 && info.cells_per_side > MAX_MORTON_32_COORD + 1 {
            log.push(format!(
                "morton hashes support at most {} cells per side, got {}",
                MAX_MORTON_32_COORD + 1,
                info.cells_per_side
            ));
        }
        log
    }
}

/// Uniform grid over a cubic domain centred at the origin.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    device: Device,
    encoding: HashEncoding,
    hashes: Kernel<GridParams>,
    intervals: Kernel<GridParams>,
    neighbors: Kernel<GridParams>,
}

impl UniformGrid {
    /// Build a grid of edge `size` split into cells of edge `cell_size`.
    pub fn new(device: &Device, size: f32, cell_size: f32, encoding: HashEncoding) -> Result<Self> {
        let params = Self::params(size, cell_size, encoding);
        let grid = Self {
            device: device.clone(),
            encoding,
            hashes: device.build_kernel("compute_hashes", params)?,
            intervals: device.build_kernel("compute_cell_intervals", params)?,
            neighbors: device.build_kernel("compute_neighbor_list", params)?,
        };
        tracing::debug!(
            size,
            cell_size,
            cells_per_side = params.info.cells_per_side,
            ?encoding,
            "grid built"
        );
        Ok(grid)
    }

    fn params(size: f32, cell_size: f32, encoding: HashEncoding) -> GridParams {
        GridParams {
            info: GridInfo::new(size, cell_size),
            morton: u32::from(encoding == HashEncoding::Morton),
            _pad: [0; 3],
        }
    }

    /// Current geometry.
    pub fn info(&self) -> GridInfo {
        self.hashes.params().info
    }

    /// Number of cells, i.e. the required length of an interval buffer.
    pub fn cell_count(&self) -> usize {
        self.info().cell_count as usize
    }

    /// Active hash encoding.
    pub fn encoding(&self) -> HashEncoding {
        self.encoding
    }

    /// Change the domain size, rebuilding every kernel.
    pub fn set_size(&mut self, size: f32) -> Result<()> {
        *self = Self::new(&self.device, size, self.info().cell_size, self.encoding)?;
        Ok(())
    }

    /// Change the cell size, rebuilding every kernel.
    pub fn set_cell_size(&mut self, cell_size: f32) -> Result<()> {
        *self = Self::new(&self.device, self.info().size, cell_size, self.encoding)?;
        Ok(())
    }

    /// Hash every position and reset the permutation to the identity.
    ///
    /// # Arguments
    /// * `positions` - Particle positions (xyz used).
    /// * `hashes` - Output cell hash per particle.
    /// * `mask` - Output permutation, `mask[i] = i`.
    pub fn compute_hashes(&self, positions: &[Vec4], hashes: &mut [u32], mask: &mut [u32]) {
        debug_assert_eq!(positions.len(), hashes.len());
        self.hashes.dispatch_zip(hashes, mask, |p, i, hash, m| {
            let c = p.info.cell_coordinates(positions[i].truncate());
            *hash = p.info.hash(c, p.encoding());
            *m = i as u32;
        });
    }

    /// Rebuild the cell intervals of hash-sorted particles.
    ///
    /// Every cell not occupied by a sorted particle ends up
    /// [`CellInterval::EMPTY`]. Occupied cells are indexed by the cell id of
    /// their particles, whatever the hash encoding.
    ///
    /// # Arguments
    /// * `sorted_positions` - Positions in hash order.
    /// * `sorted_hashes` - Hashes in ascending order.
    /// * `intervals` - Output, one entry per cell.
    pub fn compute_cell_intervals(
        &self,
        sorted_positions: &[Vec4],
        sorted_hashes: &[u32],
        intervals: &mut [CellInterval],
    ) {
        debug_assert_eq!(intervals.len(), self.cell_count());
        self.intervals.dispatch(intervals, |_, _, cell| *cell = CellInterval::EMPTY);

        let info = self.info();
        let n = sorted_hashes.len();
        let mut begin = 0;
        while begin < n {
            let hash = sorted_hashes[begin];
            let mut end = begin + 1;
            while end < n && sorted_hashes[end] == hash {
                end += 1;
            }
            let cell = info.cell_id(info.cell_coordinates(sorted_positions[begin].truncate()));
            intervals[cell as usize] = CellInterval { begin: begin as u32, end: end as u32 };
            begin = end;
        }
    }

    /// Visit every candidate within one cell size of `p`.
    ///
    /// Scans the cell of `p` and its 26 wrapped neighbours, each distinct cell
    /// once. `f` receives the candidate's sorted index, the displacement
    /// `p - candidate` and its length; returning `false` stops the scan.
    #[inline]
    pub fn for_each_neighbor<F>(&self, p: Vec4, candidates: &[Vec4], intervals: &[CellInterval], f: F)
    where
        F: FnMut(usize, Vec3, f32) -> bool,
    {
        visit_neighbors(&self.info(), p, candidates, intervals, f);
    }

    /// Build the neighbour list of every reference particle.
    ///
    /// A candidate is a neighbour when its distance to the reference particle
    /// is at most the cell size. Rows are filled in stencil order (own cell
    /// first) and stop at `list.max_neighbors()`; further candidates are
    /// dropped and the row is counted in [`NeighborStats::truncated`]. A
    /// particle is its own neighbour when references and candidates coincide.
    ///
    /// # Arguments
    /// * `references` - Particles the rows belong to.
    /// * `candidates` - Hash-sorted particles described by `intervals`.
    /// * `intervals` - Cell intervals of `candidates`.
    /// * `list` - Output, with one row per reference particle.
    pub fn compute_neighbor_list(
        &self,
        references: &[Vec4],
        candidates: &[Vec4],
        intervals: &[CellInterval],
        list: &mut NeighborList,
    ) -> NeighborStats {
        debug_assert_eq!(references.len(), list.len());
        let max = list.max_neighbors;
        if max == 0 || references.is_empty() {
            list.clear();
            return NeighborStats::default();
        }

        let truncated = AtomicUsize::new(0);
        self.neighbors.dispatch_chunks(&mut list.entries, max, &mut list.lengths, |p, i, row, len| {
            let mut n = 0;
            let mut overflow = false;
            visit_neighbors(&p.info, references[i], candidates, intervals, |j, _, _| {
                if n == max {
                    overflow = true;
                    return false;
                }
                row[n] = j as u32;
                n += 1;
                true
            });
            if overflow {
                truncated.fetch_add(1, Ordering::Relaxed);
            }
            *len = n as u32;
        });

        let stats = NeighborStats { truncated: truncated.into_inner() };
        if stats.truncated > 0 {
            tracing::debug!(truncated = stats.truncated, max_neighbors = max, "neighbour lists truncated");
        }
        stats
    }
}

/// Stencil scan shared by the neighbour list and direct neighbour queries.
#[inline]
fn visit_neighbors<F>(info: &GridInfo, p: Vec4, candidates: &[Vec4], intervals: &[CellInterval], mut f: F)
where
    F: FnMut(usize, Vec3, f32) -> bool,
{
    let p = p.truncate();
    let sqr_radius = info.cell_size * info.cell_size;
    let origin = info.cell_coordinates(p).as_ivec3();
    let dedupe = info.cells_per_side < 3;
    let mut visited = [u32::MAX; 27];

    for (k, offset) in NEIGHBOR_OFFSETS.iter().enumerate() {
        let cell = info.cell_id(info.wrap(origin + *offset));
        if dedupe {
            if visited[..k].contains(&cell) {
                continue;
            }
            visited[k] = cell;
        }
        let Some(interval) = intervals.get(cell as usize) else {
            continue;
        };
        for j in interval.range() {
            let r = p - candidates[j].truncate();
            let d2 = r.length_squared();
            if d2 > sqr_radius {
                continue;
            }
            if !f(j, r, d2.sqrt()) {
                return;
            }
        }
    }
}
