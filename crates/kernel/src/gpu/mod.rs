//! wgpu implementation of the fluid sort pipeline.
//!
//! `GpuSortPipeline` runs hash, sort and gather for fluid positions on a
//! GPU adapter (Metal/Vulkan/DX12 via wgpu). The sort is a counting sort
//! keyed by row-major cell id:
//!
//! 1. hash every particle into its wrapped cell,
//! 2. clear and count particles per cell,
//! 3. exclusive prefix over the counts (single workgroup),
//! 4. scatter particle indices with an atomic cursor per cell,
//! 5. gather positions through the resulting mask.
//!
//! Order within a cell is undefined, so results match the CPU pipeline up to
//! a permutation inside each cell. Morton keys are not supported because the
//! counting sort buckets by cell id.
//!
//! # Bind group layout
//! A single group holds the params uniform and seven storage buffers, within
//! the default limit of eight storage buffers per shader stage.

use std::sync::mpsc;

use bytemuck::Pod;
use glam::Vec4;
use wgpu::util::DeviceExt;

use crate::config::HashEncoding;
use crate::error::{Result, SimError};
use crate::grid::{CellInterval, GridInfo, UniformGrid};

/// Invocations per workgroup of every sort pass.
pub const WORKGROUP_SIZE: u32 = 256;

/// Uniform block of the sort shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SortParams {
    grid: GridInfo,
    n_particles: u32,
    _pad: [u32; 3],
}

/// Result of one GPU sort, read back to the host.
#[derive(Debug, Clone, Default)]
pub struct GpuSortOutput {
    /// Cell ids in ascending order.
    pub sorted_hashes: Vec<u32>,
    /// Sorted slot to input index.
    pub mask: Vec<u32>,
    /// Positions in sorted order.
    pub sorted_positions: Vec<Vec4>,
    /// Per-cell `[begin, end)` into the sorted order, indexed by cell id.
    pub cell_intervals: Vec<CellInterval>,
}

struct Pipelines {
    compute_hashes: wgpu::ComputePipeline,
    clear_counts: wgpu::ComputePipeline,
    count_particles: wgpu::ComputePipeline,
    prefix_sum: wgpu::ComputePipeline,
    scatter_particles: wgpu::ComputePipeline,
    gather_positions: wgpu::ComputePipeline,
}

/// Device-side hash + counting sort + gather.
pub struct GpuSortPipeline {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    pipelines: Pipelines,
    info: GridInfo,
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    request_adapter().is_some()
}

fn request_adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

fn device_error(kernel: &'static str, log: impl Into<String>) -> SimError {
    let log = log.into();
    tracing::error!(kernel, "{log}");
    SimError::Build { kernel, log }
}

impl GpuSortPipeline {
    /// Build the pipeline for a grid of geometry `info`.
    ///
    /// Fails with [`SimError::Build`] for Morton encoding, for a grid too
    /// large to bucket, or when no adapter or device is available.
    pub fn new(info: GridInfo, encoding: HashEncoding) -> Result<Self> {
        if encoding == HashEncoding::Morton {
            return Err(device_error("gpu_sort", "counting sort buckets by cell id; Morton keys are not supported"));
        }
        if info.cells_per_side == 0 || info.cell_count == u32::MAX {
            return Err(device_error("gpu_sort", format!("grid of {} cells per side cannot be bucketed", info.cells_per_side)));
        }

        let adapter = request_adapter().ok_or_else(|| device_error("gpu_sort", "no suitable GPU adapter found"))?;
        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_sort_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| device_error("gpu_sort", format!("failed to create device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sort"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sort.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sort_bgl"),
            entries: &[
                bgl_uniform(0),    // params
                bgl_storage_ro(1), // positions
                bgl_storage_rw(2), // hashes
                bgl_storage_rw(3), // counts / cursors
                bgl_storage_rw(4), // offsets
                bgl_storage_rw(5), // sorted_hashes
                bgl_storage_rw(6), // mask
                bgl_storage_rw(7), // sorted_positions
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sort_pl"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let pipelines = Pipelines {
            compute_hashes: pipeline("compute_hashes"),
            clear_counts: pipeline("clear_counts"),
            count_particles: pipeline("count_particles"),
            prefix_sum: pipeline("prefix_sum"),
            scatter_particles: pipeline("scatter_particles"),
            gather_positions: pipeline("gather_positions"),
        };

        Ok(Self { device, queue, layout, pipelines, info })
    }

    /// Build the pipeline for the geometry and encoding of `grid`.
    pub fn from_grid(grid: &UniformGrid) -> Result<Self> {
        Self::new(grid.info(), grid.encoding())
    }

    /// Grid geometry the pipeline buckets by.
    pub fn info(&self) -> GridInfo {
        self.info
    }

    /// Hash, sort and gather `positions`, then read everything back.
    pub fn sort(&self, positions: &[Vec4]) -> Result<GpuSortOutput> {
        let n = positions.len();
        let cells = self.info.cell_count as usize;
        if n == 0 {
            return Ok(GpuSortOutput { cell_intervals: vec![CellInterval::EMPTY; cells], ..Default::default() });
        }
        let n_particles =
            u32::try_from(n).map_err(|_| device_error("gpu_sort", format!("{n} particles exceed the u32 index range")))?;

        let params = SortParams { grid: self.info, n_particles, _pad: [0; 3] };
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let positions_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_positions"),
            contents: bytemuck::cast_slice(positions),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let hashes = self.storage_buffer("sort_hashes", n * 4);
        let counts = self.storage_buffer("sort_counts", cells * 4);
        let offsets = self.storage_buffer("sort_offsets", cells * 4);
        let sorted_hashes = self.storage_buffer("sort_sorted_hashes", n * 4);
        let mask = self.storage_buffer("sort_mask", n * 4);
        let sorted_positions = self.storage_buffer("sort_sorted_positions", n * 16);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sort_bg"),
            layout: &self.layout,
            entries: &[
                bg_entry(0, &params_buf),
                bg_entry(1, &positions_buf),
                bg_entry(2, &hashes),
                bg_entry(3, &counts),
                bg_entry(4, &offsets),
                bg_entry(5, &sorted_hashes),
                bg_entry(6, &mask),
                bg_entry(7, &sorted_positions),
            ],
        });

        let wg_particles = dispatch_size(n_particles, WORKGROUP_SIZE);
        let wg_cells = dispatch_size(self.info.cell_count, WORKGROUP_SIZE);
        let passes = [
            ("compute_hashes", &self.pipelines.compute_hashes, wg_particles),
            ("clear_counts", &self.pipelines.clear_counts, wg_cells),
            ("count_particles", &self.pipelines.count_particles, wg_particles),
            ("prefix_sum", &self.pipelines.prefix_sum, 1),
            ("scatter_particles", &self.pipelines.scatter_particles, wg_particles),
            ("gather_positions", &self.pipelines.gather_positions, wg_particles),
        ];

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("gpu_sort"),
        });
        for (label, pipeline, groups) in passes {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let begins: Vec<u32> = self.read_buffer(&offsets, cells)?;
        let ends: Vec<u32> = self.read_buffer(&counts, cells)?;
        let output = GpuSortOutput {
            sorted_hashes: self.read_buffer(&sorted_hashes, n)?,
            mask: self.read_buffer(&mask, n)?,
            sorted_positions: self.read_buffer(&sorted_positions, n)?,
            cell_intervals: begins
                .into_iter()
                .zip(ends)
                .map(|(begin, end)| CellInterval { begin, end })
                .collect(),
        };
        tracing::debug!(particles = n, cells, "gpu sort");
        Ok(output)
    }

    fn storage_buffer(&self, label: &'static str, bytes: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (bytes as u64).max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Copy `len` elements of `source` into a staging buffer and map it.
    fn read_buffer<T: Pod>(&self, source: &wgpu::Buffer, len: usize) -> Result<Vec<T>> {
        let byte_len = (len * std::mem::size_of::<T>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sort_staging"),
            size: byte_len.max(4),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sort_readback"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, byte_len);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..byte_len);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| device_error("gpu_readback", e.to_string()))?
            .map_err(|e| device_error("gpu_readback", e.to_string()))?;

        let data = slice.get_mapped_range();
        let result = bytemuck::cast_slice::<u8, T>(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

fn bg_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry { binding, resource: buffer.as_entire_binding() }
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Uniform)
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Storage { read_only: true })
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Storage { read_only: false })
}

fn bgl_buffer(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer { ty, has_dynamic_offset: false, min_binding_size: None },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morton_is_rejected_before_touching_the_adapter() {
        let info = GridInfo::new(1.0, 0.1);
        let err = GpuSortPipeline::new(info, HashEncoding::Morton);
        assert!(matches!(err, Err(SimError::Build { kernel: "gpu_sort", .. })));
    }

    #[test]
    fn dispatch_rounds_up() {
        assert_eq!(dispatch_size(1, 256), 1);
        assert_eq!(dispatch_size(256, 256), 1);
        assert_eq!(dispatch_size(257, 256), 2);
    }

    #[test]
    fn params_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<SortParams>(), 32);
    }
}
