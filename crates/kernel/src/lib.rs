//! SPH Fluid Simulation Engine
//!
//! This crate provides the simulation engine of a Smoothed Particle
//! Hydrodynamics fluid coupled two-way with rigid bodies. It is compute-focused
//! and renderer-agnostic: fluid positions are exposed through a shared buffer
//! a renderer can poll.
//!
//! # Modules
//! - [`compute`] -- Typed device buffers, validated kernels and parallel dispatch.
//! - [`grid`] -- Uniform spatial hash grid, cell intervals and neighbour lists.
//! - [`sort`] -- Key-value radix sort and gather/scatter by permutation.
//! - [`morton`] -- 3D Morton (Z-order) encoding of cell coordinates.
//! - [`sph`] -- Müller smoothing kernel constants and Akinci surface tension terms.
//! - [`eos`] -- Linear equation of state.
//! - [`sampling`] -- Surface sampling of rigid-body shapes.
//! - [`body`] -- Rigid-body and fluid-volume contracts.
//! - [`boundary`] -- Boundary particles: sampling, phi, sync and force feedback.
//! - [`particle`] -- Fluid particle buffers in render and hash order.
//! - [`solver`] -- WCSPH and PCISPH solvers behind [`FluidSimulation`].
//! - [`config`] -- Physical constants and solver settings.
//!
//! # Step pipeline
//!
//! ```text
//! boundary sync -> hash -> radix sort -> gather -> cell intervals
//!   -> neighbour lists -> density -> pressure -> forces -> integrate -> scatter
//! ```

#![warn(missing_docs)]

pub mod body;
pub mod boundary;
pub mod compute;
pub mod config;
pub mod eos;
pub mod error;
pub mod grid;
pub mod morton;
pub mod particle;
pub mod sampling;
pub mod solver;
pub mod sort;
pub mod sph;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use body::{BoxVolume, FluidVolume, KinematicBody, RigidBody};
pub use boundary::{BoundaryHandler, BoundaryState, BoundarySurface};
pub use compute::{Device, DeviceBuffer, DispatchProfile, SharedBuffer};
pub use config::{EngineConfig, HashEncoding, PcisphSettings, PhysicsSettings, SimulationSettings, SolverMethod};
pub use eos::linear_eos;
pub use error::{Result, SimError};
pub use grid::{CellInterval, GridInfo, NeighborList, NeighborStats, UniformGrid};
pub use particle::FluidParticles;
pub use sampling::Shape;
pub use solver::{FluidSimulation, PcisphSolver, PcisphStepReport, Solver, WcsphSolver};
pub use sort::SortPipeline;
pub use sph::SmoothingKernelConstants;

#[cfg(feature = "gpu")]
pub use gpu::{GpuSortOutput, GpuSortPipeline};
