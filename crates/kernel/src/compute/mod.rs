//! Data-parallel compute backend.
//!
//! The engine is written against three notions only: typed buffers, kernels
//! built from a validated parameter block, and dispatch over N work items.
//! This module implements them on the CPU with rayon. Each dispatch is a
//! blocking parallel loop, so consecutive dispatches are ordered the same way
//! an in-order device queue orders them.

pub mod buffer;
pub mod program;
pub mod tuning;

use std::sync::Arc;

use glam::Vec4;
use rayon::prelude::*;

use crate::error::{Result, SimError};

pub use buffer::{DeviceBuffer, SharedBuffer, SharedBufferGuard};
pub use program::{Kernel, KernelParams};
pub use tuning::DispatchProfile;

/// Handle to the compute backend. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Device {
    profile: Arc<DispatchProfile>,
}

impl Device {
    /// Create a device using `profile` to size work groups.
    pub fn new(profile: DispatchProfile) -> Self {
        Self { profile: Arc::new(profile) }
    }

    /// The active dispatch profile.
    pub fn profile(&self) -> &DispatchProfile {
        &self.profile
    }

    /// Build a kernel, validating its parameter block.
    ///
    /// On failure the full build log is logged and returned in
    /// [`SimError::Build`].
    pub fn build_kernel<P: KernelParams>(&self, name: &'static str, params: P) -> Result<Kernel<P>> {
        let problems = params.validate();
        if !problems.is_empty() {
            let log = problems.join("\n");
            tracing::error!(kernel = name, ?params, "kernel build failed:\n{log}");
            return Err(SimError::Build { kernel: name, log });
        }
        let local_size = self.profile.local_size(name);
        tracing::debug!(kernel = name, local_size, "kernel built");
        Ok(Kernel::new(name, params, local_size))
    }
}

// ---------------------------------------------------------------------------
// Reductions
// ---------------------------------------------------------------------------

/// Maximum of `values`, or `None` when empty.
pub fn reduce_max(values: &[f32]) -> Option<f32> {
    values.par_iter().copied().reduce_with(f32::max)
}

/// Component-wise sum of `values`.
pub fn reduce_sum(values: &[Vec4]) -> Vec4 {
    values.par_iter().copied().reduce(|| Vec4::ZERO, |a, b| a + b)
}
