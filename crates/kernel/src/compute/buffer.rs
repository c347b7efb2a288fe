//! Typed device buffers and the position buffer shared with the renderer.

use std::ops::{Deref, DerefMut};

use bytemuck::Pod;
use glam::Vec4;

use crate::error::{Result, SimError};

/// A typed, labelled, index-addressable device buffer.
///
/// Allocation is fallible: running out of memory is reported as
/// [`SimError::Allocation`] instead of aborting the process.
#[derive(Debug, Clone)]
pub struct DeviceBuffer<T> {
    label: &'static str,
    data: Vec<T>,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Create an empty buffer. No memory is reserved.
    pub fn new(label: &'static str) -> Self {
        Self { label, data: Vec::new() }
    }

    /// Allocate `len` zeroed elements.
    pub fn zeroed(label: &'static str, len: usize) -> Result<Self> {
        Self::filled(label, len, T::zeroed())
    }

    /// Allocate `len` elements set to `value`.
    pub fn filled(label: &'static str, len: usize, value: T) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|source| SimError::Allocation { label, len, source })?;
        data.resize(len, value);
        Ok(Self { label, data })
    }

    /// Allocate a buffer holding a copy of `values`.
    pub fn from_slice(label: &'static str, values: &[T]) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(values.len())
            .map_err(|source| SimError::Allocation { label, len: values.len(), source })?;
        data.extend_from_slice(values);
        Ok(Self { label, data })
    }

    /// Release the current storage and allocate `len` zeroed elements.
    pub fn reallocate(&mut self, len: usize) -> Result<()> {
        *self = Self::zeroed(self.label, len)?;
        Ok(())
    }

    /// Release the current storage and replace it with a copy of `values`.
    pub fn upload(&mut self, values: &[T]) -> Result<()> {
        *self = Self::from_slice(self.label, values)?;
        Ok(())
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Buffer label used in diagnostics.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Raw byte view of the contents.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

impl<T> Deref for DeviceBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for DeviceBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

// ---------------------------------------------------------------------------
// Render interop
// ---------------------------------------------------------------------------

/// Fluid position buffer shared between the solver and a renderer.
///
/// The solver may only mutate it through the guard returned by
/// [`SharedBuffer::acquire`]. Dropping the guard releases the buffer and
/// advances [`SharedBuffer::generation`], so a renderer polling the buffer
/// can tell when a finished step is available. While a guard is alive the
/// borrow checker prevents any read from the render side.
#[derive(Debug)]
pub struct SharedBuffer {
    buffer: DeviceBuffer<Vec4>,
    render_handle: Option<u32>,
    generation: u64,
}

impl SharedBuffer {
    /// Create an empty shared buffer, optionally bound to a render-buffer id.
    pub fn new(label: &'static str, render_handle: Option<u32>) -> Self {
        Self { buffer: DeviceBuffer::new(label), render_handle, generation: 0 }
    }

    /// Replace the contents (e.g. after a fluid volume was added).
    pub fn upload(&mut self, positions: &[Vec4]) -> Result<()> {
        self.buffer.upload(positions)?;
        self.generation += 1;
        Ok(())
    }

    /// Acquire the buffer for device-side mutation.
    pub fn acquire(&mut self) -> SharedBufferGuard<'_> {
        tracing::trace!(buffer = self.buffer.label(), handle = ?self.render_handle, "acquire shared buffer");
        SharedBufferGuard { shared: self }
    }

    /// Render-side view of the positions.
    pub fn as_slice(&self) -> &[Vec4] {
        &self.buffer
    }

    /// Render-side byte view of the positions.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Number of released writes so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the render buffer backing this one, if any.
    pub fn render_handle(&self) -> Option<u32> {
        self.render_handle
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no positions.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Exclusive device-side access to a [`SharedBuffer`]. Releases on drop.
pub struct SharedBufferGuard<'a> {
    shared: &'a mut SharedBuffer,
}

impl Deref for SharedBufferGuard<'_> {
    type Target = [Vec4];

    fn deref(&self) -> &[Vec4] {
        &self.shared.buffer
    }
}

impl DerefMut for SharedBufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [Vec4] {
        &mut self.shared.buffer
    }
}

impl Drop for SharedBufferGuard<'_> {
    fn drop(&mut self) {
        self.shared.generation += 1;
        tracing::trace!(
            buffer = self.shared.buffer.label(),
            generation = self.shared.generation,
            "release shared buffer"
        );
    }
}
