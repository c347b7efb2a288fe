//! Key/value sorting and permutation stages.
//!
//! The radix sort is a stable least-significant-digit sort over 8-bit
//! digits. Digit histograms are built in parallel over fixed-size chunks;
//! passes whose digit is zero for every key are skipped, so small hashes
//! cost fewer passes.

use bytemuck::Pod;
use rayon::prelude::*;

use crate::compute::{Device, Kernel, KernelParams};
use crate::error::{Result, SimError};

/// Bits per radix digit.
pub const RADIX_BITS: u32 = 8;
const BUCKETS: usize = 1 << RADIX_BITS;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SortParams {
    radix_bits: u32,
    chunk_size: u32,
}

impl KernelParams for SortParams {
    fn validate(&self) -> Vec<String> {
        let mut log = Vec::new();
        if self.radix_bits == 0 || 32 % self.radix_bits != 0 {
            log.push(format!("radix_bits must divide 32, got {}", self.radix_bits));
        }
        if self.chunk_size == 0 {
            log.push("chunk_size must be positive".to_string());
        }
        log
    }
}

/// Sorting and gather/scatter stages of the neighbourhood pipeline.
#[derive(Debug, Clone)]
pub struct SortPipeline {
    histogram: Kernel<SortParams>,
    permute: Kernel<SortParams>,
    keys_scratch: Vec<u32>,
    values_scratch: Vec<u32>,
}

impl SortPipeline {
    /// Build the sort kernels.
    pub fn new(device: &Device) -> Result<Self> {
        let chunk_size = device.profile().local_size("radix_histogram").max(1024) as u32;
        let params = SortParams { radix_bits: RADIX_BITS, chunk_size };
        Ok(Self {
            histogram: device.build_kernel("radix_histogram", params)?,
            permute: device.build_kernel("permute", params)?,
            keys_scratch: Vec::new(),
            values_scratch: Vec::new(),
        })
    }

    /// Reserve scratch space for sorting `count` pairs.
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        for (label, scratch) in [("sort_keys_scratch", &mut self.keys_scratch), ("sort_values_scratch", &mut self.values_scratch)] {
            let additional = count.saturating_sub(scratch.len());
            scratch
                .try_reserve_exact(additional)
                .map_err(|source| SimError::Allocation { label, len: count, source })?;
        }
        Ok(())
    }

    /// Sort `keys` ascending and apply the same permutation to `values`.
    ///
    /// The sort is stable: equal keys keep their relative order. Zero or one
    /// pair is left untouched.
    pub fn radix_sort(&mut self, keys: &mut [u32], values: &mut [u32]) {
        debug_assert_eq!(keys.len(), values.len());
        let n = keys.len();
        if n < 2 {
            return;
        }
        self.keys_scratch.resize(n, 0);
        self.values_scratch.resize(n, 0);

        let params = *self.histogram.params();
        let chunk = params.chunk_size as usize;
        let max_key = keys.par_iter().copied().max().unwrap_or(0);

        let mut src_is_input = true;
        let mut shift = 0;
        while shift < 32 && (shift == 0 || (max_key >> shift) != 0) {
            let (src_k, src_v, dst_k, dst_v) = if src_is_input {
                (&*keys, &*values, &mut self.keys_scratch[..n], &mut self.values_scratch[..n])
            } else {
                (&self.keys_scratch[..n], &self.values_scratch[..n], &mut keys[..], &mut values[..])
            };
            scatter_pass(src_k, src_v, dst_k, dst_v, shift, chunk);
            src_is_input = !src_is_input;
            shift += params.radix_bits;
        }

        if !src_is_input {
            keys.copy_from_slice(&self.keys_scratch[..n]);
            values.copy_from_slice(&self.values_scratch[..n]);
        }
    }

    /// Reorder `source` into `dest` with `dest[i] = source[permutation[i]]`.
    pub fn gather<T: Pod + Send + Sync>(&self, source: &[T], permutation: &[u32], dest: &mut [T]) {
        debug_assert_eq!(permutation.len(), dest.len());
        self.permute.dispatch(dest, |_, i, d| *d = source[permutation[i] as usize]);
    }

    /// Inverse of [`SortPipeline::gather`]: `dest[permutation[i]] = source[i]`.
    pub fn scatter<T: Pod>(&self, source: &[T], permutation: &[u32], dest: &mut [T]) {
        debug_assert_eq!(permutation.len(), source.len());
        for (value, &slot) in source.iter().zip(permutation) {
            dest[slot as usize] = *value;
        }
    }
}

/// One stable counting pass over the digit at `shift`.
fn scatter_pass(
    src_keys: &[u32],
    src_values: &[u32],
    dst_keys: &mut [u32],
    dst_values: &mut [u32],
    shift: u32,
    chunk: usize,
) {
    let digit = |k: u32| ((k >> shift) as usize) & (BUCKETS - 1);

    let histograms: Vec<[u32; BUCKETS]> = src_keys
        .par_chunks(chunk)
        .map(|keys| {
            let mut h = [0u32; BUCKETS];
            for &k in keys {
                h[digit(k)] += 1;
            }
            h
        })
        .collect();

    // Exclusive prefix over (digit, chunk), digit-major.
    let mut offsets = vec![[0u32; BUCKETS]; histograms.len()];
    let mut running = 0u32;
    for d in 0..BUCKETS {
        for (c, h) in histograms.iter().enumerate() {
            offsets[c][d] = running;
            running += h[d];
        }
    }

    for (c, (keys, values)) in src_keys.chunks(chunk).zip(src_values.chunks(chunk)).enumerate() {
        let slots = &mut offsets[c];
        for (&k, &v) in keys.iter().zip(values) {
            let d = digit(k);
            let slot = slots[d] as usize;
            dst_keys[slot] = k;
            dst_values[slot] = v;
            slots[d] += 1;
        }
    }
}
