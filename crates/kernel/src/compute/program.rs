//! Typed kernel objects.
//!
//! A kernel is built once from a name and a `#[repr(C)]` parameter block.
//! Building validates the block; every later dispatch reads it by reference,
//! so arguments are never rebound by position.

use std::fmt::Debug;

use bytemuck::Pod;
use rayon::prelude::*;

/// Parameter block of a compute kernel.
pub trait KernelParams: Pod + Debug + Send + Sync {
    /// Check the block. Each returned line is one entry of the build log;
    /// an empty log means the kernel builds.
    fn validate(&self) -> Vec<String>;
}

/// A built kernel bound to its parameters.
#[derive(Debug, Clone)]
pub struct Kernel<P> {
    name: &'static str,
    params: P,
    local_size: usize,
}

impl<P: KernelParams> Kernel<P> {
    pub(crate) fn new(name: &'static str, params: P, local_size: usize) -> Self {
        Self { name, params, local_size }
    }

    /// Kernel name, as used by dispatch profiles.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bound parameters.
    pub fn params(&self) -> &P {
        &self.params
    }

    /// Work-group size used for dispatches.
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Run `f` once per element of `out`, in parallel.
    pub fn dispatch<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&P, usize, &mut T) + Sync + Send,
    {
        let params = &self.params;
        out.par_iter_mut()
            .enumerate()
            .with_min_len(self.local_size)
            .for_each(|(i, o)| f(params, i, o));
    }

    /// Run `f` once per index over two index-aligned outputs.
    pub fn dispatch_zip<A, B, F>(&self, a: &mut [A], b: &mut [B], f: F)
    where
        A: Send,
        B: Send,
        F: Fn(&P, usize, &mut A, &mut B) + Sync + Send,
    {
        debug_assert_eq!(a.len(), b.len(), "{}: output lengths differ", self.name);
        let params = &self.params;
        a.par_iter_mut()
            .zip(b.par_iter_mut())
            .enumerate()
            .with_min_len(self.local_size)
            .for_each(|(i, (x, y))| f(params, i, x, y));
    }

    /// Run `f` once per index over three index-aligned outputs.
    pub fn dispatch_zip3<A, B, C, F>(&self, a: &mut [A], b: &mut [B], c: &mut [C], f: F)
    where
        A: Send,
        B: Send,
        C: Send,
        F: Fn(&P, usize, &mut A, &mut B, &mut C) + Sync + Send,
    {
        debug_assert!(a.len() == b.len() && b.len() == c.len(), "{}: output lengths differ", self.name);
        let params = &self.params;
        a.par_iter_mut()
            .zip(b.par_iter_mut())
            .zip(c.par_iter_mut())
            .enumerate()
            .with_min_len(self.local_size)
            .for_each(|(i, ((x, y), z))| f(params, i, x, y, z));
    }

    /// Run `f` once per index, handing it a fixed-size chunk of `a` and one
    /// element of `b` (e.g. a neighbour list row and its length).
    pub fn dispatch_chunks<A, B, F>(&self, a: &mut [A], chunk: usize, b: &mut [B], f: F)
    where
        A: Send,
        B: Send,
        F: Fn(&P, usize, &mut [A], &mut B) + Sync + Send,
    {
        debug_assert!(chunk > 0);
        debug_assert_eq!(a.len(), chunk * b.len(), "{}: chunked output mismatch", self.name);
        let params = &self.params;
        a.par_chunks_mut(chunk)
            .zip(b.par_iter_mut())
            .enumerate()
            .with_min_len(self.local_size)
            .for_each(|(i, (row, y))| f(params, i, row, y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
    struct Scale {
        factor: f32,
    }

    impl KernelParams for Scale {
        fn validate(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn dispatch_visits_every_index() {
        let kernel = Kernel::new("scale", Scale { factor: 2.0 }, 4);
        let mut out = vec![0.0f32; 1000];
        kernel.dispatch(&mut out, |p, i, o| *o = p.factor * i as f32);
        assert!(out.iter().enumerate().all(|(i, &v)| v == 2.0 * i as f32));
    }

    #[test]
    fn dispatch_chunks_pairs_rows_with_lengths() {
        let kernel = Kernel::new("rows", Scale { factor: 1.0 }, 1);
        let mut rows = vec![0i32; 12];
        let mut lengths = vec![0i32; 4];
        kernel.dispatch_chunks(&mut rows, 3, &mut lengths, |_, i, row, len| {
            row[0] = i as i32;
            *len = 1;
        });
        assert_eq!(rows[9], 3);
        assert_eq!(lengths, vec![1; 4]);
    }
}
