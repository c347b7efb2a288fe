//! Morton (Z-order) encoding of 3D cell coordinates.

/// Largest coordinate that fits a 32-bit 3D Morton code (10 bits per axis).
pub const MAX_MORTON_32_COORD: u32 = (1 << 10) - 1;

/// Spread the low 21 bits of `a` so that two zero bits separate each of them.
#[inline]
pub fn split_by_3(a: u32) -> u64 {
    let mut x = (a & 0x1f_ffff) as u64;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Interleave three coordinates into a Morton code: `x | y << 1 | z << 2`.
#[inline]
pub fn morton_3d_encode(x: u32, y: u32, z: u32) -> u64 {
    split_by_3(x) | split_by_3(y) << 1 | split_by_3(z) << 2
}
