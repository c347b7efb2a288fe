//! Surface sampling of the rigid-body shapes used as fluid boundaries.
//!
//! Every sampler returns body-local points on a regular lattice of the
//! requested spacing. Lattice coordinates run from `-extent/2` to
//! `+extent/2` inclusive.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Shape of a boundary body, in body-local coordinates centred at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Horizontal floor patch in the x/z plane.
    Plane {
        /// Extent along x.
        width: f32,
        /// Extent along z.
        depth: f32,
    },
    /// Vertical patch in the x/y plane at z = 0.
    Wall {
        /// Extent along x.
        width: f32,
        /// Extent along y.
        height: f32,
    },
    /// Closed cube surface.
    Cube {
        /// Edge length.
        side: f32,
    },
    /// Open-top rectangular container.
    Tank {
        /// Extent along x.
        width: f32,
        /// Extent along y.
        height: f32,
        /// Extent along z.
        depth: f32,
    },
}

impl Shape {
    /// Sample the surface with the given particle spacing.
    pub fn sample(&self, spacing: f32) -> Vec<Vec3> {
        match *self {
            Shape::Plane { width, depth } => plane(width, depth, spacing),
            Shape::Wall { width, height } => {
                let mut out = Vec::new();
                for x in lattice(width, spacing) {
                    for y in lattice(height, spacing) {
                        out.push(Vec3::new(x, y, 0.0));
                    }
                }
                out
            }
            Shape::Cube { side } => cube(side, spacing),
            Shape::Tank { width, height, depth } => tank(width, height, depth, spacing),
        }
    }
}

/// Inclusive lattice over `[-extent/2, extent/2]`.
fn lattice(extent: f32, spacing: f32) -> impl Iterator<Item = f32> {
    let steps = if spacing > 0.0 && extent > 0.0 {
        // Tolerance keeps the far edge when extent is a multiple of spacing.
        (extent / spacing + 1e-4).floor() as usize
    } else {
        0
    };
    let start = -0.5 * extent;
    (0..=steps).map(move |i| start + i as f32 * spacing)
}

/// Lattice starting one spacing above the bottom edge.
fn lattice_above_base(extent: f32, spacing: f32) -> impl Iterator<Item = f32> {
    lattice(extent, spacing).skip(1)
}

fn plane(width: f32, depth: f32, spacing: f32) -> Vec<Vec3> {
    let mut out = Vec::new();
    for x in lattice(width, spacing) {
        for z in lattice(depth, spacing) {
            out.push(Vec3::new(x, 0.0, z));
        }
    }
    out
}

/// Four vertical walls of a `width x depth` rectangle, from one spacing
/// above `-height/2` up to `height/2`.
fn walls(width: f32, height: f32, depth: f32, spacing: f32, out: &mut Vec<Vec3>) {
    for y in lattice_above_base(height, spacing) {
        for x in lattice(width, spacing) {
            out.push(Vec3::new(x, y, -0.5 * depth));
            out.push(Vec3::new(x, y, 0.5 * depth));
        }
        for z in lattice(depth, spacing) {
            out.push(Vec3::new(0.5 * width, y, z));
            out.push(Vec3::new(-0.5 * width, y, z));
        }
    }
}

fn tank(width: f32, height: f32, depth: f32, spacing: f32) -> Vec<Vec3> {
    let mut out = Vec::new();
    for x in lattice(width, spacing) {
        for z in lattice(depth, spacing) {
            out.push(Vec3::new(x, -0.5 * height, z));
        }
    }
    walls(width, height, depth, spacing, &mut out);
    out
}

fn cube(side: f32, spacing: f32) -> Vec<Vec3> {
    // Faces are inset by half a spacing on each side.
    let extent = side - spacing;
    let mut out = Vec::new();
    for x in lattice(extent, spacing) {
        for z in lattice(extent, spacing) {
            out.push(Vec3::new(x, -0.5 * extent, z));
            out.push(Vec3::new(x, 0.5 * extent, z));
        }
    }
    walls(extent, extent, extent, spacing, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_is_inclusive() {
        let xs: Vec<f32> = lattice(1.0, 0.25).collect();
        assert_eq!(xs.len(), 5);
        assert!((xs[0] + 0.5).abs() < 1e-6);
        assert!((xs[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn plane_counts() {
        let pts = Shape::Plane { width: 1.0, depth: 0.5 }.sample(0.25);
        assert_eq!(pts.len(), 5 * 3);
        assert!(pts.iter().all(|p| p.y == 0.0));
    }

    #[test]
    fn wall_lies_in_xy_plane() {
        let pts = Shape::Wall { width: 0.5, height: 0.5 }.sample(0.25);
        assert_eq!(pts.len(), 9);
        assert!(pts.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn tank_is_open_at_the_top() {
        let (w, h, d, s) = (1.0, 0.5, 1.0, 0.25);
        let pts = Shape::Tank { width: w, height: h, depth: d }.sample(s);
        let base = pts.iter().filter(|p| (p.y + 0.5 * h).abs() < 1e-6).count();
        assert_eq!(base, 25);
        // No sample spans the interior of the top face.
        assert!(!pts.iter().any(|p| (p.y - 0.5 * h).abs() < 1e-6 && p.x.abs() < 0.4 && p.z.abs() < 0.4));
        // 2 wall rows above the base, 4 walls of 5 samples each.
        assert_eq!(pts.len(), 25 + 2 * 4 * 5);
    }

    #[test]
    fn cube_samples_stay_inside_the_side() {
        let pts = Shape::Cube { side: 0.5 }.sample(0.1);
        assert!(!pts.is_empty());
        assert!(pts.iter().all(|p| p.abs().max_element() <= 0.2 + 1e-5));
    }

    #[test]
    fn zero_spacing_yields_single_point() {
        let pts = Shape::Plane { width: 1.0, depth: 1.0 }.sample(0.0);
        assert_eq!(pts.len(), 1);
    }
}
