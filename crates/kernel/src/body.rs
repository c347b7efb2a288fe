//! Collaborators feeding particles into the engine: rigid bodies that act as
//! boundaries, and fluid volumes that seed the initial fluid.

use std::sync::{Mutex, PoisonError};

use glam::{Affine3A, Quat, Vec3, Vec4};

use crate::sampling::Shape;

// ---------------------------------------------------------------------------
// Rigid bodies
// ---------------------------------------------------------------------------

/// A rigid body coupled with the fluid.
///
/// The engine only reads the pose and velocities, and pushes the net fluid
/// force and torque back once per step. Dynamics integration belongs to the
/// implementor.
pub trait RigidBody: Send + Sync {
    /// Centre of mass in world space.
    fn position(&self) -> Vec3;

    /// Orientation in world space.
    fn rotation(&self) -> Quat;

    /// Linear velocity of the centre of mass.
    fn linear_vel(&self) -> Vec3;

    /// Angular velocity (rad/s) about the centre of mass.
    fn angular_vel(&self) -> Vec3;

    /// Mass. Bodies with zero or negative mass are immovable and never
    /// receive fluid forces.
    fn mass(&self) -> f32;

    /// Body-local surface samples at the given spacing.
    fn surface_sampling(&self, particle_spacing: f32) -> Vec<Vec3>;

    /// Replace the accumulated external force and torque.
    fn apply_force_n_torque(&self, force: Vec3, torque: Vec3);

    /// World transform of the body.
    fn transform(&self) -> Affine3A {
        Affine3A::from_rotation_translation(self.rotation(), self.position())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct KinematicState {
    position: Vec3,
    rotation: Quat,
    linear_vel: Vec3,
    angular_vel: Vec3,
    force: Vec3,
    torque: Vec3,
}

/// Rigid body whose motion is prescribed by the caller.
///
/// Fluid forces are recorded, not integrated.
#[derive(Debug)]
pub struct KinematicBody {
    shape: Shape,
    mass: f32,
    state: Mutex<KinematicState>,
}

impl KinematicBody {
    /// Create a body at `position` with identity rotation and no velocity.
    pub fn new(shape: Shape, mass: f32, position: Vec3) -> Self {
        let state = KinematicState { position, rotation: Quat::IDENTITY, ..Default::default() };
        Self { shape, mass, state: Mutex::new(state) }
    }

    /// A body that never moves and never receives forces.
    pub fn fixed(shape: Shape, position: Vec3) -> Self {
        Self::new(shape, 0.0, position)
    }

    /// Shape of the body.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Move the body.
    pub fn set_pose(&self, position: Vec3, rotation: Quat) {
        let mut state = self.lock();
        state.position = position;
        state.rotation = rotation;
    }

    /// Set the prescribed velocities.
    pub fn set_velocity(&self, linear: Vec3, angular: Vec3) {
        let mut state = self.lock();
        state.linear_vel = linear;
        state.angular_vel = angular;
    }

    /// Last force and torque pushed by the fluid.
    pub fn last_force_n_torque(&self) -> (Vec3, Vec3) {
        let state = self.lock();
        (state.force, state.torque)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KinematicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RigidBody for KinematicBody {
    fn position(&self) -> Vec3 {
        self.lock().position
    }

    fn rotation(&self) -> Quat {
        self.lock().rotation
    }

    fn linear_vel(&self) -> Vec3 {
        self.lock().linear_vel
    }

    fn angular_vel(&self) -> Vec3 {
        self.lock().angular_vel
    }

    fn mass(&self) -> f32 {
        self.mass
    }

    fn surface_sampling(&self, particle_spacing: f32) -> Vec<Vec3> {
        self.shape.sample(particle_spacing)
    }

    fn apply_force_n_torque(&self, force: Vec3, torque: Vec3) {
        let mut state = self.lock();
        state.force = force;
        state.torque = torque;
    }
}

// ---------------------------------------------------------------------------
// Fluid volumes
// ---------------------------------------------------------------------------

/// A region that seeds fluid particles.
pub trait FluidVolume: Send + Sync {
    /// Initial particle positions (w = 1) for particles of the given radius.
    fn particles(&self, particle_radius: f32) -> Vec<Vec4>;
}

/// Axis-aligned box filled on a regular lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxVolume {
    /// Edge lengths.
    pub size: Vec3,
    /// Centre in world space.
    pub center: Vec3,
}

impl BoxVolume {
    /// Box of edge lengths `size` centred at `center`.
    pub fn new(size: Vec3, center: Vec3) -> Self {
        Self { size, center }
    }
}

impl FluidVolume for BoxVolume {
    /// Lattice with about one particle diameter between samples.
    ///
    /// ```text
    /// n     = ceil(size / 2r)      per axis
    /// delta = size / n
    /// p     = i * delta + center - size / 2,   i in 0..n
    /// ```
    fn particles(&self, particle_radius: f32) -> Vec<Vec4> {
        if particle_radius <= 0.0 {
            return Vec::new();
        }
        let n = (self.size / (2.0 * particle_radius)).ceil().max(Vec3::ZERO).as_uvec3();
        let delta = self.size / n.max(glam::UVec3::ONE).as_vec3();
        let origin = self.center - 0.5 * self.size;

        let mut out = Vec::with_capacity((n.x * n.y * n.z) as usize);
        for j in 0..n.y {
            for i in 0..n.x {
                for k in 0..n.z {
                    let p = origin + glam::UVec3::new(i, j, k).as_vec3() * delta;
                    out.push(p.extend(1.0));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_volume_lattice() {
        // Dyadic sizes keep n exact: n = (10, 5, 10).
        let r = 0.0078125;
        let volume = BoxVolume::new(Vec3::new(20.0 * r, 10.0 * r, 20.0 * r), Vec3::ZERO);
        let pts = volume.particles(r);
        assert_eq!(pts.len(), 500);
        assert!(pts.iter().all(|p| p.w == 1.0));
        assert!((pts[0].truncate() - Vec3::new(-10.0 * r, -5.0 * r, -10.0 * r)).length() < 1e-6);
        // z varies fastest, then x, then y.
        assert!(pts[1].z > pts[0].z && pts[1].x == pts[0].x);
        assert!(pts[10].x > pts[0].x && pts[10].y == pts[0].y);
        assert!(pts[100].y > pts[0].y);
    }

    #[test]
    fn degenerate_radius_yields_nothing() {
        let volume = BoxVolume::new(Vec3::ONE, Vec3::ZERO);
        assert!(volume.particles(0.0).is_empty());
    }

    #[test]
    fn kinematic_body_records_forces() {
        let body = KinematicBody::new(Shape::Cube { side: 0.1 }, 1.0, Vec3::Y);
        body.apply_force_n_torque(Vec3::X, Vec3::Z);
        assert_eq!(body.last_force_n_torque(), (Vec3::X, Vec3::Z));

        body.set_pose(Vec3::ZERO, Quat::from_rotation_y(1.0));
        let t = body.transform();
        assert!(t.translation.length() < 1e-6);
        assert!(!body.surface_sampling(0.02).is_empty());
    }
}
