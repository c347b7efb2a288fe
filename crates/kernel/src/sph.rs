//! SPH smoothing kernels (Müller et al. 2003) and the surface tension model
//! of Akinci et al. 2013.
//!
//! Kernel shapes are evaluated without their normalization constants; the
//! constants depend only on the support radius and are precomputed once in
//! [`SmoothingKernelConstants`]. Every shape is zero outside the support
//! radius only if the caller checks `r <= h` first, as the neighbour lists do.

use std::f32::consts::PI;

use glam::Vec3;

/// Normalization constants of every kernel family for one support radius.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SmoothingKernelConstants {
    /// Support radius `h` the constants were computed for.
    pub support_radius: f32,
    /// Poly6 value: `315 / (64 pi h^9)`.
    pub poly6_eval: f32,
    /// Poly6 gradient: `-945 / (32 pi h^9)`.
    pub poly6_grad: f32,
    /// Poly6 laplacian: `-945 / (32 pi h^9)`.
    pub poly6_lapl: f32,
    /// Spiky value: `15 / (pi h^6)`.
    pub spiky_eval: f32,
    /// Spiky gradient: `-45 / (pi h^6)`.
    pub spiky_grad: f32,
    /// Spiky laplacian: `-90 / (pi h^6)`.
    pub spiky_lapl: f32,
    /// Viscosity value: `15 / (2 pi h^3)`.
    pub viscosity_eval: f32,
    /// Viscosity gradient: `15 / (2 pi h^3)`.
    pub viscosity_grad: f32,
    /// Viscosity laplacian: `45 / (pi h^6)`.
    pub viscosity_lapl: f32,
    /// Surface tension spline: `32 / (pi h^9)`.
    pub st_spline: f32,
    /// Surface tension spline offset: `h^6 / 64`.
    pub st_term: f32,
}

impl SmoothingKernelConstants {
    /// Compute the constants for support radius `h`.
    pub fn new(h: f32) -> Self {
        let h3 = h * h * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;
        Self {
            support_radius: h,
            poly6_eval: 315.0 / (64.0 * PI * h9),
            poly6_grad: -945.0 / (32.0 * PI * h9),
            poly6_lapl: -945.0 / (32.0 * PI * h9),
            spiky_eval: 15.0 / (PI * h6),
            spiky_grad: -45.0 / (PI * h6),
            spiky_lapl: -90.0 / (PI * h6),
            viscosity_eval: 15.0 / (2.0 * PI * h3),
            viscosity_grad: 15.0 / (2.0 * PI * h3),
            viscosity_lapl: 45.0 / (PI * h6),
            st_spline: 32.0 / (PI * h9),
            st_term: h6 / 64.0,
        }
    }

    /// Normalized poly6 value at distance `r`.
    pub fn poly6(&self, r: f32) -> f32 {
        self.poly6_eval * w_poly6(r, self.support_radius)
    }

    /// Normalized poly6 gradient for displacement `r` of length `r_norm`.
    pub fn poly6_gradient(&self, r: Vec3, r_norm: f32) -> Vec3 {
        self.poly6_grad * grad_w_poly6(r, r_norm, self.support_radius)
    }

    /// Normalized spiky gradient. Zero for coincident particles.
    pub fn spiky_gradient(&self, r: Vec3, r_norm: f32) -> Vec3 {
        self.spiky_grad * grad_w_spiky(r, r_norm, self.support_radius)
    }

    /// Normalized viscosity laplacian at distance `r`.
    pub fn viscosity_laplacian(&self, r: f32) -> f32 {
        self.viscosity_lapl * lapl_w_visc(r, self.support_radius)
    }
}

// ---------------------------------------------------------------------------
// Kernel shapes
// ---------------------------------------------------------------------------

/// Poly6 shape: `(h^2 - r^2)^3`.
pub fn w_poly6(r: f32, h: f32) -> f32 {
    let t = h * h - r * r;
    t * t * t
}

/// Poly6 gradient shape: `r (h^2 - |r|^2)^2`.
pub fn grad_w_poly6(r: Vec3, r_norm: f32, h: f32) -> Vec3 {
    let t = h * h - r_norm * r_norm;
    r * (t * t)
}

/// Spiky shape: `(h - r)^3`.
pub fn w_spiky(r: f32, h: f32) -> f32 {
    let t = h - r;
    t * t * t
}

/// Spiky gradient shape: `r / |r| (h - |r|)^2`.
pub fn grad_w_spiky(r: Vec3, r_norm: f32, h: f32) -> Vec3 {
    if r_norm <= f32::EPSILON {
        return Vec3::ZERO;
    }
    let t = h - r_norm;
    r * (t * t / r_norm)
}

/// Viscosity laplacian shape: `h - r`.
pub fn lapl_w_visc(r: f32, h: f32) -> f32 {
    h - r
}

// ---------------------------------------------------------------------------
// Surface tension (Akinci et al. 2013)
// ---------------------------------------------------------------------------

/// Symmetric correction factor `2 rho0 / (rho_i + rho_j)`.
///
/// Amplifies the force on particles with a deficient neighbourhood.
pub fn st_correction_factor(rest_density: f32, di: f32, dj: f32) -> f32 {
    2.0 * rest_density / (di + dj)
}

/// Cohesion spline without its `32 / (pi h^9)` constant.
///
/// ```text
/// C(r) = 2 (h - r)^3 r^3 - h^6 / 64    for r <= h/2
/// C(r) = (h - r)^3 r^3                 for h/2 < r <= h
/// C(r) = 0                             otherwise
/// ```
pub fn st_spline(r: f32, h: f32, st_term: f32) -> f32 {
    if r <= 0.5 * h {
        let t = h - r;
        2.0 * (t * t * t) * (r * r * r) - st_term
    } else if r <= h {
        let t = h - r;
        (t * t * t) * (r * r * r)
    } else {
        0.0
    }
}

/// Curvature term `(n_i - n_j) K_ij`, to be scaled by `-gamma`.
pub fn st_curvature(rest_density: f32, di: f32, dj: f32, ni: Vec3, nj: Vec3) -> Vec3 {
    (ni - nj) * st_correction_factor(rest_density, di, dj)
}

/// Cohesion direction and magnitude `r_hat C(|r|) K_ij`, to be scaled by
/// `-gamma m_j` and the spline constant.
pub fn st_cohesion(r: Vec3, r_norm: f32, h: f32, st_term: f32, rest_density: f32, di: f32, dj: f32) -> Vec3 {
    if r_norm <= f32::EPSILON {
        return Vec3::ZERO;
    }
    (r / r_norm) * st_spline(r_norm, h, st_term) * st_correction_factor(rest_density, di, dj)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Riemann sum of the normalized poly6 over a fine lattice covering the
    /// support sphere.
    fn integrate_poly6(h: f32, steps: i32) -> f32 {
        let k = SmoothingKernelConstants::new(h);
        let dx = h / steps as f32;
        let mut sum = 0.0f64;
        for i in -steps..=steps {
            for j in -steps..=steps {
                for l in -steps..=steps {
                    let r = Vec3::new(i as f32, j as f32, l as f32) * dx;
                    let r_norm = r.length();
                    if r_norm <= h {
                        sum += k.poly6(r_norm) as f64;
                    }
                }
            }
        }
        (sum * (dx as f64).powi(3)) as f32
    }

    #[test]
    fn poly6_integrates_to_one() {
        let integral = integrate_poly6(0.032, 40);
        assert!((integral - 1.0).abs() < 0.01, "poly6 integral {integral}");
    }

    #[test]
    fn constants_match_closed_forms() {
        let h = 0.5f32;
        let k = SmoothingKernelConstants::new(h);
        assert!((k.poly6_eval - 315.0 / (64.0 * PI * h.powi(9))).abs() / k.poly6_eval < 1e-5);
        assert!((k.spiky_grad + 45.0 / (PI * h.powi(6))).abs() / k.spiky_grad.abs() < 1e-5);
        assert!((k.viscosity_lapl - 45.0 / (PI * h.powi(6))).abs() / k.viscosity_lapl < 1e-5);
        assert_eq!(k.poly6_grad, k.poly6_lapl);
        assert_eq!(k.viscosity_eval, k.viscosity_grad);
        assert!((k.st_term - h.powi(6) / 64.0).abs() < 1e-9);
    }

    #[test]
    fn gradients_point_towards_neighbour() {
        let k = SmoothingKernelConstants::new(1.0);
        // r = x_i - x_j with i to the right of j: the gradient points back
        // towards j (the kernel decreases with distance).
        let r = Vec3::new(0.5, 0.0, 0.0);
        assert!(k.spiky_gradient(r, 0.5).x < 0.0);
        assert!(k.poly6_gradient(r, 0.5).x < 0.0);
        assert_eq!(k.spiky_gradient(Vec3::ZERO, 0.0), Vec3::ZERO);
    }

    #[test]
    fn spline_is_repulsive_near_and_attractive_far() {
        let h = 1.0;
        let term = h * h * h * h * h * h / 64.0;
        assert!(st_spline(0.05, h, term) < 0.0);
        assert!(st_spline(0.75, h, term) > 0.0);
        assert_eq!(st_spline(1.5, h, term), 0.0);
        // Continuous at h/2.
        let left = st_spline(0.5, h, term);
        let right = st_spline(0.5 + 1e-4, h, term);
        assert!((left - right).abs() < 1e-3);
    }

    #[test]
    fn correction_factor_is_one_at_rest() {
        assert!((st_correction_factor(1000.0, 1000.0, 1000.0) - 1.0).abs() < 1e-6);
        let c = st_curvature(1000.0, 1000.0, 1000.0, Vec3::X, Vec3::ZERO);
        assert_eq!(c, Vec3::X);
    }
}
