//! Math primitives: plain `[f64; 3]` vectors and unit quaternions.
//!
//! Vectors stay plain arrays so that structure-of-arrays buffers and wire
//! records can reuse them without conversions; operations are free functions.

/// A 3-vector. Kept as a plain array for SoA friendliness.
pub type Vec3 = [f64; 3];

pub const ZERO: Vec3 = [0.0; 3];

#[inline]
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn norm_sq(a: Vec3) -> f64 {
    dot(a, a)
}

#[inline]
pub fn norm(a: Vec3) -> f64 {
    norm_sq(a).sqrt()
}

/// A unit quaternion representing a 3D rotation.
///
/// Convention: q = [w; x, y, z] where w is the scalar part.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quat {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Create a quaternion from axis-angle representation.
    /// `axis` must be a unit vector, `angle` in radians.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let half = angle * 0.5;
        let (s, c) = half.sin_cos();
        Self::new(c, axis[0] * s, axis[1] * s, axis[2] * s)
    }

    /// Normalize to unit length; degenerate input falls back to identity.
    pub fn normalize(&self) -> Self {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n < 1e-12 {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product: self * other.
    pub fn mul(&self, other: &Quat) -> Quat {
        Quat::new(
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        )
    }

    pub fn conjugate(&self) -> Quat {
        Quat::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a body-frame vector into the world frame.
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        // q * (0, v) * q^-1, expanded.
        let t = scale(cross([self.x, self.y, self.z], v), 2.0);
        add(add(v, scale(t, self.w)), cross([self.x, self.y, self.z], t))
    }

    /// Rotate a world-frame vector into the body frame.
    pub fn rotate_inv(&self, v: Vec3) -> Vec3 {
        self.conjugate().rotate(v)
    }

    /// Time derivative of the quaternion for a body-frame angular
    /// velocity: dq/dt = 0.5 * q * (0, omega_body).
    pub fn derivative(&self, omega_body: Vec3) -> Quat {
        let o = Quat::new(0.0, omega_body[0], omega_body[1], omega_body[2]);
        let d = self.mul(&o);
        Quat::new(0.5 * d.w, 0.5 * d.x, 0.5 * d.y, 0.5 * d.z)
    }

    /// Component-wise addition of a scaled quaternion (used by the
    /// orientation drift step; the result is not normalized).
    pub fn add_scaled(&self, d: &Quat, s: f64) -> Quat {
        Quat::new(
            self.w + d.w * s,
            self.x + d.x * s,
            self.y + d.y * s,
            self.z + d.z * s,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    fn assert_vec_eq(a: Vec3, b: Vec3, tol: f64) {
        for d in 0..3 {
            assert!((a[d] - b[d]).abs() < tol, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_cross_product() {
        let c = cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        assert_vec_eq(c, [0.0, 0.0, 1.0], TOL);
    }

    #[test]
    fn test_quat_rotate_z_quarter_turn() {
        let q = Quat::from_axis_angle([0.0, 0.0, 1.0], std::f64::consts::FRAC_PI_2);
        let v = q.rotate([1.0, 0.0, 0.0]);
        assert_vec_eq(v, [0.0, 1.0, 0.0], 1e-10);
    }

    #[test]
    fn test_quat_rotate_roundtrip() {
        let q = Quat::from_axis_angle([0.6, 0.48, 0.64], 1.23);
        let v = [0.3, -1.7, 2.5];
        let back = q.rotate_inv(q.rotate(v));
        assert_vec_eq(back, v, 1e-10);
    }

    #[test]
    fn test_quat_normalize_degenerate() {
        let q = Quat::new(0.0, 0.0, 0.0, 0.0).normalize();
        assert_eq!(q, Quat::identity());
    }

    #[test]
    fn test_derivative_preserves_unit_length_first_order() {
        // dq/dt must be orthogonal to q for unit q.
        let q = Quat::from_axis_angle([1.0, 0.0, 0.0], 0.7);
        let d = q.derivative([0.0, 0.0, 2.0]);
        let ortho = q.w * d.w + q.x * d.x + q.y * d.y + q.z * d.z;
        assert!(ortho.abs() < TOL);
    }
}
