//! Vector, quaternion and pose primitives.
//!
//! Everything here is plain `Copy` data with `f32` components.  Quaternions use
//! the (w, x, y, z) field order internally; the tracking and robot wire formats
//! use `[x, y, z, w]` arrays, see [`Quaternion::from_xyzw`] and
//! [`Quaternion::to_xyzw`].

use serde::{Deserialize, Serialize};

use crate::TeleopError;

/// Below this norm a quaternion is treated as degenerate.
const MIN_QUATERNION_NORM: f32 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Euclidean length.
    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Shorten the vector to at most `max` while keeping its direction.
    pub fn clamp_norm(self, max: f32) -> Self {
        let n = self.norm();
        if n > max && n > 0.0 {
            self.scale(max / n)
        } else {
            self
        }
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A rotation quaternion (w, x, y, z convention).
///
/// Most operations assume a unit quaternion; use [`Quaternion::normalized`]
/// on anything that came from outside the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build from an `[x, y, z, w]` array as used on the wire.
    pub fn from_xyzw(q: [f32; 4]) -> Self {
        Self::new(q[3], q[0], q[1], q[2])
    }

    /// Serialise to an `[x, y, z, w]` array.
    pub fn to_xyzw(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Rotation of `angle_rad` about the unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f32) -> Self {
        let half = angle_rad * 0.5;
        let s = half.sin();
        Self::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
    }

    /// Convert a proper rotation matrix (row-major) into a unit quaternion.
    ///
    /// Uses the largest-diagonal branch selection so the result stays
    /// well-conditioned for every rotation.
    pub fn from_rotation_matrix(m: [[f32; 3]; 3]) -> Self {
        let trace = m[0][0] + m[1][1] + m[2][2];
        let q = if trace > 0.0 {
            let s = 0.5 / (trace + 1.0).sqrt();
            Self::new(
                0.25 / s,
                (m[2][1] - m[1][2]) * s,
                (m[0][2] - m[2][0]) * s,
                (m[1][0] - m[0][1]) * s,
            )
        } else if m[0][0] > m[1][1] && m[0][0] > m[2][2] {
            let s = 2.0 * (1.0 + m[0][0] - m[1][1] - m[2][2]).sqrt();
            Self::new(
                (m[2][1] - m[1][2]) / s,
                0.25 * s,
                (m[0][1] + m[1][0]) / s,
                (m[0][2] + m[2][0]) / s,
            )
        } else if m[1][1] > m[2][2] {
            let s = 2.0 * (1.0 + m[1][1] - m[0][0] - m[2][2]).sqrt();
            Self::new(
                (m[0][2] - m[2][0]) / s,
                (m[0][1] + m[1][0]) / s,
                0.25 * s,
                (m[1][2] + m[2][1]) / s,
            )
        } else {
            let s = 2.0 * (1.0 + m[2][2] - m[0][0] - m[1][1]).sqrt();
            Self::new(
                (m[1][0] - m[0][1]) / s,
                (m[0][2] + m[2][0]) / s,
                (m[1][2] + m[2][1]) / s,
                0.25 * s,
            )
        };
        q.normalized().unwrap_or_else(Self::identity)
    }

    /// Hamilton product: `self` applied after `rhs`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.w, -self.x, -self.y, -self.z)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Unit-length copy, or `None` for a non-finite or zero-norm quaternion.
    pub fn normalized(self) -> Option<Self> {
        if !self.is_finite() {
            return None;
        }
        let n = self.norm();
        if n < MIN_QUATERNION_NORM {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Rotate a vector: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation from `self` (t = 0) towards `other`
    /// (t = 1) along the shortest arc.
    pub fn slerp(self, other: Self, t: f32) -> Self {
        let mut cos_theta = self.dot(other);
        let mut end = other;
        if cos_theta < 0.0 {
            end = other.neg();
            cos_theta = -cos_theta;
        }

        // Nearly parallel: sin(theta) is too small to divide by.
        if cos_theta > 0.9995 {
            let lerp = Self::new(
                self.w + t * (end.w - self.w),
                self.x + t * (end.x - self.x),
                self.y + t * (end.y - self.y),
                self.z + t * (end.z - self.z),
            );
            return lerp.normalized().unwrap_or(self);
        }

        let theta = cos_theta.clamp(-1.0, 1.0).acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        let q = Self::new(
            a * self.w + b * end.w,
            a * self.x + b * end.x,
            a * self.y + b * end.y,
            a * self.z + b * end.z,
        );
        q.normalized().unwrap_or(self)
    }

    /// Rotation angle between two unit quaternions, in radians.
    pub fn angle_to(self, other: Self) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        2.0 * d.acos()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

/// Position (metres) plus orientation (unit quaternion).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Zero position, identity rotation.
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Return a copy with a re-normalised orientation.
    ///
    /// # Errors
    ///
    /// [`TeleopError::TrackingInvalid`] when any component is non-finite or
    /// the orientation has zero norm.  Such samples are rejected, never
    /// propagated.
    pub fn validated(self) -> Result<Self, TeleopError> {
        if !self.position.is_finite() {
            return Err(TeleopError::TrackingInvalid(
                "non-finite position component".to_string(),
            ));
        }
        let orientation = self.orientation.normalized().ok_or_else(|| {
            TeleopError::TrackingInvalid("non-finite or zero-norm orientation".to_string())
        })?;
        Ok(Self::new(self.position, orientation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    #[test]
    fn vec3_clamp_norm_keeps_direction() {
        let v = Vec3::new(3.0, 4.0, 0.0).clamp_norm(1.0);
        assert!((v.norm() - 1.0).abs() < 1e-5);
        assert!((v.x - 0.6).abs() < 1e-5);
        assert!((v.y - 0.8).abs() < 1e-5);
    }

    #[test]
    fn vec3_clamp_norm_leaves_short_vectors() {
        let v = Vec3::new(0.1, 0.0, 0.0);
        assert_eq!(v.clamp_norm(1.0), v);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < 1e-5, "y should be ~1, got {}", r.y);
    }

    #[test]
    fn quaternion_conjugate_is_inverse() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.7);
        let prod = q.mul(q.conjugate());
        assert!((prod.w - 1.0).abs() < 1e-5);
        assert!(prod.x.abs() < 1e-5 && prod.y.abs() < 1e-5 && prod.z.abs() < 1e-5);
    }

    #[test]
    fn normalized_rejects_zero_and_nan() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
        assert!(Quaternion::new(f32::NAN, 0.0, 0.0, 1.0).normalized().is_none());
        let q = Quaternion::new(2.0, 0.0, 0.0, 0.0).normalized().unwrap();
        assert!((q.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn xyzw_round_trip_preserves_field_order() {
        let q = Quaternion::from_xyzw([0.1, 0.2, 0.3, 0.9]);
        assert_eq!(q.w, 0.9);
        assert_eq!(q.x, 0.1);
        assert_eq!(q.to_xyzw(), [0.1, 0.2, 0.3, 0.9]);
    }

    #[test]
    fn from_rotation_matrix_matches_axis_angle() {
        // 90 degrees about Z.
        let m = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let q = Quaternion::from_rotation_matrix(m);
        let expected = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        assert!(q.angle_to(expected) < 1e-4);
    }

    #[test]
    fn from_rotation_matrix_handles_zero_trace() {
        let m = [[0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let q = Quaternion::from_rotation_matrix(m);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5);
        assert!((r.y + 1.0).abs() < 1e-5);
        assert!(r.z.abs() < 1e-5);
    }

    #[test]
    fn slerp_endpoints_and_midpoint() {
        let a = Quaternion::identity();
        let b = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        assert!(a.slerp(b, 0.0).angle_to(a) < 1e-4);
        assert!(a.slerp(b, 1.0).angle_to(b) < 1e-4);
        let mid = a.slerp(b, 0.5);
        assert!((mid.angle_to(a) - FRAC_PI_2 / 2.0).abs() < 1e-4);
        assert!((mid.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn slerp_takes_shortest_arc() {
        let a = Quaternion::identity();
        let b = Quaternion::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), 0.2).neg();
        let mid = a.slerp(b, 0.5);
        assert!((mid.angle_to(a) - 0.1).abs() < 1e-4);
    }

    #[test]
    fn pose_validated_normalises_orientation() {
        let pose = Pose::new(Vec3::new(0.1, 0.2, 0.3), Quaternion::new(0.0, 0.0, 0.0, 3.0));
        let v = pose.validated().unwrap();
        assert!((v.orientation.norm() - 1.0).abs() < 1e-6);
        assert_eq!(v.position, pose.position);
    }

    #[test]
    fn pose_validated_rejects_non_finite_position() {
        let pose = Pose::new(Vec3::new(f32::INFINITY, 0.0, 0.0), Quaternion::identity());
        assert!(matches!(
            pose.validated(),
            Err(TeleopError::TrackingInvalid(_))
        ));
    }
}
