//! Device-to-robot frame transform.
//!
//! The tracking device reports poses in a y-up frame (x = right, y = up,
//! z = back).  The robot expects a z-up frame (x = front, y = left, z = up).
//! [`FrameTransform`] holds the fixed rotation `R` between the two plus the
//! uniform motion scale applied to positions:
//!
//! ```text
//! p_robot = scale · R · p_device
//! q_robot = Q · q_device · Q⁻¹          (Q = R as a quaternion)
//! ```
//!
//! # Example
//!
//! ```rust
//! use teleop_perception::transform::{AxisRemap, FrameTransform};
//! use teleop_types::{Pose, Quaternion, Vec3};
//!
//! let tf = FrameTransform::new(AxisRemap::Xr, 1.5).unwrap();
//!
//! // Pushing the hand 5 cm away from the body (device -z) moves the
//! // end-effector 7.5 cm forward (robot +x).
//! let p = tf.to_robot(&Pose::new(Vec3::new(0.0, 0.0, -0.05), Quaternion::identity()));
//! assert!((p.position.x - 0.075).abs() < 1e-5);
//! ```

use serde::{Deserialize, Serialize};
use teleop_types::{Pose, Quaternion, TeleopError, Vec3};

/// Largest accepted motion scale.
pub const MAX_MOTION_SCALE: f32 = 5.0;

/// Row-major rotation taking device axes to robot axes.
///
/// robot.x = -device.z, robot.y = -device.x, robot.z = device.y
pub const XR_TO_ROBOT: [[f32; 3]; 3] = [[0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

const IDENTITY: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Which fixed axis remap to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisRemap {
    /// Headset y-up frame to robot z-up frame.
    #[default]
    Xr,
    /// Device already reports robot-frame axes (simulators, bench rigs).
    Identity,
}

impl AxisRemap {
    pub fn matrix(self) -> [[f32; 3]; 3] {
        match self {
            AxisRemap::Xr => XR_TO_ROBOT,
            AxisRemap::Identity => IDENTITY,
        }
    }
}

/// Fixed rotation plus uniform scale between device and robot frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    rotation: [[f32; 3]; 3],
    rotation_q: Quaternion,
    scale: f32,
}

impl FrameTransform {
    /// Build the transform for one of the known remaps.
    ///
    /// # Errors
    ///
    /// [`TeleopError::Config`] when `scale` is outside `(0, MAX_MOTION_SCALE]`.
    pub fn new(remap: AxisRemap, scale: f32) -> Result<Self, TeleopError> {
        Self::from_matrix(remap.matrix(), scale)
    }

    /// Build from an arbitrary proper rotation matrix (row-major).
    pub fn from_matrix(rotation: [[f32; 3]; 3], scale: f32) -> Result<Self, TeleopError> {
        if !scale.is_finite() || scale <= 0.0 || scale > MAX_MOTION_SCALE {
            return Err(TeleopError::Config(format!(
                "motion scale {scale} outside (0, {MAX_MOTION_SCALE}]"
            )));
        }
        Ok(Self {
            rotation,
            rotation_q: Quaternion::from_rotation_matrix(rotation),
            scale,
        })
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Apply the axis remap to a free vector (no scaling).
    pub fn rotate_vector(&self, v: Vec3) -> Vec3 {
        let r = &self.rotation;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }

    fn rotate_vector_inverse(&self, v: Vec3) -> Vec3 {
        let r = &self.rotation;
        Vec3::new(
            r[0][0] * v.x + r[1][0] * v.y + r[2][0] * v.z,
            r[0][1] * v.x + r[1][1] * v.y + r[2][1] * v.z,
            r[0][2] * v.x + r[1][2] * v.y + r[2][2] * v.z,
        )
    }

    /// Map a device-frame pose into the robot frame.
    ///
    /// The orientation is re-normalised; a degenerate input orientation comes
    /// back as the identity, so callers should validate first.
    pub fn to_robot(&self, pose: &Pose) -> Pose {
        let position = self.rotate_vector(pose.position).scale(self.scale);
        let q = self.rotation_q;
        let orientation = q
            .mul(pose.orientation)
            .mul(q.conjugate())
            .normalized()
            .unwrap_or_else(Quaternion::identity);
        Pose::new(position, orientation)
    }

    /// Inverse of [`to_robot`](Self::to_robot).
    pub fn to_device(&self, pose: &Pose) -> Pose {
        let position = self.rotate_vector_inverse(pose.position.scale(1.0 / self.scale));
        let q = self.rotation_q;
        let orientation = q
            .conjugate()
            .mul(pose.orientation)
            .mul(q)
            .normalized()
            .unwrap_or_else(Quaternion::identity);
        Pose::new(position, orientation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn at(x: f32, y: f32, z: f32) -> Pose {
        Pose::new(Vec3::new(x, y, z), Quaternion::identity())
    }

    #[test]
    fn xr_axes_map_to_robot_axes() {
        let tf = FrameTransform::new(AxisRemap::Xr, 1.0).unwrap();

        // device right -> robot -y
        let p = tf.to_robot(&at(1.0, 0.0, 0.0)).position;
        assert!((p.y + 1.0).abs() < 1e-6 && p.x.abs() < 1e-6 && p.z.abs() < 1e-6);

        // device up -> robot up
        let p = tf.to_robot(&at(0.0, 1.0, 0.0)).position;
        assert!((p.z - 1.0).abs() < 1e-6);

        // device back -> robot back
        let p = tf.to_robot(&at(0.0, 0.0, 1.0)).position;
        assert!((p.x + 1.0).abs() < 1e-6);
    }

    #[test]
    fn position_is_scaled() {
        let tf = FrameTransform::new(AxisRemap::Identity, 1.5).unwrap();
        let p = tf.to_robot(&at(0.05, 0.0, 0.0)).position;
        assert!((p.x - 0.075).abs() < 1e-6);
    }

    #[test]
    fn rotation_quaternion_agrees_with_matrix() {
        let tf = FrameTransform::new(AxisRemap::Xr, 1.0).unwrap();
        for v in [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.3, -0.2, 0.9),
        ] {
            let by_matrix = tf.rotate_vector(v);
            let by_quat = tf.rotation_q.rotate(v);
            assert!(by_matrix.sub(by_quat).norm() < 1e-5);
        }
    }

    #[test]
    fn device_yaw_becomes_robot_yaw() {
        // Turning about the device up axis is turning about the robot up axis.
        let tf = FrameTransform::new(AxisRemap::Xr, 1.0).unwrap();
        let device_q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), FRAC_PI_2);
        let robot = tf.to_robot(&Pose::new(Vec3::zero(), device_q));
        let expected = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        assert!(robot.orientation.angle_to(expected) < 1e-4);
    }

    #[test]
    fn to_device_inverts_to_robot() {
        let tf = FrameTransform::new(AxisRemap::Xr, 1.5).unwrap();
        let q = Quaternion::from_axis_angle(Vec3::new(0.6, 0.0, 0.8), 0.4);
        let pose = Pose::new(Vec3::new(0.1, -0.2, 0.3), q);
        let back = tf.to_device(&tf.to_robot(&pose));
        assert!(back.position.sub(pose.position).norm() < 1e-5);
        assert!(back.orientation.angle_to(pose.orientation) < 1e-3);
    }

    #[test]
    fn rejects_out_of_range_scale() {
        assert!(FrameTransform::new(AxisRemap::Xr, 0.0).is_err());
        assert!(FrameTransform::new(AxisRemap::Xr, -1.0).is_err());
        assert!(FrameTransform::new(AxisRemap::Xr, 5.5).is_err());
        assert!(FrameTransform::new(AxisRemap::Xr, f32::NAN).is_err());
        assert!(FrameTransform::new(AxisRemap::Xr, 5.0).is_ok());
    }
}
