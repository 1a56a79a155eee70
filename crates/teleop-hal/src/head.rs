//! Head pitch mapping.
//!
//! The robot's head has a single pitch joint with hard limits.  The operator's
//! head orientation (already in the robot frame) is reduced to its pitch
//! angle and saturated to those limits.  Whatever tracking delivers, the
//! emitted angle stays inside `[min, max]`.

use teleop_types::{Quaternion, TeleopError};

pub const DEFAULT_HEAD_PITCH_MIN_DEG: f32 = -30.0;
pub const DEFAULT_HEAD_PITCH_MAX_DEG: f32 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadMapper {
    min_rad: f32,
    max_rad: f32,
}

impl Default for HeadMapper {
    fn default() -> Self {
        Self {
            min_rad: DEFAULT_HEAD_PITCH_MIN_DEG.to_radians(),
            max_rad: DEFAULT_HEAD_PITCH_MAX_DEG.to_radians(),
        }
    }
}

impl HeadMapper {
    pub fn from_degrees(min_deg: f32, max_deg: f32) -> Result<Self, TeleopError> {
        if !min_deg.is_finite() || !max_deg.is_finite() || min_deg >= max_deg {
            return Err(TeleopError::Config(format!(
                "head pitch limits [{min_deg}, {max_deg}] deg are not a valid range"
            )));
        }
        Ok(Self {
            min_rad: min_deg.to_radians(),
            max_rad: max_deg.to_radians(),
        })
    }

    pub fn limits(&self) -> (f32, f32) {
        (self.min_rad, self.max_rad)
    }

    /// Saturate `pitch_rad` to the joint limits.  Non-finite input maps to
    /// the level position (0, or the nearest limit if 0 is out of range).
    pub fn map(&self, pitch_rad: f32) -> f32 {
        let pitch = if pitch_rad.is_finite() { pitch_rad } else { 0.0 };
        pitch.clamp(self.min_rad, self.max_rad)
    }

    /// Pitch of a robot-frame head orientation, saturated to the limits.
    pub fn map_orientation(&self, orientation: Quaternion) -> f32 {
        self.map(pitch_from_orientation(orientation))
    }
}

/// Rotation about the robot's lateral (y) axis, from a ZYX Euler
/// decomposition.
pub fn pitch_from_orientation(q: Quaternion) -> f32 {
    let sinp = 2.0 * (q.w * q.y - q.z * q.x);
    if sinp.abs() >= 1.0 {
        std::f32::consts::FRAC_PI_2.copysign(sinp)
    } else {
        sinp.asin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_types::Vec3;

    #[test]
    fn in_range_pitch_passes_through() {
        let h = HeadMapper::default();
        assert!((h.map(0.2) - 0.2).abs() < 1e-6);
        assert!((h.map(-0.3) + 0.3).abs() < 1e-6);
    }

    #[test]
    fn pitch_saturates_at_limits() {
        let h = HeadMapper::default();
        assert!((h.map(2.0) - 45.0f32.to_radians()).abs() < 1e-6);
        assert!((h.map(-2.0) + 30.0f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn non_finite_pitch_is_level() {
        let h = HeadMapper::default();
        assert_eq!(h.map(f32::NAN), 0.0);
        let raised = HeadMapper::from_degrees(5.0, 20.0).unwrap();
        assert!((raised.map(f32::INFINITY) - 5.0f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn pitch_extracted_from_orientation() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.4);
        assert!((pitch_from_orientation(q) - 0.4).abs() < 1e-5);

        // Yaw alone has no pitch.
        let yaw = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 1.0);
        assert!(pitch_from_orientation(yaw).abs() < 1e-5);
    }

    #[test]
    fn map_orientation_clamps() {
        let h = HeadMapper::default();
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 1.2);
        assert!((h.map_orientation(q) - 45.0f32.to_radians()).abs() < 1e-5);
    }

    #[test]
    fn invalid_limits_rejected() {
        assert!(HeadMapper::from_degrees(45.0, -30.0).is_err());
        assert!(HeadMapper::from_degrees(f32::NAN, 10.0).is_err());
    }
}
