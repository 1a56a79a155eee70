//! [`WorkspaceClamp`] – the last line of defence on commanded positions.
//!
//! Each position axis is clamped independently to the configured bounds.
//! Orientation passes through untouched.  The clamp cannot be switched off;
//! only the bound values are configurable.
//!
//! Clamping is not an error.  Every clamped pose bumps a counter so an
//! operator can tell when the box is being hit.
//!
//! # Example
//!
//! ```
//! use teleop_kernel::workspace::{Workspace, WorkspaceClamp};
//! use teleop_types::{Pose, Quaternion, Vec3};
//!
//! let clamp = WorkspaceClamp::new(Workspace::relative_default());
//! let out = clamp.clamp(&Pose::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()));
//! assert!((out.position.x - 0.20).abs() < 1e-6);
//! assert_eq!(clamp.clamp_count(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use teleop_types::{Pose, TeleopError, Vec3};

/// What the workspace box is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceFrame {
    /// Offsets from the robot's arm-control posture.
    #[default]
    Relative,
    /// Absolute positions in the robot base frame.
    Absolute,
}

impl WorkspaceFrame {
    pub fn default_bounds(self) -> Workspace {
        match self {
            WorkspaceFrame::Relative => Workspace::relative_default(),
            WorkspaceFrame::Absolute => Workspace::absolute_default(),
        }
    }
}

/// Six scalar bounds in the robot base frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
    pub z_min: f32,
    pub z_max: f32,
}

impl Workspace {
    /// Conservative box for offset-from-posture control.
    pub fn relative_default() -> Self {
        Self {
            x_min: -0.10,
            x_max: 0.20,
            y_min: -0.15,
            y_max: 0.15,
            z_min: -0.15,
            z_max: 0.20,
        }
    }

    /// Box for absolute base-frame positions.
    pub fn absolute_default() -> Self {
        Self {
            x_min: -0.50,
            x_max: 0.80,
            y_min: -0.80,
            y_max: 0.80,
            z_min: 0.20,
            z_max: 1.50,
        }
    }

    /// Check that every bound is finite and every `min < max`.
    pub fn validate(&self) -> Result<(), TeleopError> {
        let axes = [
            ("x", self.x_min, self.x_max),
            ("y", self.y_min, self.y_max),
            ("z", self.z_min, self.z_max),
        ];
        for (axis, min, max) in axes {
            if !min.is_finite() || !max.is_finite() {
                return Err(TeleopError::Config(format!(
                    "workspace {axis} bounds must be finite"
                )));
            }
            if min >= max {
                return Err(TeleopError::Config(format!(
                    "workspace {axis}_min ({min}) must be below {axis}_max ({max})"
                )));
            }
        }
        Ok(())
    }

    /// `true` when `p` lies inside the box (inclusive), allowing `tolerance`.
    pub fn contains(&self, p: Vec3, tolerance: f32) -> bool {
        p.x >= self.x_min - tolerance
            && p.x <= self.x_max + tolerance
            && p.y >= self.y_min - tolerance
            && p.y <= self.y_max + tolerance
            && p.z >= self.z_min - tolerance
            && p.z <= self.z_max + tolerance
    }

    fn clamp_point(&self, p: Vec3) -> Vec3 {
        Vec3::new(
            p.x.clamp(self.x_min, self.x_max),
            p.y.clamp(self.y_min, self.y_max),
            p.z.clamp(self.z_min, self.z_max),
        )
    }
}

/// Per-axis position clamp with a running count of clamped poses.
#[derive(Debug)]
pub struct WorkspaceClamp {
    bounds: Workspace,
    clamped: AtomicU64,
}

impl WorkspaceClamp {
    pub fn new(bounds: Workspace) -> Self {
        Self {
            bounds,
            clamped: AtomicU64::new(0),
        }
    }

    pub fn bounds(&self) -> &Workspace {
        &self.bounds
    }

    /// Clamp `pose` into the box.
    pub fn clamp(&self, pose: &Pose) -> Pose {
        self.clamp_observed(pose).0
    }

    /// Clamp `pose` and report whether any axis was out of bounds.
    pub fn clamp_observed(&self, pose: &Pose) -> (Pose, bool) {
        let position = self.bounds.clamp_point(pose.position);
        let violated = position != pose.position;
        if violated {
            self.clamped.fetch_add(1, Ordering::Relaxed);
        }
        (Pose::new(position, pose.orientation), violated)
    }

    /// Number of poses that have been clamped so far.
    pub fn clamp_count(&self) -> u64 {
        self.clamped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_types::Quaternion;

    fn at(x: f32, y: f32, z: f32) -> Pose {
        Pose::new(Vec3::new(x, y, z), Quaternion::identity())
    }

    #[test]
    fn clamps_every_axis_into_bounds() {
        let clamp = WorkspaceClamp::new(Workspace::relative_default());
        let b = *clamp.bounds();
        for p in [
            at(5.0, -5.0, 5.0),
            at(-5.0, 5.0, -5.0),
            at(0.0, 0.3, -0.2),
            at(f32::MAX, f32::MIN, 0.0),
        ] {
            let out = clamp.clamp(&p);
            assert!(b.contains(out.position, 0.0), "{:?} escaped", out.position);
        }
    }

    #[test]
    fn inside_pose_is_untouched() {
        let clamp = WorkspaceClamp::new(Workspace::relative_default());
        let p = at(0.05, -0.1, 0.1);
        let (out, violated) = clamp.clamp_observed(&p);
        assert_eq!(out, p);
        assert!(!violated);
        assert_eq!(clamp.clamp_count(), 0);
    }

    #[test]
    fn clamp_is_idempotent() {
        let clamp = WorkspaceClamp::new(Workspace::absolute_default());
        let once = clamp.clamp(&at(2.0, 0.0, 0.0));
        let twice = clamp.clamp(&once);
        assert_eq!(once, twice);
        assert_eq!(clamp.clamp_count(), 1);
    }

    #[test]
    fn orientation_passes_through() {
        let clamp = WorkspaceClamp::new(Workspace::relative_default());
        let q = Quaternion::new(0.0, 1.0, 0.0, 0.0);
        let out = clamp.clamp(&Pose::new(Vec3::new(9.0, 9.0, 9.0), q));
        assert_eq!(out.orientation, q);
    }

    #[test]
    fn validate_rejects_inverted_axis() {
        let mut ws = Workspace::relative_default();
        assert!(ws.validate().is_ok());
        ws.y_min = 0.5;
        let err = ws.validate().unwrap_err();
        assert!(err.to_string().contains("y_min"));
    }

    #[test]
    fn frame_selects_default_box() {
        assert_eq!(
            WorkspaceFrame::Absolute.default_bounds(),
            Workspace::absolute_default()
        );
        assert_eq!(WorkspaceFrame::default(), WorkspaceFrame::Relative);
    }
}
