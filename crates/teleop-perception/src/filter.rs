//! Per-hand motion smoothing.
//!
//! An exponential moving average on position and a slerp on orientation:
//!
//! ```text
//! p_smoothed = α · p_prev + (1 − α) · p_raw
//! q_smoothed = slerp(q_prev, q_raw, 1 − α)
//! ```
//!
//! With the velocity limit enabled the per-tick positional step is further
//! capped at `max_velocity · dt`.
//!
//! # Example
//!
//! ```rust
//! use teleop_perception::filter::MotionFilter;
//! use teleop_types::{Pose, Quaternion, Vec3};
//!
//! let mut f = MotionFilter::new(0.3);
//! f.update(Pose::identity(), 1.0 / 30.0);
//! let out = f.update(Pose::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()), 1.0 / 30.0);
//! assert!((out.position.x - 0.7).abs() < 1e-5);
//! ```

use teleop_types::{Pose, Quaternion, Vec3};

/// Filter memory after the last update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub position: Vec3,
    pub orientation: Quaternion,
    /// Metres per second, from the last positional step.
    pub velocity: Vec3,
}

/// Exponential smoother for one hand's target pose.
#[derive(Debug, Clone)]
pub struct MotionFilter {
    /// Weight on the previous output, clamped to `[0, 1]`.  0 disables
    /// smoothing.
    alpha: f32,
    max_velocity: Option<f32>,
    state: Option<FilterState>,
}

impl MotionFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            max_velocity: None,
            state: None,
        }
    }

    /// Cap the positional step at `max_velocity` metres per second.
    pub fn with_velocity_limit(mut self, max_velocity: f32) -> Self {
        self.max_velocity = Some(max_velocity.max(0.0));
        self
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn state(&self) -> Option<FilterState> {
        self.state
    }

    /// Forget history.  With a seed the next update blends from it; without
    /// one the next raw pose passes straight through.
    pub fn reset(&mut self, seed: Option<Pose>) {
        self.state = seed.map(|p| FilterState {
            position: p.position,
            orientation: p.orientation,
            velocity: Vec3::zero(),
        });
    }

    /// Blend `raw` into the filter and return the smoothed pose.
    ///
    /// `dt` is the elapsed time since the previous update in seconds.
    pub fn update(&mut self, raw: Pose, dt: f32) -> Pose {
        let Some(prev) = self.state else {
            self.state = Some(FilterState {
                position: raw.position,
                orientation: raw.orientation,
                velocity: Vec3::zero(),
            });
            return raw;
        };

        let gain = 1.0 - self.alpha;
        let mut step = raw.position.sub(prev.position).scale(gain);
        if let Some(vmax) = self.max_velocity {
            step = step.clamp_norm(vmax * dt.max(0.0));
        }

        let position = prev.position.add(step);
        let orientation = prev.orientation.slerp(raw.orientation, gain);
        let velocity = if dt > 0.0 {
            step.scale(1.0 / dt)
        } else {
            Vec3::zero()
        };

        self.state = Some(FilterState {
            position,
            orientation,
            velocity,
        });
        Pose::new(position, orientation)
    }
}
