//! [`Calibrator`] – captures the operator's reference pose for each hand.
//!
//! A capture runs over a settle window.  Every new sample seen during the
//! window is mapped into the robot frame and accumulated per hand; at the
//! end the reference pose is the mean position plus the sign-aligned,
//! re-normalised mean orientation.  A hand that is active but never showed a
//! valid pose fails the whole capture with
//! [`TeleopError::CalibrationIncomplete`].
//!
//! The capture itself never sleeps.  The control loop drives it tick by tick
//! so the emergency-stop latch is still honoured during the window.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chrono::Utc;
//! use teleop_perception::transform::{AxisRemap, FrameTransform};
//! use teleop_runtime::calibrator::Calibrator;
//! use teleop_types::{Hand, HandSample, Pose, Sample};
//!
//! let transform = FrameTransform::new(AxisRemap::Identity, 1.0).unwrap();
//! let calibrator = Calibrator::new(transform, vec![Hand::Left]);
//! let mut capture = calibrator.begin_calibration(Duration::ZERO);
//! capture.observe(&Sample {
//!     seq: 1,
//!     captured_at: Utc::now(),
//!     head: None,
//!     left: HandSample::tracked(Pose::identity(), None),
//!     right: HandSample::lost(),
//! });
//! let origin = capture.finish().unwrap();
//! assert_eq!(origin.left, Pose::identity());
//! ```

use std::time::{Duration, Instant};

use chrono::Utc;
use teleop_perception::transform::FrameTransform;
use teleop_types::{CalibrationOrigin, Hand, Pose, Quaternion, Sample, TeleopError, Vec3};
use tracing::{debug, info};

/// Builds calibration captures for a fixed transform and set of active hands.
#[derive(Debug, Clone)]
pub struct Calibrator {
    transform: FrameTransform,
    active: Vec<Hand>,
}

impl Calibrator {
    pub fn new(transform: FrameTransform, active: Vec<Hand>) -> Self {
        Self { transform, active }
    }

    pub fn active_hands(&self) -> &[Hand] {
        &self.active
    }

    /// Start a capture window of length `settle`.
    pub fn begin_calibration(&self, settle: Duration) -> CalibrationCapture {
        info!(settle_ms = settle.as_millis() as u64, hands = ?self.active, "Calibration window open");
        CalibrationCapture {
            transform: self.transform,
            active: self.active.clone(),
            settle,
            started: Instant::now(),
            last_seq: None,
            acc: [Accumulator::default(), Accumulator::default()],
        }
    }

    /// Accept a previously persisted origin instead of capturing one.
    ///
    /// # Errors
    ///
    /// [`TeleopError::CalibrationLoad`] when a reference pose for an active
    /// hand is non-finite or degenerate.
    pub fn load_origin(&self, origin: CalibrationOrigin) -> Result<CalibrationOrigin, TeleopError> {
        let mut checked = origin;
        for hand in &self.active {
            let pose = origin
                .reference(*hand)
                .validated()
                .map_err(|e| TeleopError::CalibrationLoad(format!("{hand} reference: {e}")))?;
            match hand {
                Hand::Left => checked.left = pose,
                Hand::Right => checked.right = pose,
            }
        }
        info!(captured_at = %origin.captured_at, "Loaded persisted calibration origin");
        Ok(checked)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Capture
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Accumulator {
    position: Vec3,
    orientation: [f32; 4],
    first: Option<Quaternion>,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, pose: Pose) {
        let reference = *self.first.get_or_insert(pose.orientation);
        // q and -q are the same rotation; keep every sample on one hemisphere.
        let q = if reference.dot(pose.orientation) < 0.0 {
            pose.orientation.neg()
        } else {
            pose.orientation
        };
        self.position = self.position.add(pose.position);
        self.orientation[0] += q.w;
        self.orientation[1] += q.x;
        self.orientation[2] += q.y;
        self.orientation[3] += q.z;
        self.count += 1;
    }

    fn mean(&self) -> Option<Pose> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f32;
        let [w, x, y, z] = self.orientation;
        let orientation = Quaternion::new(w / n, x / n, y / n, z / n).normalized()?;
        Some(Pose::new(self.position.scale(1.0 / n), orientation))
    }
}

/// One calibration window in progress.
#[derive(Debug, Clone)]
pub struct CalibrationCapture {
    transform: FrameTransform,
    active: Vec<Hand>,
    settle: Duration,
    started: Instant,
    last_seq: Option<u64>,
    acc: [Accumulator; 2],
}

impl CalibrationCapture {
    /// Feed a sample into the capture.
    ///
    /// A sample whose `seq` was already seen is ignored, as is any hand whose
    /// tracking is invalid.  Returns `true` when at least one hand was
    /// accumulated.
    pub fn observe(&mut self, sample: &Sample) -> bool {
        if self.last_seq == Some(sample.seq) {
            return false;
        }
        self.last_seq = Some(sample.seq);

        let mut used = false;
        for hand in &self.active {
            match sample.hand(*hand).usable_pose() {
                Ok(pose) => {
                    self.acc[hand.index()].add(self.transform.to_robot(&pose));
                    used = true;
                }
                Err(e) => debug!(%hand, error = %e, "calibration sample skipped"),
            }
        }
        used
    }

    pub fn is_elapsed(&self) -> bool {
        self.started.elapsed() >= self.settle
    }

    pub fn remaining(&self) -> Duration {
        self.settle.saturating_sub(self.started.elapsed())
    }

    /// Number of poses accumulated for `hand`.
    pub fn samples(&self, hand: Hand) -> usize {
        self.acc[hand.index()].count
    }

    /// Close the window and compute the origin.
    ///
    /// Inactive hands get the identity pose as their reference.
    ///
    /// # Errors
    ///
    /// [`TeleopError::CalibrationIncomplete`] listing every active hand with
    /// no valid pose during the window.
    pub fn finish(self) -> Result<CalibrationOrigin, TeleopError> {
        let mut refs = [Pose::identity(), Pose::identity()];
        let mut missing = Vec::new();
        for hand in &self.active {
            match self.acc[hand.index()].mean() {
                Some(pose) => refs[hand.index()] = pose,
                None => missing.push(*hand),
            }
        }
        if !missing.is_empty() {
            return Err(TeleopError::CalibrationIncomplete { hands: missing });
        }
        info!(
            left_samples = self.samples(Hand::Left),
            right_samples = self.samples(Hand::Right),
            "Calibration captured"
        );
        Ok(CalibrationOrigin {
            left: refs[Hand::Left.index()],
            right: refs[Hand::Right.index()],
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_perception::transform::AxisRemap;
    use teleop_types::HandSample;

    fn sample(seq: u64, left: HandSample, right: HandSample) -> Sample {
        Sample {
            seq,
            captured_at: Utc::now(),
            head: None,
            left,
            right,
        }
    }

    fn at(x: f32, y: f32, z: f32) -> HandSample {
        HandSample::tracked(Pose::new(Vec3::new(x, y, z), Quaternion::identity()), None)
    }

    fn identity_calibrator(hands: Vec<Hand>) -> Calibrator {
        Calibrator::new(FrameTransform::new(AxisRemap::Identity, 1.0).unwrap(), hands)
    }

    #[test]
    fn origin_is_mean_of_window() {
        let mut capture = identity_calibrator(Hand::ALL.to_vec()).begin_calibration(Duration::ZERO);
        capture.observe(&sample(1, at(0.0, 0.0, 0.0), at(1.0, 0.0, 0.0)));
        capture.observe(&sample(2, at(0.2, 0.0, 0.0), at(1.0, 0.4, 0.0)));
        let origin = capture.finish().unwrap();
        assert!((origin.left.position.x - 0.1).abs() < 1e-6);
        assert!((origin.right.position.y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn repeated_sequence_number_is_counted_once() {
        let mut capture = identity_calibrator(vec![Hand::Left]).begin_calibration(Duration::ZERO);
        assert!(capture.observe(&sample(1, at(0.0, 0.0, 0.0), HandSample::lost())));
        assert!(!capture.observe(&sample(1, at(0.0, 0.0, 0.0), HandSample::lost())));
        assert_eq!(capture.samples(Hand::Left), 1);
    }

    #[test]
    fn missing_active_hand_fails() {
        let mut capture = identity_calibrator(Hand::ALL.to_vec()).begin_calibration(Duration::ZERO);
        capture.observe(&sample(1, at(0.0, 0.0, 0.0), HandSample::lost()));
        assert_eq!(
            capture.finish().unwrap_err(),
            TeleopError::CalibrationIncomplete {
                hands: vec![Hand::Right]
            }
        );
    }

    #[test]
    fn empty_window_lists_every_active_hand() {
        let capture = identity_calibrator(Hand::ALL.to_vec()).begin_calibration(Duration::ZERO);
        assert_eq!(
            capture.finish().unwrap_err(),
            TeleopError::CalibrationIncomplete {
                hands: vec![Hand::Left, Hand::Right]
            }
        );
    }

    #[test]
    fn inactive_hand_needs_no_origin() {
        let mut capture = identity_calibrator(vec![Hand::Right]).begin_calibration(Duration::ZERO);
        capture.observe(&sample(1, HandSample::lost(), at(0.3, 0.0, 0.0)));
        let origin = capture.finish().unwrap();
        assert_eq!(origin.left, Pose::identity());
        assert!((origin.right.position.x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn orientations_on_opposite_hemispheres_average_cleanly() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.4);
        let mut capture = identity_calibrator(vec![Hand::Left]).begin_calibration(Duration::ZERO);
        capture.observe(&sample(1, HandSample::tracked(Pose::new(Vec3::zero(), q), None), HandSample::lost()));
        capture.observe(&sample(
            2,
            HandSample::tracked(Pose::new(Vec3::zero(), q.neg()), None),
            HandSample::lost(),
        ));
        let origin = capture.finish().unwrap();
        assert!(origin.left.orientation.angle_to(q) < 1e-4);
    }

    #[test]
    fn origin_is_expressed_in_robot_frame() {
        let calibrator = Calibrator::new(
            FrameTransform::new(AxisRemap::Xr, 1.5).unwrap(),
            vec![Hand::Left],
        );
        let mut capture = calibrator.begin_calibration(Duration::ZERO);
        // Device forward is -z, which is robot +x.
        capture.observe(&sample(1, at(0.0, 0.0, -0.1), HandSample::lost()));
        let origin = capture.finish().unwrap();
        assert!((origin.left.position.x - 0.15).abs() < 1e-6);
    }

    #[test]
    fn window_timing() {
        let capture = identity_calibrator(vec![Hand::Left]).begin_calibration(Duration::from_secs(60));
        assert!(!capture.is_elapsed());
        assert!(capture.remaining() > Duration::from_secs(59));
        assert!(identity_calibrator(vec![Hand::Left])
            .begin_calibration(Duration::ZERO)
            .is_elapsed());
    }

    #[test]
    fn load_origin_rejects_degenerate_pose() {
        let calibrator = identity_calibrator(vec![Hand::Left]);
        let bad = CalibrationOrigin {
            left: Pose::new(Vec3::new(f32::NAN, 0.0, 0.0), Quaternion::identity()),
            right: Pose::identity(),
            captured_at: Utc::now(),
        };
        assert!(matches!(
            calibrator.load_origin(bad),
            Err(TeleopError::CalibrationLoad(_))
        ));

        let ok = CalibrationOrigin {
            left: Pose::new(Vec3::zero(), Quaternion::new(2.0, 0.0, 0.0, 0.0)),
            ..bad
        };
        let loaded = calibrator.load_origin(ok).unwrap();
        assert!((loaded.left.orientation.w - 1.0).abs() < 1e-6);
    }
}
