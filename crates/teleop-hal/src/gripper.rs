//! Gripper value mapping.
//!
//! The robot's claws take an integer in `[0, 1000]`: 0 fully closed, 1000
//! fully open.  Three operator inputs are supported and one is chosen per
//! session:
//!
//! | Input | Mapping |
//! |---|---|
//! | pinch distance (m) | linear between the closed and open thresholds, saturating outside |
//! | grip button | pressed → 0, released → 1000 |
//! | trigger squeeze ∈ [0, 1] | `(1 − squeeze) · 1000` |
//!
//! # Example
//!
//! ```
//! use teleop_hal::gripper::GripperMapper;
//! use teleop_types::GripInput;
//!
//! let mapper = GripperMapper::pinch(0.0, 0.10).unwrap();
//! assert_eq!(mapper.map(GripInput::Pinch(0.05)).unwrap(), 500);
//! assert_eq!(mapper.map(GripInput::Pinch(0.25)).unwrap(), 1000);
//! ```

use serde::{Deserialize, Serialize};
use teleop_types::{GripInput, Hand, TeleopError};

pub const GRIPPER_CLOSED: u16 = 0;
pub const GRIPPER_OPEN: u16 = 1000;

/// Which operator input drives the grippers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripInputKind {
    #[default]
    Pinch,
    Grip,
    Squeeze,
}

/// Maps one kind of [`GripInput`] to a gripper value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperMapper {
    kind: GripInputKind,
    closed_threshold: f32,
    open_threshold: f32,
}

impl GripperMapper {
    /// Build a mapper for `kind`.  The thresholds only matter for pinch.
    ///
    /// # Errors
    ///
    /// [`TeleopError::Config`] unless both thresholds are finite and
    /// `open_threshold > closed_threshold`.
    pub fn new(
        kind: GripInputKind,
        closed_threshold: f32,
        open_threshold: f32,
    ) -> Result<Self, TeleopError> {
        if !closed_threshold.is_finite() || !open_threshold.is_finite() {
            return Err(TeleopError::Config(
                "pinch thresholds must be finite".to_string(),
            ));
        }
        if open_threshold <= closed_threshold {
            return Err(TeleopError::Config(format!(
                "pinch_open_threshold ({open_threshold}) must exceed pinch_closed_threshold ({closed_threshold})"
            )));
        }
        Ok(Self {
            kind,
            closed_threshold,
            open_threshold,
        })
    }

    pub fn pinch(closed_threshold: f32, open_threshold: f32) -> Result<Self, TeleopError> {
        Self::new(GripInputKind::Pinch, closed_threshold, open_threshold)
    }

    pub fn grip() -> Self {
        Self {
            kind: GripInputKind::Grip,
            closed_threshold: 0.0,
            open_threshold: 0.10,
        }
    }

    pub fn squeeze() -> Self {
        Self {
            kind: GripInputKind::Squeeze,
            closed_threshold: 0.0,
            open_threshold: 0.10,
        }
    }

    pub fn kind(&self) -> GripInputKind {
        self.kind
    }

    /// Map a raw input to a gripper value.
    ///
    /// # Errors
    ///
    /// [`TeleopError::TrackingInvalid`] for a NaN analogue value or an input
    /// of a different kind than this mapper was built for.
    pub fn map(&self, input: GripInput) -> Result<u16, TeleopError> {
        match (self.kind, input) {
            (GripInputKind::Pinch, GripInput::Pinch(distance)) => {
                if distance.is_nan() {
                    return Err(TeleopError::TrackingInvalid("NaN pinch distance".to_string()));
                }
                Ok(self.map_pinch(distance))
            }
            (GripInputKind::Grip, GripInput::Grip(pressed)) => {
                Ok(if pressed { GRIPPER_CLOSED } else { GRIPPER_OPEN })
            }
            (GripInputKind::Squeeze, GripInput::Squeeze(squeeze)) => {
                if squeeze.is_nan() {
                    return Err(TeleopError::TrackingInvalid("NaN trigger squeeze".to_string()));
                }
                Ok(to_gripper_value(1.0 - squeeze.clamp(0.0, 1.0)))
            }
            (kind, other) => Err(TeleopError::TrackingInvalid(format!(
                "expected {kind:?} input, got {other:?}"
            ))),
        }
    }

    /// Linear pinch mapping, saturating outside the threshold band.
    pub fn map_pinch(&self, distance: f32) -> u16 {
        let span = self.open_threshold - self.closed_threshold;
        let t = ((distance - self.closed_threshold) / span).clamp(0.0, 1.0);
        to_gripper_value(t)
    }
}

fn to_gripper_value(fraction: f32) -> u16 {
    (fraction.clamp(0.0, 1.0) * f32::from(GRIPPER_OPEN)).round() as u16
}

/// Per-hand exponential smoothing of gripper values.
///
/// The weight is `0.7 × smoothing_factor`, a little lighter than the arm
/// filter so the claws feel responsive.
#[derive(Debug, Clone)]
pub struct GripperSmoother {
    weight: f32,
    last: [Option<f32>; 2],
}

impl GripperSmoother {
    pub fn new(smoothing_factor: f32) -> Self {
        Self {
            weight: (0.7 * smoothing_factor).clamp(0.0, 1.0),
            last: [None, None],
        }
    }

    pub fn smooth(&mut self, hand: Hand, value: u16) -> u16 {
        let raw = f32::from(value);
        let blended = match self.last[hand.index()] {
            Some(prev) => self.weight * prev + (1.0 - self.weight) * raw,
            None => raw,
        };
        self.last[hand.index()] = Some(blended);
        blended.round().clamp(0.0, f32::from(GRIPPER_OPEN)) as u16
    }

    pub fn reset(&mut self) {
        self.last = [None, None];
    }
}
