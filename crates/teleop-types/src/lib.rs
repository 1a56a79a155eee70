mod geometry;

pub use geometry::{Pose, Quaternion, Vec3};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Which of the operator's hands (and which robot arm) a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    /// Both hands, left first.
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    /// Array index (left = 0, right = 1).
    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hand::Left => f.write_str("left"),
            Hand::Right => f.write_str("right"),
        }
    }
}

/// Raw grip signal reported by the tracking device for one hand.
///
/// Which variant a deployment uses is configured; the gripper mapper rejects
/// a variant that does not match its configured input kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GripInput {
    /// Thumb-to-index distance in metres.
    Pinch(f32),
    /// Binary grip button.
    Grip(bool),
    /// Analogue trigger in [0, 1], 1 = fully squeezed.
    Squeeze(f32),
}

/// One hand's slice of a tracking sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandSample {
    pub pose: Pose,
    #[serde(default)]
    pub grip: Option<GripInput>,
    /// `false` when the device reports tracking as lost for this hand.
    pub valid: bool,
}

impl HandSample {
    pub fn tracked(pose: Pose, grip: Option<GripInput>) -> Self {
        Self {
            pose,
            grip,
            valid: true,
        }
    }

    pub fn lost() -> Self {
        Self {
            pose: Pose::identity(),
            grip: None,
            valid: false,
        }
    }

    /// The validated, re-normalised pose of this hand.
    ///
    /// # Errors
    ///
    /// [`TeleopError::TrackingInvalid`] when the device flagged the hand as
    /// lost or the pose contains non-finite or degenerate values.
    pub fn usable_pose(&self) -> Result<Pose, TeleopError> {
        if !self.valid {
            return Err(TeleopError::TrackingInvalid(
                "device reported tracking lost".to_string(),
            ));
        }
        self.pose.validated()
    }
}

/// One tracking observation, in the device frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Strictly increasing per new observation; used to detect staleness.
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub head: Option<Pose>,
    pub left: HandSample,
    pub right: HandSample,
}

impl Sample {
    pub fn hand(&self, hand: Hand) -> &HandSample {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }
}

/// Reference device-frame poses captured at calibration time.
///
/// Immutable once produced; re-calibration replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOrigin {
    pub left: Pose,
    pub right: Pose,
    pub captured_at: DateTime<Utc>,
}

impl CalibrationOrigin {
    pub fn reference(&self, hand: Hand) -> Pose {
        match hand {
            Hand::Left => self.left,
            Hand::Right => self.right,
        }
    }
}

/// Operating modes exposed by the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RobotMode {
    /// Joints compliant; safe resting mode.
    Damping,
    /// Standing, awaiting a motion mode.
    Ready,
    Mode0,
    /// Arm-control mode used for teleoperation.
    Mode1,
    /// Exit mode used before returning to damping on shutdown.
    Mode2,
}

impl RobotMode {
    pub fn accepts_pose_commands(self) -> bool {
        matches!(self, RobotMode::Mode1 | RobotMode::Mode2)
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RobotMode::Damping => "damping",
            RobotMode::Ready => "ready",
            RobotMode::Mode0 => "mode0",
            RobotMode::Mode1 => "mode1",
            RobotMode::Mode2 => "mode2",
        };
        f.write_str(s)
    }
}

/// States of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopState {
    Idle,
    Initializing,
    Calibrating,
    Running,
    /// Latched stop; no further commands are sent.
    EmergencyStopped,
    /// Initialization failed; no command was ever streamed.
    Faulted,
    /// Operator-requested graceful shutdown completed.
    Stopped,
}

impl LoopState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::EmergencyStopped | LoopState::Faulted | LoopState::Stopped
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Initializing => "initializing",
            LoopState::Calibrating => "calibrating",
            LoopState::Running => "running",
            LoopState::EmergencyStopped => "emergency_stopped",
            LoopState::Faulted => "faulted",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A fully mapped command for one control tick, in the robot frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub left: Pose,
    pub right: Pose,
    /// 0 = closed, 1000 = open.
    pub left_gripper: u16,
    pub right_gripper: u16,
    pub head_pitch_rad: f32,
}

impl Command {
    pub fn pose(&self, hand: Hand) -> Pose {
        match hand {
            Hand::Left => self.left,
            Hand::Right => self.right,
        }
    }

    pub fn gripper(&self, hand: Hand) -> u16 {
        match hand {
            Hand::Left => self.left_gripper,
            Hand::Right => self.right_gripper,
        }
    }
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "teleop-cli::console"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Halt immediately; honoured from any loop state.
    EmergencyStop { reason: String },
    /// Operator asked to capture a fresh calibration origin.
    RecalibrateRequested,
    /// Operator asked for a graceful stop (exit mode, then damping).
    ShutdownRequested,
    /// Operator asked for a one-off status report.
    StatusRequested,
    StateChanged { from: LoopState, to: LoopState },
    TrackingLost { hand: Hand, detail: String },
    WorkspaceClamped { hand: Hand, total: u64 },
    SessionFault { code: u32, message: String },
}

/// Errors surfaced by the teleoperation core.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TeleopError {
    #[error("Tracking invalid: {0}")]
    TrackingInvalid(String),

    #[error("Calibration incomplete: no valid pose observed for {hands:?}")]
    CalibrationIncomplete { hands: Vec<Hand> },

    #[error("Calibration load failed: {0}")]
    CalibrationLoad(String),

    #[error("Robot did not confirm mode {mode} within {timeout_ms} ms")]
    ModeTransitionTimeout { mode: RobotMode, timeout_ms: u64 },

    #[error("Robot rejected mode {mode}: {detail}")]
    ModeRejected { mode: RobotMode, detail: String },

    #[error("Robot session unavailable: {0}")]
    RobotSessionUnavailable(String),

    #[error("Emergency stop engaged: {0}")]
    EmergencyStopped(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TeleopError {
    /// Fatal errors end the control loop; the rest are counted and logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TeleopError::ModeTransitionTimeout { .. }
                | TeleopError::ModeRejected { .. }
                | TeleopError::RobotSessionUnavailable(_)
                | TeleopError::EmergencyStopped(_)
        )
    }
}

impl From<serde_json::Error> for TeleopError {
    fn from(e: serde_json::Error) -> Self {
        TeleopError::Serialization(e.to_string())
    }
}
