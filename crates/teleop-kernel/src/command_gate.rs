//! [`CommandGate`] – single interception point between the control loop and
//! the robot session.
//!
//! Every [`Command`] the control loop builds must pass
//! [`CommandGate::authorize`] before it is dispatched.  Checks run in order:
//!
//! 1. **Stop latch**: a tripped [`EmergencyStopLatch`] rejects everything with
//!    [`TeleopError::EmergencyStopped`].
//! 2. **Mode**: the robot must be in a mode that accepts pose commands.
//! 3. **Command rules**: every registered [`CommandRule`] in insertion order;
//!    the first violation is returned.
//!
//! # Example
//!
//! ```
//! use teleop_kernel::{CommandGate, EmergencyStopLatch, GripperRangeRule};
//! use teleop_types::{Command, Pose, RobotMode};
//!
//! let latch = EmergencyStopLatch::new();
//! let mut gate = CommandGate::new(latch.clone());
//! gate.add_rule(Box::new(GripperRangeRule::default()));
//!
//! let cmd = Command {
//!     left: Pose::identity(),
//!     right: Pose::identity(),
//!     left_gripper: 1000,
//!     right_gripper: 0,
//!     head_pitch_rad: 0.0,
//! };
//! assert!(gate.authorize(RobotMode::Mode1, &cmd).is_ok());
//! assert!(gate.authorize(RobotMode::Damping, &cmd).is_err());
//!
//! latch.trigger("stop");
//! assert!(gate.authorize(RobotMode::Mode1, &cmd).is_err());
//! ```

use teleop_types::{Command, Hand, RobotMode, TeleopError};

use crate::estop::EmergencyStopLatch;
use crate::workspace::Workspace;

/// Positions produced by the clamp may sit exactly on a bound; allow for
/// float noise from the anchor composition.
const WORKSPACE_TOLERANCE: f32 = 1e-4;

/// Allowed deviation of a quaternion norm from 1.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant that an outgoing command must satisfy.
pub trait CommandRule: Send + Sync {
    /// Name used in rejection messages.
    fn name(&self) -> &str;

    fn check(&self, command: &Command) -> Result<(), TeleopError>;
}

// ────────────────────────────────────────────────────────────────────────────
// CommandGate
// ────────────────────────────────────────────────────────────────────────────

pub struct CommandGate {
    latch: EmergencyStopLatch,
    rules: Vec<Box<dyn CommandRule>>,
}

impl CommandGate {
    /// A gate with no command rules; only the latch and mode checks apply.
    pub fn new(latch: EmergencyStopLatch) -> Self {
        Self {
            latch,
            rules: Vec::new(),
        }
    }

    /// A gate carrying every built-in rule.
    pub fn with_standard_rules(
        latch: EmergencyStopLatch,
        workspace: Workspace,
        head_pitch_min_rad: f32,
        head_pitch_max_rad: f32,
    ) -> Self {
        let mut gate = Self::new(latch);
        gate.add_rule(Box::new(FiniteCommandRule));
        gate.add_rule(Box::new(GripperRangeRule::default()));
        gate.add_rule(Box::new(HeadPitchRule {
            min_rad: head_pitch_min_rad,
            max_rad: head_pitch_max_rad,
        }));
        gate.add_rule(Box::new(WorkspaceRule { bounds: workspace }));
        gate
    }

    /// Register a rule.  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn CommandRule>) {
        self.rules.push(rule);
    }

    /// Decide whether `command` may be sent while the robot is in `mode`.
    ///
    /// # Errors
    ///
    /// - [`TeleopError::EmergencyStopped`] – the stop latch is tripped.
    /// - [`TeleopError::CommandRejected`] – wrong mode or a rule failed.
    pub fn authorize(&self, mode: RobotMode, command: &Command) -> Result<(), TeleopError> {
        if self.latch.is_triggered() {
            return Err(TeleopError::EmergencyStopped(
                self.latch.reason().unwrap_or_default(),
            ));
        }
        if !mode.accepts_pose_commands() {
            return Err(TeleopError::CommandRejected(format!(
                "robot mode {mode} does not accept pose commands"
            )));
        }
        for rule in &self.rules {
            rule.check(command)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects non-finite values and non-unit orientations.
pub struct FiniteCommandRule;

impl CommandRule for FiniteCommandRule {
    fn name(&self) -> &str {
        "finite"
    }

    fn check(&self, command: &Command) -> Result<(), TeleopError> {
        for hand in Hand::ALL {
            let pose = command.pose(hand);
            if !pose.position.is_finite() || !pose.orientation.is_finite() {
                return Err(TeleopError::CommandRejected(format!(
                    "{}: non-finite {hand} pose",
                    self.name()
                )));
            }
            if (pose.orientation.norm() - 1.0).abs() > UNIT_NORM_TOLERANCE {
                return Err(TeleopError::CommandRejected(format!(
                    "{}: {hand} orientation is not unit length",
                    self.name()
                )));
            }
        }
        if !command.head_pitch_rad.is_finite() {
            return Err(TeleopError::CommandRejected(format!(
                "{}: non-finite head pitch",
                self.name()
            )));
        }
        Ok(())
    }
}

/// Rejects gripper values above the robot's range.
pub struct GripperRangeRule {
    pub max: u16,
}

impl Default for GripperRangeRule {
    fn default() -> Self {
        Self { max: 1000 }
    }
}

impl CommandRule for GripperRangeRule {
    fn name(&self) -> &str {
        "gripper_range"
    }

    fn check(&self, command: &Command) -> Result<(), TeleopError> {
        for hand in Hand::ALL {
            let value = command.gripper(hand);
            if value > self.max {
                return Err(TeleopError::CommandRejected(format!(
                    "{}: {hand} gripper {value} exceeds {}",
                    self.name(),
                    self.max
                )));
            }
        }
        Ok(())
    }
}

/// Rejects head pitches outside the joint limits.
pub struct HeadPitchRule {
    pub min_rad: f32,
    pub max_rad: f32,
}

impl CommandRule for HeadPitchRule {
    fn name(&self) -> &str {
        "head_pitch"
    }

    fn check(&self, command: &Command) -> Result<(), TeleopError> {
        let pitch = command.head_pitch_rad;
        if pitch < self.min_rad - 1e-6 || pitch > self.max_rad + 1e-6 {
            return Err(TeleopError::CommandRejected(format!(
                "{}: pitch {pitch} outside [{}, {}]",
                self.name(),
                self.min_rad,
                self.max_rad
            )));
        }
        Ok(())
    }
}

/// Rejects positions outside the workspace box.
///
/// The clamp upstream makes this unreachable in normal operation; the rule
/// catches a pipeline that skipped it.
pub struct WorkspaceRule {
    pub bounds: Workspace,
}

impl CommandRule for WorkspaceRule {
    fn name(&self) -> &str {
        "workspace"
    }

    fn check(&self, command: &Command) -> Result<(), TeleopError> {
        for hand in Hand::ALL {
            let p = command.pose(hand).position;
            if !self.bounds.contains(p, WORKSPACE_TOLERANCE) {
                return Err(TeleopError::CommandRejected(format!(
                    "{}: {hand} position ({:.3}, {:.3}, {:.3}) outside workspace",
                    self.name(),
                    p.x,
                    p.y,
                    p.z
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_types::{Pose, Quaternion, Vec3};

    fn command() -> Command {
        Command {
            left: Pose::identity(),
            right: Pose::identity(),
            left_gripper: 500,
            right_gripper: 1000,
            head_pitch_rad: 0.1,
        }
    }

    fn gate(latch: &EmergencyStopLatch) -> CommandGate {
        CommandGate::with_standard_rules(
            latch.clone(),
            Workspace::relative_default(),
            (-30.0f32).to_radians(),
            45.0f32.to_radians(),
        )
    }

    #[test]
    fn valid_command_passes_in_mode1() {
        let latch = EmergencyStopLatch::new();
        assert!(gate(&latch).authorize(RobotMode::Mode1, &command()).is_ok());
    }

    #[test]
    fn tripped_latch_rejects_everything() {
        let latch = EmergencyStopLatch::new();
        let g = gate(&latch);
        latch.trigger("remote");
        let err = g.authorize(RobotMode::Mode1, &command()).unwrap_err();
        assert_eq!(err, TeleopError::EmergencyStopped("remote".to_string()));
    }

    #[test]
    fn non_manip_mode_rejected() {
        let latch = EmergencyStopLatch::new();
        let err = gate(&latch)
            .authorize(RobotMode::Ready, &command())
            .unwrap_err();
        assert!(matches!(err, TeleopError::CommandRejected(_)));
    }

    #[test]
    fn nan_position_rejected() {
        let latch = EmergencyStopLatch::new();
        let mut cmd = command();
        cmd.left.position = Vec3::new(f32::NAN, 0.0, 0.0);
        let err = gate(&latch).authorize(RobotMode::Mode1, &cmd).unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn non_unit_orientation_rejected() {
        let latch = EmergencyStopLatch::new();
        let mut cmd = command();
        cmd.right.orientation = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        assert!(gate(&latch).authorize(RobotMode::Mode1, &cmd).is_err());
    }

    #[test]
    fn gripper_over_range_rejected() {
        let latch = EmergencyStopLatch::new();
        let mut cmd = command();
        cmd.left_gripper = 1001;
        let err = gate(&latch).authorize(RobotMode::Mode1, &cmd).unwrap_err();
        assert!(err.to_string().contains("gripper_range"));
    }

    #[test]
    fn head_pitch_over_limit_rejected() {
        let latch = EmergencyStopLatch::new();
        let mut cmd = command();
        cmd.head_pitch_rad = 1.0;
        let err = gate(&latch).authorize(RobotMode::Mode1, &cmd).unwrap_err();
        assert!(err.to_string().contains("head_pitch"));
    }

    #[test]
    fn position_outside_workspace_rejected() {
        let latch = EmergencyStopLatch::new();
        let mut cmd = command();
        cmd.right.position = Vec3::new(0.5, 0.0, 0.0);
        let err = gate(&latch).authorize(RobotMode::Mode1, &cmd).unwrap_err();
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn empty_gate_only_checks_latch_and_mode() {
        let latch = EmergencyStopLatch::new();
        let g = CommandGate::new(latch);
        let mut cmd = command();
        cmd.left_gripper = 5000;
        assert!(g.authorize(RobotMode::Mode2, &cmd).is_ok());
    }
}
