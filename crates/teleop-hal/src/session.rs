//! The robot seam.
//!
//! The control loop never speaks a robot protocol directly.  It drives a
//! [`RobotSession`], and transports (the WebSocket adapter in
//! `teleop-middleware`, the in-process [`SimRobotSession`][crate::sim::SimRobotSession])
//! translate those calls into whatever the controller understands.

use async_trait::async_trait;
use teleop_types::{Command, Pose, RobotMode, TeleopError};

/// Stateful command channel to one robot.
///
/// # Contract
///
/// * `set_mode` – request a mode and resolve once the robot confirms it.
///   Implementations need not time out themselves; the caller bounds the
///   wait.
/// * `send_command` – best-effort delivery of one tick's command.  Should
///   return as soon as the command is handed to the transport.
/// * `emergency_stop` – put the robot in its safest state immediately.
/// * `end_effector_poses` – current (left, right) end-effector poses in the
///   robot base frame.
/// * `is_connected` – cheap, non-blocking liveness probe polled every tick.
#[async_trait]
pub trait RobotSession: Send + Sync {
    async fn set_mode(&self, mode: RobotMode) -> Result<(), TeleopError>;

    async fn send_command(&self, command: &Command) -> Result<(), TeleopError>;

    async fn emergency_stop(&self) -> Result<(), TeleopError>;

    async fn end_effector_poses(&self) -> Result<(Pose, Pose), TeleopError>;

    fn is_connected(&self) -> bool;
}
