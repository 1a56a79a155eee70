//! In-process robot for headless runs and tests.
//!
//! [`SimRobotSession`] acknowledges mode requests, records every command and
//! emergency stop it receives, and can be configured to misbehave: never
//! confirm a mode, reject a mode, go offline, or respond slowly.
//!
//! # Example
//!
//! ```rust
//! use teleop_hal::session::RobotSession;
//! use teleop_hal::sim::SimRobotSession;
//! use teleop_types::RobotMode;
//!
//! let robot = SimRobotSession::new().with_unacknowledged_mode(RobotMode::Ready);
//! assert!(robot.is_connected());
//! assert!(robot.mode_requests().is_empty());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use teleop_types::{Command, Pose, Quaternion, RobotMode, TeleopError, Vec3};
use tracing::debug;

use crate::session::RobotSession;

#[derive(Debug, Default)]
struct SimState {
    mode: Option<RobotMode>,
    mode_requests: Vec<RobotMode>,
    commands: Vec<Command>,
    emergency_stops: usize,
}

/// A simulated robot that records what it is told.
#[derive(Debug)]
pub struct SimRobotSession {
    state: Mutex<SimState>,
    connected: AtomicBool,
    unacknowledged: Option<RobotMode>,
    rejected: Option<RobotMode>,
    end_effectors: (Pose, Pose),
    command_delay: Option<Duration>,
}

impl Default for SimRobotSession {
    fn default() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            connected: AtomicBool::new(true),
            unacknowledged: None,
            rejected: None,
            end_effectors: (
                Pose::new(Vec3::new(0.30, 0.20, 0.90), Quaternion::identity()),
                Pose::new(Vec3::new(0.30, -0.20, 0.90), Quaternion::identity()),
            ),
            command_delay: None,
        }
    }
}

impl SimRobotSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never confirm requests for `mode`; `set_mode` stays pending forever.
    pub fn with_unacknowledged_mode(mut self, mode: RobotMode) -> Self {
        self.unacknowledged = Some(mode);
        self
    }

    /// Answer requests for `mode` with a rejection.
    pub fn with_rejected_mode(mut self, mode: RobotMode) -> Self {
        self.rejected = Some(mode);
        self
    }

    pub fn with_end_effector_poses(mut self, left: Pose, right: Pose) -> Self {
        self.end_effectors = (left, right);
        self
    }

    /// Sleep this long inside every `send_command`.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = Some(delay);
        self
    }

    /// Simulate the link dropping or recovering.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn mode(&self) -> Option<RobotMode> {
        self.lock().mode
    }

    pub fn mode_requests(&self) -> Vec<RobotMode> {
        self.lock().mode_requests.clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn last_command(&self) -> Option<Command> {
        self.lock().commands.last().copied()
    }

    pub fn emergency_stop_count(&self) -> usize {
        self.lock().emergency_stops
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RobotSession for SimRobotSession {
    async fn set_mode(&self, mode: RobotMode) -> Result<(), TeleopError> {
        self.lock().mode_requests.push(mode);
        if self.unacknowledged == Some(mode) {
            debug!(%mode, "sim robot ignoring mode request");
            std::future::pending::<()>().await;
        }
        if self.rejected == Some(mode) {
            return Err(TeleopError::ModeRejected {
                mode,
                detail: "simulated rejection".to_string(),
            });
        }
        self.lock().mode = Some(mode);
        debug!(%mode, "sim robot mode confirmed");
        Ok(())
    }

    async fn send_command(&self, command: &Command) -> Result<(), TeleopError> {
        if !self.is_connected() {
            return Err(TeleopError::RobotSessionUnavailable(
                "sim robot offline".to_string(),
            ));
        }
        if let Some(delay) = self.command_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        match state.mode {
            Some(mode) if mode.accepts_pose_commands() => {
                state.commands.push(*command);
                Ok(())
            }
            other => Err(TeleopError::CommandRejected(format!(
                "sim robot in mode {other:?} cannot take pose commands"
            ))),
        }
    }

    async fn emergency_stop(&self) -> Result<(), TeleopError> {
        let mut state = self.lock();
        state.emergency_stops += 1;
        state.mode = Some(RobotMode::Damping);
        Ok(())
    }

    async fn end_effector_poses(&self) -> Result<(Pose, Pose), TeleopError> {
        if !self.is_connected() {
            return Err(TeleopError::RobotSessionUnavailable(
                "sim robot offline".to_string(),
            ));
        }
        Ok(self.end_effectors)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        Command {
            left: Pose::identity(),
            right: Pose::identity(),
            left_gripper: 1000,
            right_gripper: 1000,
            head_pitch_rad: 0.0,
        }
    }

    #[tokio::test]
    async fn records_modes_and_commands() {
        let robot = SimRobotSession::new();
        robot.set_mode(RobotMode::Damping).await.unwrap();
        robot.set_mode(RobotMode::Mode1).await.unwrap();
        robot.send_command(&command()).await.unwrap();

        assert_eq!(robot.mode_requests(), vec![RobotMode::Damping, RobotMode::Mode1]);
        assert_eq!(robot.command_count(), 1);
        assert_eq!(robot.last_command(), Some(command()));
    }

    #[tokio::test]
    async fn rejects_commands_outside_manip_mode() {
        let robot = SimRobotSession::new();
        robot.set_mode(RobotMode::Ready).await.unwrap();
        assert!(robot.send_command(&command()).await.is_err());
        assert_eq!(robot.command_count(), 0);
    }

    #[tokio::test]
    async fn unacknowledged_mode_never_resolves() {
        let robot = SimRobotSession::new().with_unacknowledged_mode(RobotMode::Ready);
        let res = tokio::time::timeout(
            Duration::from_millis(30),
            robot.set_mode(RobotMode::Ready),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(robot.mode(), None);
    }

    #[tokio::test]
    async fn rejected_mode_errors() {
        let robot = SimRobotSession::new().with_rejected_mode(RobotMode::Mode0);
        let err = robot.set_mode(RobotMode::Mode0).await.unwrap_err();
        assert!(matches!(err, TeleopError::ModeRejected { mode: RobotMode::Mode0, .. }));
    }

    #[tokio::test]
    async fn emergency_stop_drops_to_damping() {
        let robot = SimRobotSession::new();
        robot.set_mode(RobotMode::Mode1).await.unwrap();
        robot.emergency_stop().await.unwrap();
        assert_eq!(robot.mode(), Some(RobotMode::Damping));
        assert_eq!(robot.emergency_stop_count(), 1);
        assert!(robot.send_command(&command()).await.is_err());
    }

    #[tokio::test]
    async fn offline_robot_refuses_everything() {
        let robot = SimRobotSession::new();
        robot.set_mode(RobotMode::Mode1).await.unwrap();
        robot.set_connected(false);
        assert!(!robot.is_connected());
        assert!(matches!(
            robot.send_command(&command()).await,
            Err(TeleopError::RobotSessionUnavailable(_))
        ));
        assert!(robot.end_effector_poses().await.is_err());
    }
}
