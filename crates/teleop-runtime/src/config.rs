//! Session configuration.
//!
//! [`TeleopConfig`] is built once at session start (by the CLI, from
//! `~/.teleop/config.toml`) and then passed by reference to every component.
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [control]
//! tick_rate_hz = 30.0
//!
//! [motion]
//! motion_scale = 1.5
//! smoothing_factor = 0.3
//! frame_remap = "xr"
//!
//! [workspace]
//! frame = "relative"
//!
//! [robot]
//! url = "ws://10.192.1.2:5000"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teleop_hal::GripInputKind;
use teleop_kernel::{Workspace, WorkspaceFrame};
use teleop_middleware::RobotLinkConfig;
use teleop_perception::transform::{AxisRemap, MAX_MOTION_SCALE};
use teleop_types::{Hand, TeleopError};

const MAX_TICK_RATE_HZ: f32 = 1000.0;

/// Full session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub control: ControlConfig,
    pub motion: MotionConfig,
    pub workspace: WorkspaceConfig,
    pub gripper: GripperConfig,
    pub head: HeadConfig,
    pub hands: HandsConfig,
    pub robot: RobotConfig,
    pub pose_source: PoseSourceConfig,
    pub calibration: CalibrationConfig,
    pub video: VideoConfig,
}

/// Loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_rate_hz: f32,
    /// How long each robot mode change may take before the session aborts.
    pub mode_timeout_ms: u64,
    /// Upper bound on one command dispatch; must be shorter than a tick.
    pub dispatch_timeout_ms: u64,
    /// Silence from the robot link longer than this is an emergency stop.
    pub heartbeat_timeout_ms: u64,
    /// Operator status lines per second while running.
    pub status_rate_hz: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            mode_timeout_ms: 5000,
            dispatch_timeout_ms: 20,
            heartbeat_timeout_ms: 1000,
            status_rate_hz: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Operator-to-robot translation gain, in (0, 5].
    pub motion_scale: f32,
    /// EMA weight on the previous output, in [0, 1).  Higher is smoother.
    pub smoothing_factor: f32,
    pub enable_velocity_limit: bool,
    /// Metres per second, used when `enable_velocity_limit` is set.
    pub max_velocity: f32,
    pub frame_remap: AxisRemap,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            motion_scale: 1.5,
            smoothing_factor: 0.3,
            enable_velocity_limit: false,
            max_velocity: 0.15,
            frame_remap: AxisRemap::Xr,
        }
    }
}

/// Workspace box.  When `bounds` is omitted the frame's default box is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub frame: WorkspaceFrame,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Workspace>,
}

impl WorkspaceConfig {
    pub fn resolved(&self) -> Workspace {
        self.bounds.unwrap_or_else(|| self.frame.default_bounds())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    pub input: GripInputKind,
    pub pinch_closed_threshold: f32,
    pub pinch_open_threshold: f32,
    /// Smooth gripper values with `0.7 × smoothing_factor`.
    pub smoothing: bool,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            input: GripInputKind::Pinch,
            pinch_closed_threshold: 0.0,
            pinch_open_threshold: 0.10,
            smoothing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    /// When off, the head is held level.
    pub enabled: bool,
    pub head_pitch_min_deg: f32,
    pub head_pitch_max_deg: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            head_pitch_min_deg: teleop_hal::head::DEFAULT_HEAD_PITCH_MIN_DEG,
            head_pitch_max_deg: teleop_hal::head::DEFAULT_HEAD_PITCH_MAX_DEG,
        }
    }
}

/// Which hands drive the robot.  An inactive hand needs no calibration
/// origin and its arm holds still.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandsConfig {
    pub left: bool,
    pub right: bool,
}

impl Default for HandsConfig {
    fn default() -> Self {
        Self {
            left: true,
            right: true,
        }
    }
}

impl HandsConfig {
    pub fn is_active(&self, hand: Hand) -> bool {
        match hand {
            Hand::Left => self.left,
            Hand::Right => self.right,
        }
    }

    pub fn active(&self) -> Vec<Hand> {
        Hand::ALL.into_iter().filter(|h| self.is_active(*h)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// WebSocket URL of the robot controller.
    pub url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub gripper_speed: u16,
    pub gripper_force: u16,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let link = RobotLinkConfig::default();
        Self {
            url: link.url,
            connect_timeout_ms: link.connect_timeout.as_millis() as u64,
            request_timeout_ms: link.request_timeout.as_millis() as u64,
            gripper_speed: link.gripper_speed,
            gripper_force: link.gripper_force,
        }
    }
}

impl RobotConfig {
    /// Link settings for the WebSocket robot session.  The link goes stale
    /// at the same silence that trips the heartbeat watchdog.
    pub fn link_config(&self, control: &ControlConfig) -> RobotLinkConfig {
        RobotLinkConfig {
            url: self.url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            stale_after: Duration::from_millis(control.heartbeat_timeout_ms),
            gripper_speed: self.gripper_speed,
            gripper_force: self.gripper_force,
            ..RobotLinkConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSourceConfig {
    /// Address the pose ingress WebSocket server listens on.
    pub bind: String,
    /// A stream silent for longer than this counts as disconnected.
    pub stale_after_ms: u64,
}

impl Default for PoseSourceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8012".to_string(),
            stale_after_ms: 500,
        }
    }
}

impl PoseSourceConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, TeleopError> {
        self.bind
            .parse()
            .map_err(|e| TeleopError::Config(format!("pose_source.bind {:?}: {e}", self.bind)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Capture window length.
    pub settle_ms: u64,
    /// Pause between failed calibration attempts.
    pub retry_delay_ms: u64,
    /// Where the calibration record lives.  `None` disables persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            settle_ms: 3000,
            retry_delay_ms: 1000,
            path: None,
        }
    }
}

/// Image relay.  Frames never pass through this process; the flag only
/// decides whether the operator is told to expect a video session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
}

impl TeleopConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.control.tick_rate_hz)
    }

    pub fn mode_timeout(&self) -> Duration {
        Duration::from_millis(self.control.mode_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.control.dispatch_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.control.heartbeat_timeout_ms)
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.calibration.settle_ms)
    }

    pub fn pose_stale_after(&self) -> Duration {
        Duration::from_millis(self.pose_source.stale_after_ms)
    }

    /// Check every option against its domain.
    ///
    /// # Errors
    ///
    /// [`TeleopError::Config`] naming the first offending option.
    pub fn validate(&self) -> Result<(), TeleopError> {
        let c = &self.control;
        if !(c.tick_rate_hz > 0.0 && c.tick_rate_hz <= MAX_TICK_RATE_HZ) {
            return Err(config_err(format!(
                "control.tick_rate_hz must be in (0, {MAX_TICK_RATE_HZ}], got {}",
                c.tick_rate_hz
            )));
        }
        if c.mode_timeout_ms == 0 || c.heartbeat_timeout_ms == 0 {
            return Err(config_err(
                "control.mode_timeout_ms and control.heartbeat_timeout_ms must be positive",
            ));
        }
        if c.dispatch_timeout_ms == 0 || self.dispatch_timeout() >= self.tick_period() {
            return Err(config_err(format!(
                "control.dispatch_timeout_ms ({}) must be positive and shorter than one tick ({:?})",
                c.dispatch_timeout_ms,
                self.tick_period()
            )));
        }
        if c.status_rate_hz == 0 {
            return Err(config_err("control.status_rate_hz must be positive"));
        }

        let m = &self.motion;
        if !(m.motion_scale > 0.0 && m.motion_scale <= MAX_MOTION_SCALE) {
            return Err(config_err(format!(
                "motion.motion_scale must be in (0, {MAX_MOTION_SCALE}], got {}",
                m.motion_scale
            )));
        }
        if !(0.0..1.0).contains(&m.smoothing_factor) {
            return Err(config_err(format!(
                "motion.smoothing_factor must be in [0, 1), got {}",
                m.smoothing_factor
            )));
        }
        if !(m.max_velocity.is_finite() && m.max_velocity > 0.0) {
            return Err(config_err(format!(
                "motion.max_velocity must be positive, got {}",
                m.max_velocity
            )));
        }

        self.workspace.resolved().validate()?;

        let g = &self.gripper;
        if !(g.pinch_closed_threshold.is_finite() && g.pinch_open_threshold.is_finite())
            || g.pinch_open_threshold <= g.pinch_closed_threshold
        {
            return Err(config_err(format!(
                "gripper.pinch_open_threshold ({}) must exceed gripper.pinch_closed_threshold ({})",
                g.pinch_open_threshold, g.pinch_closed_threshold
            )));
        }

        let h = &self.head;
        if !(h.head_pitch_min_deg.is_finite() && h.head_pitch_max_deg.is_finite())
            || h.head_pitch_min_deg >= h.head_pitch_max_deg
        {
            return Err(config_err(format!(
                "head.head_pitch_min_deg ({}) must be below head.head_pitch_max_deg ({})",
                h.head_pitch_min_deg, h.head_pitch_max_deg
            )));
        }

        if self.hands.active().is_empty() {
            return Err(config_err("at least one of hands.left / hands.right must be active"));
        }
        if self.robot.url.is_empty() {
            return Err(config_err("robot.url must not be empty"));
        }
        self.pose_source.bind_addr()?;
        if self.pose_source.stale_after_ms == 0 {
            return Err(config_err("pose_source.stale_after_ms must be positive"));
        }
        if self.calibration.settle_ms == 0 {
            return Err(config_err("calibration.settle_ms must be positive"));
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> TeleopError {
    TeleopError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TeleopConfig::default();
        cfg.validate().unwrap();
        assert!((cfg.tick_period().as_secs_f32() - 1.0 / 30.0).abs() < 1e-6);
        assert_eq!(cfg.hands.active(), vec![Hand::Left, Hand::Right]);
        assert_eq!(cfg.workspace.resolved(), Workspace::relative_default());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: TeleopConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, TeleopConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: TeleopConfig = toml::from_str(
            r#"
            [motion]
            motion_scale = 2.0
            frame_remap = "identity"

            [workspace]
            frame = "absolute"

            [gripper]
            input = "grip"
            "#,
        )
        .unwrap();
        assert!((cfg.motion.motion_scale - 2.0).abs() < 1e-6);
        assert!((cfg.motion.smoothing_factor - 0.3).abs() < 1e-6);
        assert_eq!(cfg.motion.frame_remap, AxisRemap::Identity);
        assert_eq!(cfg.workspace.resolved(), Workspace::absolute_default());
        assert_eq!(cfg.gripper.input, GripInputKind::Grip);
        cfg.validate().unwrap();
    }

    #[test]
    fn explicit_bounds_win_over_frame_default() {
        let cfg: TeleopConfig = toml::from_str(
            r#"
            [workspace.bounds]
            x_min = -0.1
            x_max = 0.1
            y_min = -0.1
            y_max = 0.1
            z_min = -0.1
            z_max = 0.1
            "#,
        )
        .unwrap();
        assert!((cfg.workspace.resolved().x_max - 0.1).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let cases: Vec<Box<dyn Fn(&mut TeleopConfig)>> = vec![
            Box::new(|c| c.motion.motion_scale = 0.0),
            Box::new(|c| c.motion.motion_scale = 5.5),
            Box::new(|c| c.motion.smoothing_factor = 1.0),
            Box::new(|c| c.motion.max_velocity = -1.0),
            Box::new(|c| c.control.tick_rate_hz = 0.0),
            Box::new(|c| c.control.dispatch_timeout_ms = 40),
            Box::new(|c| c.gripper.pinch_open_threshold = 0.0),
            Box::new(|c| c.head.head_pitch_min_deg = 50.0),
            Box::new(|c| {
                c.hands.left = false;
                c.hands.right = false;
            }),
            Box::new(|c| c.pose_source.bind = "not-an-addr".to_string()),
            Box::new(|c| {
                c.workspace.bounds = Some(Workspace {
                    x_min: 1.0,
                    ..Workspace::relative_default()
                })
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut cfg = TeleopConfig::default();
            mutate(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(TeleopError::Config(_))),
                "case {i} should be rejected"
            );
        }
    }

    #[test]
    fn link_config_follows_heartbeat() {
        let cfg = TeleopConfig::default();
        let link = cfg.robot.link_config(&cfg.control);
        assert_eq!(link.url, "ws://10.192.1.2:5000");
        assert_eq!(link.stale_after, Duration::from_millis(1000));
        assert_eq!(link.gripper_force, 300);
    }

    #[test]
    fn single_active_hand() {
        let hands = HandsConfig {
            left: false,
            right: true,
        };
        assert_eq!(hands.active(), vec![Hand::Right]);
        assert!(!hands.is_active(Hand::Left));
    }
}
