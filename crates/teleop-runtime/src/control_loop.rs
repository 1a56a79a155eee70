//! [`ControlLoop`] – the fixed-rate teleoperation state machine.
//!
//! ```text
//! Idle → Initializing → Calibrating ⇄ Running → Stopped
//!             │              │           │
//!             ▼              └─────┬─────┘
//!          Faulted                 ▼
//!                          EmergencyStopped
//! ```
//!
//! * **Initializing** drives the robot through Damping, Ready, Mode0 and
//!   Mode1.  Each step must be confirmed within `mode_timeout`; anything else
//!   is terminal (`Faulted`) and no pose command is ever sent.
//! * **Calibrating** waits for the pose stream, captures a
//!   [`CalibrationOrigin`] over the settle window and retries on failure.
//!   A persisted origin, if supplied, is used instead of a capture.
//! * **Running** executes one pipeline pass per tick:
//!
//!   1. drain operator signals, check the stop latch and the heartbeats,
//!   2. read the latest sample (no new sample: re-send the last command),
//!   3. per hand: frame transform, offset from the origin applied to the
//!      anchor, smoothing, workspace clamp,
//!   4. gripper and head mapping,
//!   5. command gate, then dispatch bounded by `dispatch_timeout`.
//!
//! The anchor is the robot-side zero point.  It starts at the identity pose
//! (relative workspace) or at the robot's reported end-effector poses
//! (absolute workspace), and becomes the last commanded pose on every
//! re-calibration, which is what keeps a re-calibration from moving the arm.
//!
//! The robot is always driven in its base frame.  The end-effector poses
//! reported at the first calibration are the base; in the relative workspace
//! every command is an offset that is applied to the base and bounded by the
//! base-frame box just before dispatch.
//!
//! Every wait in the loop is raced against the [`EmergencyStopLatch`], so a
//! stop is acted on within one tick whatever the state.  After the stop the
//! loop calls [`RobotSession::emergency_stop`] exactly once and sends nothing
//! else.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use teleop_hal::gripper::GRIPPER_OPEN;
use teleop_hal::{GripperMapper, GripperSmoother, HeadMapper, RobotSession};
use teleop_kernel::{
    CommandGate, Component, EmergencyStopLatch, Watchdog, Workspace, WorkspaceClamp,
    WorkspaceFrame,
};
use teleop_middleware::{ConnectionState, EventBus, PoseSource, Topic, TopicReceiver};
use teleop_perception::filter::MotionFilter;
use teleop_perception::transform::FrameTransform;
use teleop_types::{
    CalibrationOrigin, Command, Event, EventPayload, GripInput, Hand, LoopState, Pose, RobotMode,
    Sample, TeleopError,
};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::calibration_store::CalibrationStore;
use crate::calibrator::{CalibrationCapture, Calibrator};
use crate::config::TeleopConfig;

const SOURCE: &str = "teleop-runtime::control_loop";

/// Mode sequence that brings the robot into arm control.
pub const INIT_SEQUENCE: [RobotMode; 4] = [
    RobotMode::Damping,
    RobotMode::Ready,
    RobotMode::Mode0,
    RobotMode::Mode1,
];

/// Mode sequence for a graceful exit.
pub const SHUTDOWN_SEQUENCE: [RobotMode; 2] = [RobotMode::Mode2, RobotMode::Damping];

/// `SessionFault` code for a latched emergency stop.
pub const FAULT_EMERGENCY_STOP: u32 = 1;
/// `SessionFault` code for a failed initialization.
pub const FAULT_INITIALIZATION: u32 = 2;

// ────────────────────────────────────────────────────────────────────────────
// Summary
// ────────────────────────────────────────────────────────────────────────────

/// Counters reported when [`ControlLoop::run`] returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSummary {
    pub session_id: Uuid,
    pub final_state: LoopState,
    /// Set when the loop ended in `Faulted`.
    pub fault: Option<TeleopError>,
    /// Set when the loop ended in `EmergencyStopped`.
    pub stop_reason: Option<String>,
    pub ticks: u64,
    pub dispatched: u64,
    pub held_ticks: u64,
    pub tracking_dropouts: u64,
    pub dispatch_failures: u64,
    pub rejected_commands: u64,
    pub workspace_clamps: u64,
    pub calibrations: u64,
    pub calibration_failures: u64,
}

impl LoopSummary {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            final_state: LoopState::Idle,
            fault: None,
            stop_reason: None,
            ticks: 0,
            dispatched: 0,
            held_ticks: 0,
            tracking_dropouts: 0,
            dispatch_failures: 0,
            rejected_commands: 0,
            workspace_clamps: 0,
            calibrations: 0,
            calibration_failures: 0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry helper
// ────────────────────────────────────────────────────────────────────────────

/// `anchor ⊕ (current ⊖ origin)`.
///
/// The position offset is added to the anchor; the orientation offset is the
/// world-frame rotation `current · originᶜ` applied on top of the anchor.
pub fn offset_target(anchor: &Pose, origin: &Pose, current: &Pose) -> Pose {
    let position = anchor.position.add(current.position.sub(origin.position));
    let delta = current.orientation.mul(origin.orientation.conjugate());
    let orientation = delta
        .mul(anchor.orientation)
        .normalized()
        .unwrap_or(anchor.orientation);
    Pose::new(position, orientation)
}

// ────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ────────────────────────────────────────────────────────────────────────────

/// One teleoperation session.  Consumed by [`run`](Self::run).
pub struct ControlLoop {
    config: TeleopConfig,
    session: Arc<dyn RobotSession>,
    poses: Arc<dyn PoseSource>,
    bus: EventBus,
    signals: TopicReceiver,
    latch: EmergencyStopLatch,
    state: LoopState,
    mode: Option<RobotMode>,
    dt: f32,

    // ── pipeline ──────────────────────────────────────────────────────────
    transform: FrameTransform,
    calibrator: Calibrator,
    filters: [MotionFilter; 2],
    clamp: WorkspaceClamp,
    /// Bounds relative commands once they are applied to the base.
    base_clamp: Option<WorkspaceClamp>,
    gripper: GripperMapper,
    smoother: Option<GripperSmoother>,
    head: HeadMapper,
    gate: CommandGate,
    watchdog: Watchdog,

    // ── calibration ───────────────────────────────────────────────────────
    store: Option<CalibrationStore>,
    preloaded: Option<CalibrationOrigin>,
    capture: Option<CalibrationCapture>,
    retry_at: Option<Instant>,
    origin: Option<CalibrationOrigin>,
    base: Option<[Pose; 2]>,
    anchor: Option<[Pose; 2]>,

    // ── per-tick memory ───────────────────────────────────────────────────
    last_seq: Option<u64>,
    last_command: Option<Command>,
    held: [Pose; 2],
    tracking_ok: [bool; 2],
    was_clamped: [bool; 2],
    grippers: [u16; 2],
    head_pitch: f32,

    // ── operator requests ─────────────────────────────────────────────────
    recalibrate: bool,
    shutdown: bool,
    estop_sent: bool,
    pose_silence_warned: bool,
    status: DefaultDirectRateLimiter,
    summary: LoopSummary,
}

impl ControlLoop {
    /// Build a session from a validated configuration.
    ///
    /// The loop subscribes to [`Topic::OperatorSignals`] here, so signals
    /// published before [`run`](Self::run) starts are not lost.
    ///
    /// # Errors
    ///
    /// [`TeleopError::Config`] when `config` fails validation.
    pub fn new(
        config: &TeleopConfig,
        session: Arc<dyn RobotSession>,
        poses: Arc<dyn PoseSource>,
        bus: EventBus,
        latch: EmergencyStopLatch,
    ) -> Result<Self, TeleopError> {
        config.validate()?;

        let transform = FrameTransform::new(config.motion.frame_remap, config.motion.motion_scale)?;
        let workspace = config.workspace.resolved();
        let head = HeadMapper::from_degrees(config.head.head_pitch_min_deg, config.head.head_pitch_max_deg)?;
        let (head_min, head_max) = head.limits();
        let gripper = GripperMapper::new(
            config.gripper.input,
            config.gripper.pinch_closed_threshold,
            config.gripper.pinch_open_threshold,
        )?;

        let mut filter = MotionFilter::new(config.motion.smoothing_factor);
        if config.motion.enable_velocity_limit {
            filter = filter.with_velocity_limit(config.motion.max_velocity);
        }

        let base_clamp = match config.workspace.frame {
            WorkspaceFrame::Relative => Some(WorkspaceClamp::new(Workspace::absolute_default())),
            WorkspaceFrame::Absolute => None,
        };

        let status_rate = NonZeroU32::new(config.control.status_rate_hz).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            config: config.clone(),
            session,
            poses,
            signals: bus.subscribe_to(Topic::OperatorSignals),
            bus,
            gate: CommandGate::with_standard_rules(latch.clone(), workspace, head_min, head_max),
            latch,
            state: LoopState::Idle,
            mode: None,
            dt: config.tick_period().as_secs_f32(),
            transform,
            calibrator: Calibrator::new(transform, config.hands.active()),
            filters: [filter.clone(), filter],
            clamp: WorkspaceClamp::new(workspace),
            base_clamp,
            gripper,
            smoother: config
                .gripper
                .smoothing
                .then(|| GripperSmoother::new(config.motion.smoothing_factor)),
            head,
            watchdog: Watchdog::new(),
            store: None,
            preloaded: None,
            capture: None,
            retry_at: None,
            origin: None,
            base: None,
            anchor: None,
            last_seq: None,
            last_command: None,
            held: [Pose::identity(); 2],
            tracking_ok: [true; 2],
            was_clamped: [false; 2],
            grippers: [GRIPPER_OPEN; 2],
            head_pitch: head.map(0.0),
            recalibrate: false,
            shutdown: false,
            estop_sent: false,
            pose_silence_warned: false,
            status: RateLimiter::direct(Quota::per_second(status_rate)),
            summary: LoopSummary::new(),
        })
    }

    /// Persist every fresh calibration to `store`.
    pub fn with_calibration_store(mut self, store: CalibrationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `origin` for the first calibration instead of capturing one.
    pub fn with_origin(mut self, origin: CalibrationOrigin) -> Self {
        self.preloaded = Some(origin);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.summary.session_id
    }

    /// Run the session to a terminal state.
    pub async fn run(mut self) -> LoopSummary {
        let relay = spawn_estop_relay(&self.bus, self.latch.clone());
        let span = info_span!("control_loop", session = %self.summary.session_id);

        async {
            if let Err(e) = self.drive().await {
                if self.state == LoopState::Initializing {
                    self.fault(e).await;
                } else {
                    let reason = match e {
                        TeleopError::EmergencyStopped(reason) => reason,
                        other => other.to_string(),
                    };
                    self.emergency_stop(reason).await;
                }
            }
            self.summary.final_state = self.state;
            self.summary.workspace_clamps = self.clamp.clamp_count()
                + self.base_clamp.as_ref().map_or(0, WorkspaceClamp::clamp_count);
            info!(summary = ?self.summary, "Control loop finished");
        }
        .instrument(span)
        .await;

        relay.abort();
        self.summary
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State machine
    // ─────────────────────────────────────────────────────────────────────────

    async fn drive(&mut self) -> Result<(), TeleopError> {
        self.transition(LoopState::Initializing);
        self.initialize().await?;
        self.transition(LoopState::Calibrating);

        self.watchdog
            .register(Component::RobotSession, self.config.heartbeat_timeout());
        self.watchdog
            .register(Component::PoseSource, self.config.pose_stale_after());

        let mut ticker = tokio::time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.wait_tick(&mut ticker).await?;
            self.summary.ticks += 1;
            self.drain_signals();
            self.check_safety()?;

            if self.shutdown {
                return self.shutdown_gracefully().await;
            }
            match self.state {
                LoopState::Calibrating => self.calibration_tick().await?,
                LoopState::Running if self.recalibrate => self.begin_recalibration(),
                LoopState::Running => self.control_tick().await?,
                _ => return Ok(()),
            }
        }
    }

    async fn initialize(&mut self) -> Result<(), TeleopError> {
        if !self.session.is_connected() {
            return Err(TeleopError::RobotSessionUnavailable(
                "robot link is down".to_string(),
            ));
        }
        for mode in INIT_SEQUENCE {
            self.request_mode(mode).await?;
        }
        Ok(())
    }

    async fn shutdown_gracefully(&mut self) -> Result<(), TeleopError> {
        info!("Graceful shutdown requested");
        for mode in SHUTDOWN_SEQUENCE {
            self.request_mode(mode).await?;
        }
        self.transition(LoopState::Stopped);
        Ok(())
    }

    /// Ask for `mode` and wait for the confirmation, the timeout or the
    /// stop latch, whichever comes first.
    async fn request_mode(&mut self, mode: RobotMode) -> Result<(), TeleopError> {
        let timeout = self.config.mode_timeout();
        let session = Arc::clone(&self.session);
        let latch = self.latch.clone();

        info!(%mode, "Requesting robot mode");
        let outcome = tokio::select! {
            biased;
            _ = latch.triggered() => Err(self.stop_error()),
            res = tokio::time::timeout(timeout, session.set_mode(mode)) => match res {
                Ok(res) => res,
                Err(_) => Err(TeleopError::ModeTransitionTimeout {
                    mode,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        };
        outcome?;
        self.mode = Some(mode);
        info!(%mode, "Robot mode confirmed");
        Ok(())
    }

    async fn wait_tick(&self, ticker: &mut Interval) -> Result<(), TeleopError> {
        tokio::select! {
            biased;
            _ = self.latch.triggered() => Err(self.stop_error()),
            _ = ticker.tick() => Ok(()),
        }
    }

    fn stop_error(&self) -> TeleopError {
        TeleopError::EmergencyStopped(
            self.latch
                .reason()
                .unwrap_or_else(|| "emergency stop".to_string()),
        )
    }

    fn transition(&mut self, to: LoopState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "Control loop state change");
        let _ = self.bus.publish_to(
            Topic::Telemetry,
            Event::new(SOURCE, EventPayload::StateChanged { from, to }),
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signals and safety
    // ─────────────────────────────────────────────────────────────────────────

    fn drain_signals(&mut self) {
        loop {
            match self.signals.try_recv() {
                Ok(event) => match event.payload {
                    EventPayload::EmergencyStop { reason } => {
                        self.latch.trigger(reason);
                    }
                    EventPayload::RecalibrateRequested => {
                        if self.state == LoopState::Running {
                            info!(source = %event.source, "Re-calibration requested");
                            self.recalibrate = true;
                        } else {
                            debug!(state = %self.state, "re-calibration request ignored");
                        }
                    }
                    EventPayload::ShutdownRequested => self.shutdown = true,
                    EventPayload::StatusRequested => self.log_status(true),
                    _ => {}
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Operator signal receiver lagged");
                }
            }
        }
    }

    fn check_safety(&mut self) -> Result<(), TeleopError> {
        if self.latch.is_triggered() {
            return Err(self.stop_error());
        }
        if self.session.is_connected() {
            self.watchdog.heartbeat(Component::RobotSession);
        }
        for component in self.watchdog.check_all() {
            match component {
                Component::RobotSession => {
                    let silence = self.watchdog.silence(component).unwrap_or_default();
                    let reason = format!("robot heartbeat lost ({} ms)", silence.as_millis());
                    self.latch.trigger(reason.clone());
                    return Err(TeleopError::EmergencyStopped(reason));
                }
                Component::PoseSource => {
                    if !self.pose_silence_warned {
                        self.pose_silence_warned = true;
                        warn!("Pose stream silent; holding last command");
                    }
                }
            }
        }
        Ok(())
    }

    async fn emergency_stop(&mut self, reason: String) {
        self.latch.trigger(reason.clone());
        self.transition(LoopState::EmergencyStopped);
        self.send_emergency_stop().await;
        let _ = self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                SOURCE,
                EventPayload::SessionFault {
                    code: FAULT_EMERGENCY_STOP,
                    message: reason.clone(),
                },
            ),
        );
        self.summary.stop_reason = Some(reason);
    }

    async fn fault(&mut self, e: TeleopError) {
        error!(error = %e, "Session failed during initialization");
        self.transition(LoopState::Faulted);
        // The robot may be in any mode now; drop it to damping if possible.
        self.send_emergency_stop().await;
        let _ = self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                SOURCE,
                EventPayload::SessionFault {
                    code: FAULT_INITIALIZATION,
                    message: e.to_string(),
                },
            ),
        );
        self.summary.fault = Some(e);
    }

    async fn send_emergency_stop(&mut self) {
        if self.estop_sent {
            return;
        }
        self.estop_sent = true;
        let session = Arc::clone(&self.session);
        match tokio::time::timeout(self.config.mode_timeout(), session.emergency_stop()).await {
            Ok(Ok(())) => info!("Robot emergency stop sent"),
            Ok(Err(e)) => error!(error = %e, "Robot emergency stop failed"),
            Err(_) => error!("Robot emergency stop timed out"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calibration
    // ─────────────────────────────────────────────────────────────────────────

    fn begin_recalibration(&mut self) {
        self.recalibrate = false;
        self.capture = None;
        self.retry_at = None;
        self.transition(LoopState::Calibrating);
    }

    async fn calibration_tick(&mut self) -> Result<(), TeleopError> {
        if let Some(origin) = self.preloaded.take() {
            match self.calibrator.load_origin(origin) {
                Ok(origin) => return self.complete_calibration(origin, false).await,
                Err(e) => warn!(error = %e, "Persisted calibration unusable; capturing a fresh one"),
            }
        }

        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return Ok(());
            }
            self.retry_at = None;
        }

        if self.capture.is_none() {
            if self.poses.connection_state() != ConnectionState::Connected {
                if self.status.check().is_ok() {
                    info!("Waiting for pose stream before calibrating");
                }
                return Ok(());
            }
            info!("Hold still: capturing calibration origin");
            self.capture = Some(self.calibrator.begin_calibration(self.config.settle_duration()));
            return Ok(());
        }

        let sample = self.fresh_sample();
        let Some(capture) = self.capture.as_mut() else {
            return Ok(());
        };
        if let Some(sample) = sample {
            capture.observe(&sample);
        }
        if !capture.is_elapsed() {
            return Ok(());
        }

        let Some(capture) = self.capture.take() else {
            return Ok(());
        };
        match capture.finish() {
            Ok(origin) => self.complete_calibration(origin, true).await,
            Err(e) => {
                self.calibration_failed(e);
                Ok(())
            }
        }
    }

    fn calibration_failed(&mut self, e: TeleopError) {
        warn!(error = %e, "Calibration failed; retrying");
        self.summary.calibration_failures += 1;
        self.retry_at =
            Some(Instant::now() + Duration::from_millis(self.config.calibration.retry_delay_ms));
    }

    async fn complete_calibration(
        &mut self,
        origin: CalibrationOrigin,
        fresh: bool,
    ) -> Result<(), TeleopError> {
        let base = match self.base {
            Some(base) => base,
            None => match self.fetch_robot_base().await {
                Ok(base) => {
                    self.base = Some(base);
                    base
                }
                Err(e @ TeleopError::RobotSessionUnavailable(_)) => return Err(e),
                Err(e) => {
                    self.calibration_failed(e);
                    return Ok(());
                }
            },
        };
        let start = match self.config.workspace.frame {
            WorkspaceFrame::Relative => [Pose::identity(); 2],
            WorkspaceFrame::Absolute => base,
        };
        // Keep the arm where it is: the last command is the new zero point.
        let anchor = self
            .last_command
            .map(|c| [c.left, c.right])
            .unwrap_or(start);

        for hand in Hand::ALL {
            let i = hand.index();
            self.filters[i].reset(Some(anchor[i]));
            self.held[i] = anchor[i];
        }
        self.anchor = Some(anchor);
        self.origin = Some(origin);
        self.summary.calibrations += 1;

        if fresh
            && let Some(store) = &self.store
            && let Err(e) = store.save(&origin, &self.config.motion)
        {
            warn!(error = %e, "Could not persist calibration");
        }

        self.transition(LoopState::Running);
        Ok(())
    }

    /// The robot's current end-effector poses.  A timeout fails only this
    /// calibration attempt; a session that reports itself unavailable is
    /// passed through as fatal.
    async fn fetch_robot_base(&self) -> Result<[Pose; 2], TeleopError> {
        let session = Arc::clone(&self.session);
        let (left, right) = tokio::time::timeout(self.config.mode_timeout(), session.end_effector_poses())
            .await
            .map_err(|_| TeleopError::Channel("end-effector query timed out".to_string()))??;
        info!(left = ?left.position, right = ?right.position, "Robot base poses captured");
        Ok([left, right])
    }

    /// `command` as the robot takes it.  Relative offsets are applied to the
    /// base and bounded by the base-frame box; absolute commands pass as is.
    fn in_base_frame(&self, command: &Command) -> Command {
        let (Some(base), Some(clamp)) = (self.base, self.base_clamp.as_ref()) else {
            return *command;
        };
        let apply = |offset: &Pose, base: &Pose| {
            let position = base.position.add(offset.position);
            let orientation = offset
                .orientation
                .mul(base.orientation)
                .normalized()
                .unwrap_or(base.orientation);
            clamp.clamp(&Pose::new(position, orientation))
        };
        Command {
            left: apply(&command.left, &base[Hand::Left.index()]),
            right: apply(&command.right, &base[Hand::Right.index()]),
            ..*command
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Running
    // ─────────────────────────────────────────────────────────────────────────

    /// The latest sample, if it is newer than the last one consumed.
    fn fresh_sample(&mut self) -> Option<Sample> {
        let sample = self.poses.latest_sample()?;
        if self.last_seq == Some(sample.seq) {
            return None;
        }
        self.last_seq = Some(sample.seq);
        self.watchdog.heartbeat(Component::PoseSource);
        self.pose_silence_warned = false;
        Some(sample)
    }

    async fn control_tick(&mut self) -> Result<(), TeleopError> {
        let (Some(origin), Some(anchor)) = (self.origin, self.anchor) else {
            self.transition(LoopState::Calibrating);
            return Ok(());
        };
        let Some(sample) = self.fresh_sample() else {
            self.summary.held_ticks += 1;
            return match self.last_command {
                Some(command) => self.dispatch(command).await,
                None => Ok(()),
            };
        };

        let mut poses = anchor;
        for hand in Hand::ALL {
            let i = hand.index();
            let active = self.config.hands.is_active(hand);
            let target = if active {
                self.hand_target(hand, &sample, &origin.reference(hand), &anchor[i])
            } else {
                anchor[i]
            };
            let filtered = self.filters[i].update(target, self.dt);
            let (clamped, hit) = self.clamp.clamp_observed(&filtered);
            if hit && !self.was_clamped[i] {
                debug!(%hand, "workspace clamp engaged");
                let _ = self.bus.publish_to(
                    Topic::SystemAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::WorkspaceClamped {
                            hand,
                            total: self.clamp.clamp_count(),
                        },
                    ),
                );
            }
            self.was_clamped[i] = hit;
            poses[i] = clamped;

            if active {
                self.update_gripper(hand, sample.hand(hand).grip);
            }
        }
        self.update_head(sample.head);

        let command = Command {
            left: poses[Hand::Left.index()],
            right: poses[Hand::Right.index()],
            left_gripper: self.grippers[Hand::Left.index()],
            right_gripper: self.grippers[Hand::Right.index()],
            head_pitch_rad: self.head_pitch,
        };
        self.dispatch(command).await
    }

    /// Unfiltered robot-frame target for one active hand.  Invalid tracking
    /// holds the last valid target.
    fn hand_target(&mut self, hand: Hand, sample: &Sample, origin: &Pose, anchor: &Pose) -> Pose {
        let i = hand.index();
        match sample.hand(hand).usable_pose() {
            Ok(device) => {
                if !self.tracking_ok[i] {
                    info!(%hand, "Tracking recovered");
                    self.tracking_ok[i] = true;
                }
                let current = self.transform.to_robot(&device);
                let target = offset_target(anchor, origin, &current);
                self.held[i] = target;
                target
            }
            Err(e) => {
                if self.tracking_ok[i] {
                    self.tracking_ok[i] = false;
                    self.summary.tracking_dropouts += 1;
                    warn!(%hand, error = %e, "Tracking lost; holding last target");
                    let _ = self.bus.publish_to(
                        Topic::SystemAlerts,
                        Event::new(
                            SOURCE,
                            EventPayload::TrackingLost {
                                hand,
                                detail: e.to_string(),
                            },
                        ),
                    );
                }
                self.held[i]
            }
        }
    }

    fn update_gripper(&mut self, hand: Hand, grip: Option<GripInput>) {
        let Some(input) = grip else {
            return;
        };
        match self.gripper.map(input) {
            Ok(value) => {
                self.grippers[hand.index()] = match self.smoother.as_mut() {
                    Some(smoother) => smoother.smooth(hand, value),
                    None => value,
                };
            }
            Err(e) => debug!(%hand, error = %e, "gripper input ignored"),
        }
    }

    fn update_head(&mut self, head: Option<Pose>) {
        if !self.config.head.enabled {
            return;
        }
        if let Some(pose) = head.and_then(|p| p.validated().ok()) {
            let robot = self.transform.to_robot(&pose);
            self.head_pitch = self.head.map_orientation(robot.orientation);
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), TeleopError> {
        let mode = self.mode.unwrap_or(RobotMode::Damping);
        if let Err(e) = self.gate.authorize(mode, &command) {
            if matches!(e, TeleopError::EmergencyStopped(_)) {
                return Err(e);
            }
            self.summary.rejected_commands += 1;
            warn!(error = %e, "Command refused by gate");
            return Ok(());
        }

        let outgoing = self.in_base_frame(&command);
        let session = Arc::clone(&self.session);
        let timeout = self.config.dispatch_timeout();
        match tokio::time::timeout(timeout, session.send_command(&outgoing)).await {
            Ok(Ok(())) => self.summary.dispatched += 1,
            Ok(Err(e @ TeleopError::RobotSessionUnavailable(_))) => return Err(e),
            Ok(Err(e)) => {
                self.summary.dispatch_failures += 1;
                warn!(error = %e, "Command dispatch failed");
            }
            Err(_) => {
                self.summary.dispatch_failures += 1;
                warn!(timeout_ms = timeout.as_millis() as u64, "Command dispatch timed out");
            }
        }
        self.last_command = Some(command);
        self.log_status(false);
        Ok(())
    }

    fn log_status(&self, force: bool) {
        if !force && self.status.check().is_err() {
            return;
        }
        match &self.last_command {
            Some(c) => info!(
                state = %self.state,
                left = ?c.left.position.to_array(),
                right = ?c.right.position.to_array(),
                left_gripper = c.left_gripper,
                right_gripper = c.right_gripper,
                head_pitch_deg = c.head_pitch_rad.to_degrees(),
                "status"
            ),
            None => info!(state = %self.state, "status"),
        }
    }
}

/// Trip `latch` whenever an [`EventPayload::EmergencyStop`] appears on the
/// operator-signal topic, independently of the loop's own tick.
pub fn spawn_estop_relay(bus: &EventBus, latch: EmergencyStopLatch) -> JoinHandle<()> {
    let mut rx = bus.subscribe_to(Topic::OperatorSignals);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Event {
                    payload: EventPayload::EmergencyStop { reason },
                    ..
                }) => {
                    latch.trigger(reason);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Emergency stop relay lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
