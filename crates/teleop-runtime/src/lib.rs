//! `teleop-runtime` – the control loop and everything it is configured with.
//!
//! # Modules
//!
//! - [`config`] – [`TeleopConfig`][config::TeleopConfig]: every tunable of a
//!   session, with defaults and validation.
//! - [`calibrator`] – [`Calibrator`][calibrator::Calibrator]: averages the
//!   operator's resting hand poses over a settle window into a
//!   [`CalibrationOrigin`][teleop_types::CalibrationOrigin].
//! - [`calibration_store`] – [`CalibrationStore`][calibration_store::CalibrationStore]:
//!   versioned on-disk record of the last good origin.
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   fixed-rate state machine driving the full pipeline from pose source to
//!   robot session.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.
//!
//! # Safety path
//!
//! Every [`Command`][teleop_types::Command] the loop produces passes the
//! workspace clamp and then [`CommandGate`] before it reaches the
//! [`RobotSession`][teleop_hal::RobotSession].  [`EmergencyStopLatch`] is
//! re-exported so binaries can wire stop sources without depending on
//! `teleop-kernel` directly.

pub mod calibration_store;
pub mod calibrator;
pub mod config;
pub mod control_loop;
pub mod telemetry;

pub use calibration_store::{CalibrationRecord, CalibrationStore};
pub use calibrator::{CalibrationCapture, Calibrator};
pub use config::TeleopConfig;
pub use control_loop::{ControlLoop, LoopSummary, offset_target, spawn_estop_relay};
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use teleop_kernel::{CommandGate, EmergencyStopLatch};
