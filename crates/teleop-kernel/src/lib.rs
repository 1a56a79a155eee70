//! `teleop-kernel` – Safety layer
//!
//! Nothing in here decides *what* the robot should do; it only decides what
//! it is *allowed* to do.
//!
//! # Modules
//!
//! - [`workspace`] – [`WorkspaceClamp`][workspace::WorkspaceClamp]: the
//!   unconditional per-axis position clamp, with a violation counter.
//! - [`estop`] – [`EmergencyStopLatch`][estop::EmergencyStopLatch]: an
//!   idempotent, awaitable stop latch shared by every task.
//! - [`command_gate`] – [`CommandGate`][command_gate::CommandGate]: the single
//!   interception point every [`Command`][teleop_types::Command] passes
//!   before it reaches the robot session.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: heartbeat deadlines for
//!   the robot session and the pose source.

pub mod command_gate;
pub mod estop;
pub mod watchdog;
pub mod workspace;

pub use command_gate::{
    CommandGate, CommandRule, FiniteCommandRule, GripperRangeRule, HeadPitchRule, WorkspaceRule,
};
pub use estop::EmergencyStopLatch;
pub use watchdog::{Component, ComponentHealth, Watchdog};
pub use workspace::{Workspace, WorkspaceClamp, WorkspaceFrame};
