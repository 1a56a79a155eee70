//! `teleop-middleware` – transports and plumbing.
//!
//! Moves data between the headset, the operator, the control loop and the
//! robot controller without interpreting it.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus on Tokio broadcast
//!   channels (operator signals, telemetry, alerts).
//! - [`slot`] – lock-free latest-value handoff for tracking samples.
//! - [`pose_source`] – [`PoseSource`][pose_source::PoseSource], the read side
//!   the control loop polls, and its writer [`PoseFeed`][pose_source::PoseFeed].
//! - [`pose_ingest`] – WebSocket server that accepts tracking frames and
//!   operator signals from the headset.
//! - [`ws_session`] – [`RobotSession`][teleop_hal::RobotSession] over the
//!   robot controller's WebSocket JSON API.

pub mod bus;
pub mod pose_ingest;
pub mod pose_source;
pub mod slot;
pub mod ws_session;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use pose_ingest::PoseIngestServer;
pub use pose_source::{ConnectionState, PoseFeed, PoseSource, SlotPoseSource, pose_channel};
pub use slot::SampleSlot;
pub use ws_session::{RobotLinkConfig, WebSocketRobotSession};
