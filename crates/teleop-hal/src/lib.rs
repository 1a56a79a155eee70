//! `teleop-hal` – the robot-facing edge of the pipeline.
//!
//! # Modules
//!
//! - [`gripper`] – [`GripperMapper`][gripper::GripperMapper]: pinch distance,
//!   grip button or trigger squeeze to a 0–1000 gripper value, plus optional
//!   smoothing.
//! - [`head`] – [`HeadMapper`][head::HeadMapper]: head orientation to a
//!   bounded pitch joint angle.
//! - [`session`] – [`RobotSession`][session::RobotSession]: the async seam
//!   every robot transport implements.
//! - [`sim`] – [`SimRobotSession`][sim::SimRobotSession]: an in-process robot
//!   that records everything it is asked to do.

pub mod gripper;
pub mod head;
pub mod session;
pub mod sim;

pub use gripper::{GripInputKind, GripperMapper, GripperSmoother};
pub use head::HeadMapper;
pub use session::RobotSession;
pub use sim::SimRobotSession;
