//! `teleop-perception` – device-to-robot geometry.
//!
//! Turns raw tracking poses from the headset into smooth robot-frame targets.
//!
//! # Modules
//!
//! - [`transform`] – [`FrameTransform`][transform::FrameTransform]: fixed
//!   axis remap plus uniform motion scale between the device frame
//!   (x = right, y = up, z = back) and the robot frame (x = front, y = left,
//!   z = up).
//! - [`filter`] – [`MotionFilter`][filter::MotionFilter]: per-hand
//!   exponential smoothing with an optional per-tick velocity limit.

pub mod filter;
pub mod transform;
