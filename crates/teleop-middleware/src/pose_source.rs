//! Pose ingress seam.
//!
//! [`PoseSource`] is what the control loop reads: a non-blocking
//! "latest sample" accessor plus a connection flag used to gate calibration.
//! [`pose_channel`] builds the standard implementation: a [`PoseFeed`] for
//! the transport task (the single writer) and a [`SlotPoseSource`] for the
//! control loop (the single reader), joined by a [`SampleSlot`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use teleop_middleware::pose_source::{pose_channel, ConnectionState, PoseSource};
//! use teleop_types::{HandSample, Pose};
//!
//! let (feed, source) = pose_channel(Duration::from_millis(500));
//! assert_eq!(source.connection_state(), ConnectionState::Disconnected);
//!
//! feed.set_connected(true);
//! let seq = feed.push(None, HandSample::tracked(Pose::identity(), None), HandSample::lost());
//! assert_eq!(source.latest_sample().unwrap().seq, seq);
//! assert_eq!(source.connection_state(), ConnectionState::Connected);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use teleop_types::{HandSample, Pose, Sample};

use crate::slot::SampleSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Read side of the pose stream, polled by the control loop.
///
/// Both methods must return immediately.
pub trait PoseSource: Send + Sync {
    /// The most recent sample, or `None` before the first one.
    fn latest_sample(&self) -> Option<Sample>;

    fn connection_state(&self) -> ConnectionState;
}

/// Create a connected writer/reader pair.
///
/// The reader reports [`ConnectionState::Disconnected`] when the transport
/// says so, and also when no sample has arrived for `stale_after`.
pub fn pose_channel(stale_after: Duration) -> (PoseFeed, SlotPoseSource) {
    let slot = SampleSlot::new();
    let connected = Arc::new(AtomicBool::new(false));
    let feed = PoseFeed {
        slot: slot.clone(),
        connected: Arc::clone(&connected),
        seq: AtomicU64::new(0),
    };
    let source = SlotPoseSource {
        slot,
        connected,
        stale_after,
    };
    (feed, source)
}

// ────────────────────────────────────────────────────────────────────────────
// Writer
// ────────────────────────────────────────────────────────────────────────────

/// Write side of the pose stream.  Deliberately not `Clone`: there is one
/// writer per stream.
#[derive(Debug)]
pub struct PoseFeed {
    slot: SampleSlot,
    connected: Arc<AtomicBool>,
    seq: AtomicU64,
}

impl PoseFeed {
    /// Publish a new observation and return its sequence number.
    pub fn push(&self, head: Option<Pose>, left: HandSample, right: HandSample) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.slot.store(Sample {
            seq,
            captured_at: Utc::now(),
            head,
            left,
            right,
        });
        seq
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reader
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SlotPoseSource {
    slot: SampleSlot,
    connected: Arc<AtomicBool>,
    stale_after: Duration,
}

impl PoseSource for SlotPoseSource {
    fn latest_sample(&self) -> Option<Sample> {
        self.slot.load().map(|r| r.sample)
    }

    fn connection_state(&self) -> ConnectionState {
        if !self.connected.load(Ordering::SeqCst) {
            return ConnectionState::Disconnected;
        }
        match self.slot.load() {
            Some(r) if r.received_at.elapsed() <= self.stale_after => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let (feed, source) = pose_channel(Duration::from_secs(1));
        let a = feed.push(None, HandSample::lost(), HandSample::lost());
        let b = feed.push(None, HandSample::lost(), HandSample::lost());
        assert!(b > a);
        assert_eq!(source.latest_sample().unwrap().seq, b);
    }

    #[test]
    fn connected_flag_alone_is_not_enough() {
        let (feed, source) = pose_channel(Duration::from_secs(1));
        feed.set_connected(true);
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
        feed.push(None, HandSample::lost(), HandSample::lost());
        assert_eq!(source.connection_state(), ConnectionState::Connected);
        feed.set_connected(false);
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stale_stream_reports_disconnected() {
        let (feed, source) = pose_channel(Duration::from_millis(20));
        feed.set_connected(true);
        feed.push(None, HandSample::lost(), HandSample::lost());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
        // Last-known value is still readable.
        assert!(source.latest_sample().is_some());
    }
}
