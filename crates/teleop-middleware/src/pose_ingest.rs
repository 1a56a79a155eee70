//! WebSocket pose ingress.
//!
//! The headset app connects to [`PoseIngestServer`] and streams JSON frames,
//! one per tracking update.  Each pose frame is decoded into device-frame
//! [`HandSample`]s and pushed into the [`PoseFeed`]; nothing is queued.
//!
//! # Frame format
//!
//! ```text
//! {
//!   "head":  { "position": [x, y, z], "orientation": [x, y, z, w] },
//!   "left":  { "position": [...], "orientation": [...], "pinch": 0.05, "valid": true },
//!   "right": { "position": [...], "orientation": [...], "grip": true }
//! }
//! ```
//!
//! A hand with no pose, or with `"valid": false`, is recorded as lost.
//! The app may also send operator signals:
//! `{"event": "emergency_stop"}` and `{"event": "recalibrate"}`.  These are
//! published on [`Topic::OperatorSignals`].
//!
//! Only one tracking client is served at a time.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use teleop_hal::GripInputKind;
use teleop_types::{
    Event, EventPayload, GripInput, HandSample, Pose, Quaternion, TeleopError, Vec3,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::pose_source::PoseFeed;

const SOURCE: &str = "teleop-middleware::pose_ingest";

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WirePose {
    position: [f32; 3],
    orientation: [f32; 4],
}

impl WirePose {
    fn to_pose(&self) -> Pose {
        Pose::new(
            Vec3::from_array(self.position),
            Quaternion::from_xyzw(self.orientation),
        )
    }
}

fn default_valid() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireHand {
    position: Option<[f32; 3]>,
    orientation: Option<[f32; 4]>,
    pinch: Option<f32>,
    grip: Option<bool>,
    squeeze: Option<f32>,
    #[serde(default = "default_valid")]
    valid: bool,
}

impl WireHand {
    fn to_sample(&self, grip_kind: GripInputKind) -> HandSample {
        let (Some(position), Some(orientation)) = (self.position, self.orientation) else {
            return HandSample::lost();
        };
        let grip = match grip_kind {
            GripInputKind::Pinch => self.pinch.map(GripInput::Pinch),
            GripInputKind::Grip => self.grip.map(GripInput::Grip),
            GripInputKind::Squeeze => self.squeeze.map(GripInput::Squeeze),
        };
        HandSample {
            pose: Pose::new(
                Vec3::from_array(position),
                Quaternion::from_xyzw(orientation),
            ),
            grip,
            valid: self.valid,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    head: Option<WirePose>,
    #[serde(default)]
    left: Option<WireHand>,
    #[serde(default)]
    right: Option<WireHand>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireSignal {
    EmergencyStop,
    Recalibrate,
}

#[derive(Debug, Deserialize)]
struct WireSignalFrame {
    event: WireSignal,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestFrame {
    Pose {
        head: Option<Pose>,
        left: HandSample,
        right: HandSample,
    },
    Signal(SignalKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    EmergencyStop,
    Recalibrate,
}

/// Decode one text frame.
///
/// # Errors
///
/// [`TeleopError::Serialization`] for malformed JSON or an unknown signal.
pub fn decode_frame(text: &str, grip_kind: GripInputKind) -> Result<IngestFrame, TeleopError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("event").is_some() {
        let frame: WireSignalFrame = serde_json::from_value(value)?;
        let kind = match frame.event {
            WireSignal::EmergencyStop => SignalKind::EmergencyStop,
            WireSignal::Recalibrate => SignalKind::Recalibrate,
        };
        return Ok(IngestFrame::Signal(kind));
    }

    let frame: WireFrame = serde_json::from_value(value)?;
    let hand = |h: &Option<WireHand>| {
        h.as_ref()
            .map(|h| h.to_sample(grip_kind))
            .unwrap_or_else(HandSample::lost)
    };
    Ok(IngestFrame::Pose {
        head: frame.head.as_ref().map(WirePose::to_pose),
        left: hand(&frame.left),
        right: hand(&frame.right),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Server
// ────────────────────────────────────────────────────────────────────────────

/// WebSocket endpoint feeding tracking frames into a [`PoseFeed`].
#[derive(Clone)]
pub struct PoseIngestServer {
    feed: Arc<PoseFeed>,
    bus: EventBus,
    grip_kind: GripInputKind,
    busy: Arc<AtomicBool>,
    bad_frame_warnings: Arc<DefaultDirectRateLimiter>,
}

impl PoseIngestServer {
    pub fn new(feed: PoseFeed, bus: EventBus, grip_kind: GripInputKind) -> Self {
        Self {
            feed: Arc::new(feed),
            bus,
            grip_kind,
            busy: Arc::new(AtomicBool::new(false)),
            bad_frame_warnings: Arc::new(RateLimiter::direct(Quota::per_second(NonZeroU32::MIN))),
        }
    }

    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, TeleopError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| TeleopError::Config(format!("pose ingress bind error on {addr}: {e}")))
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn run(self, addr: SocketAddr) -> Result<(), TeleopError> {
        let listener = Self::bind(addr).await?;
        info!(%addr, "Pose ingress listening");
        self.serve(listener).await
    }

    /// Accept tracking clients on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), TeleopError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if self.busy.swap(true, Ordering::SeqCst) {
                        warn!(%peer, "Rejecting tracking client; another client is streaming");
                        drop(stream);
                        continue;
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream, peer).await {
                            error!(%peer, error = %e, "tracking client error");
                        }
                        server.feed.set_connected(false);
                        server.busy.store(false, Ordering::SeqCst);
                        info!(%peer, "Tracking client disconnected");
                    });
                }
                Err(e) => {
                    error!(error = %e, "pose ingress accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TeleopError> {
        let mut ws = accept_async(stream).await.map_err(|e| {
            TeleopError::Channel(format!("ws handshake from {peer}: {e}"))
        })?;
        info!(%peer, "Tracking client connected");
        self.feed.set_connected(true);

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(TeleopError::Channel(format!("ws read from {peer}: {e}")));
                }
            }
        }
        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match decode_frame(text, self.grip_kind) {
            Ok(IngestFrame::Pose { head, left, right }) => {
                self.feed.push(head, left, right);
            }
            Ok(IngestFrame::Signal(kind)) => {
                let payload = match kind {
                    SignalKind::EmergencyStop => EventPayload::EmergencyStop {
                        reason: "headset stop signal".to_string(),
                    },
                    SignalKind::Recalibrate => EventPayload::RecalibrateRequested,
                };
                debug!(?kind, "Operator signal from headset");
                let event = Event::new(SOURCE, payload);
                if let Err(e) = self.bus.publish_to(Topic::OperatorSignals, event) {
                    warn!(error = %e, "Operator signal had no listener");
                }
            }
            Err(e) => {
                if self.bad_frame_warnings.check().is_ok() {
                    warn!(error = %e, "Dropping malformed tracking frame");
                }
            }
        }
    }
}
