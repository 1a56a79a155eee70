//! WebSocket [`RobotSession`] adapter.
//!
//! The robot controller speaks JSON envelopes over a WebSocket:
//!
//! ```text
//! { "accid": "<robot id>", "title": "request_…", "timestamp": <ms>, "guid": "<hex>", "data": { … } }
//! ```
//!
//! Requests are titled `request_*`; the controller answers with the matching
//! `response_*` title and `data.result == "success"` on success.  The robot
//! id (`accid`) is learned from the first inbound frame that carries one.
//!
//! Only one reply per response title is awaited at a time.  A reply that
//! echoes a guid must echo the waiting request's guid.  Abandoned requests
//! (timed out or cancelled) leave nothing behind, so a late reply is dropped
//! instead of answering a newer request.
//!
//! | Operation | Request title | Data |
//! |---|---|---|
//! | mode Damping | `request_damping` | `{}` |
//! | mode Ready | `request_prepare` | `{}` |
//! | mode Mode0/1/2 | `request_set_ub_manip_mode` | `{"mode": 0/1/2}` |
//! | arm poses + head | `request_set_ub_manip_ee_pose` | positions, `[x,y,z,w]` quaternions |
//! | grippers | `request_set_claw_cmd` | opening, speed, force, mode per side |
//! | read end-effectors | `request_get_ub_manip_ee_pose` | `{}` |
//!
//! One writer task owns the socket's sink and also sends WebSocket pings; one
//! reader task routes responses to waiting callers.  Any inbound frame
//! (including pongs) counts as a sign of life for [`RobotSession::is_connected`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use teleop_hal::RobotSession;
use teleop_types::{Command, Pose, Quaternion, RobotMode, TeleopError, Vec3};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOUND_CAPACITY: usize = 64;
const ESTOP_SEND_GRACE: Duration = Duration::from_millis(100);

/// Claw control mode understood by the controller (position with force cap).
const CLAW_MODE: u8 = 3;

pub const TITLE_DAMPING: &str = "request_damping";
pub const TITLE_PREPARE: &str = "request_prepare";
pub const TITLE_MANIP_MODE: &str = "request_set_ub_manip_mode";
pub const TITLE_SET_EE_POSE: &str = "request_set_ub_manip_ee_pose";
pub const TITLE_CLAW: &str = "request_set_claw_cmd";
pub const TITLE_GET_EE_POSE: &str = "request_get_ub_manip_ee_pose";

/// Connection settings for the robot link.
#[derive(Debug, Clone)]
pub struct RobotLinkConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Bound on request/response round trips issued internally
    /// (end-effector queries).
    pub request_timeout: Duration,
    pub ping_interval: Duration,
    /// Silence longer than this makes `is_connected` report `false`.
    pub stale_after: Duration,
    pub gripper_speed: u16,
    pub gripper_force: u16,
}

impl Default for RobotLinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://10.192.1.2:5000".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_millis(250),
            stale_after: Duration::from_secs(1),
            gripper_speed: 500,
            gripper_force: 300,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frame codec
// ────────────────────────────────────────────────────────────────────────────

/// Request title and payload that asks the robot to enter `mode`.
pub fn mode_request(mode: RobotMode) -> (&'static str, Value) {
    match mode {
        RobotMode::Damping => (TITLE_DAMPING, json!({})),
        RobotMode::Ready => (TITLE_PREPARE, json!({})),
        RobotMode::Mode0 => (TITLE_MANIP_MODE, json!({ "mode": 0 })),
        RobotMode::Mode1 => (TITLE_MANIP_MODE, json!({ "mode": 1 })),
        RobotMode::Mode2 => (TITLE_MANIP_MODE, json!({ "mode": 2 })),
    }
}

/// Title the controller uses to answer `request_title`.
pub fn response_title(request_title: &str) -> String {
    match request_title.strip_prefix("request_") {
        Some(rest) => format!("response_{rest}"),
        None => request_title.to_string(),
    }
}

/// Fresh request id in the controller's format (32 hex digits).
pub fn new_guid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Wrap `data` in the controller's request envelope.
pub fn envelope(accid: Option<&str>, guid: &str, title: &str, data: Value) -> Value {
    json!({
        "accid": accid,
        "title": title,
        "timestamp": Utc::now().timestamp_millis(),
        "guid": guid,
        "data": data,
    })
}

/// Payload for `request_set_ub_manip_ee_pose`.
///
/// The head joint is driven through `head_quat`, a pure pitch rotation about
/// the robot's lateral axis.
pub fn pose_payload(command: &Command) -> Value {
    let head = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), command.head_pitch_rad);
    json!({
        "head_quat": head.to_xyzw(),
        "left_hand_pos": command.left.position.to_array(),
        "left_hand_quat": command.left.orientation.to_xyzw(),
        "right_hand_pos": command.right.position.to_array(),
        "right_hand_quat": command.right.orientation.to_xyzw(),
    })
}

/// Payload for `request_set_claw_cmd`.
pub fn claw_payload(command: &Command, speed: u16, force: u16) -> Value {
    json!({
        "left_opening": command.left_gripper,
        "left_speed": speed,
        "left_force": force,
        "left_mode": CLAW_MODE,
        "right_opening": command.right_gripper,
        "right_speed": speed,
        "right_force": force,
        "right_mode": CLAW_MODE,
    })
}

/// Fields of an inbound frame the adapter cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub accid: Option<String>,
    pub title: Option<String>,
    pub guid: Option<String>,
    pub data: Value,
}

pub fn decode_inbound(text: &str) -> Result<Inbound, TeleopError> {
    let value: Value = serde_json::from_str(text)?;
    Ok(Inbound {
        accid: value.get("accid").and_then(Value::as_str).map(str::to_string),
        title: value.get("title").and_then(Value::as_str).map(str::to_string),
        guid: value.get("guid").and_then(Value::as_str).map(str::to_string),
        data: value.get("data").cloned().unwrap_or(Value::Null),
    })
}

/// `Ok` when a response payload reports success; otherwise the reported
/// result string.
pub fn ack_result(data: &Value) -> Result<(), String> {
    match data.get("result").and_then(Value::as_str) {
        Some("success") => Ok(()),
        Some(other) => Err(other.to_string()),
        None => Err("response without result".to_string()),
    }
}

/// Parse a `response_get_ub_manip_ee_pose` payload into (left, right).
///
/// A refused query is [`TeleopError::CommandRejected`] and a malformed one
/// [`TeleopError::Serialization`]; neither says the link is gone.
pub fn parse_end_effectors(data: &Value) -> Result<(Pose, Pose), TeleopError> {
    ack_result(data).map_err(|detail| {
        TeleopError::CommandRejected(format!("end-effector query failed: {detail}"))
    })?;
    let side = |prefix: &str| -> Result<Pose, TeleopError> {
        let pos: [f32; 3] = serde_json::from_value(data[format!("{prefix}_hand_pos")].clone())?;
        let quat: [f32; 4] = serde_json::from_value(data[format!("{prefix}_hand_quat")].clone())?;
        Pose::new(Vec3::from_array(pos), Quaternion::from_xyzw(quat))
            .validated()
            .map_err(|e| TeleopError::Serialization(format!("{prefix} end-effector: {e}")))
    };
    Ok((side("left")?, side("right")?))
}

// ────────────────────────────────────────────────────────────────────────────
// Link state shared with the I/O tasks
// ────────────────────────────────────────────────────────────────────────────

/// A request waiting for its reply.
struct Waiter {
    guid: String,
    reply: oneshot::Sender<Value>,
}

struct LinkState {
    accid: OnceLock<String>,
    open: AtomicBool,
    last_heard: Mutex<Instant>,
    /// Keyed by response title.
    pending: Mutex<HashMap<String, Waiter>>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            accid: OnceLock::new(),
            open: AtomicBool::new(true),
            last_heard: Mutex::new(Instant::now()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn touch(&self) {
        *lock(&self.last_heard) = Instant::now();
    }

    fn silence(&self) -> Duration {
        lock(&self.last_heard).elapsed()
    }

    fn handle_text(&self, text: &str) {
        let inbound = match decode_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable robot frame");
                return;
            }
        };
        if let Some(accid) = inbound.accid
            && self.accid.set(accid.clone()).is_ok()
        {
            info!(%accid, "Robot link identified");
        }
        let Some(title) = inbound.title else {
            return;
        };
        if title.starts_with("response_") {
            let mut pending = lock(&self.pending);
            let matches = match (pending.get(&title), inbound.guid.as_deref()) {
                (Some(waiter), Some(guid)) => waiter.guid == guid,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                debug!(%title, guid = ?inbound.guid, "dropping unsolicited robot response");
                return;
            }
            if let Some(waiter) = pending.remove(&title) {
                let _ = waiter.reply.send(inbound.data);
            }
        } else {
            debug!(%title, "robot notification");
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with an error.
        lock(&self.pending).clear();
    }

    /// Wait for the reply to request `guid` titled `title`.  Replaces any
    /// earlier waiter for the same response title.
    fn expect_reply(&self, title: &str, guid: &str) -> (PendingReply<'_>, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let response = response_title(title);
        lock(&self.pending).insert(
            response.clone(),
            Waiter {
                guid: guid.to_string(),
                reply: tx,
            },
        );
        let guard = PendingReply {
            link: self,
            response,
            guid: guid.to_string(),
        };
        (guard, rx)
    }
}

/// Removes its waiter from the pending table when the request completes or
/// is dropped mid-flight.
struct PendingReply<'a> {
    link: &'a LinkState,
    response: String,
    guid: String,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.link.pending);
        if pending
            .get(&self.response)
            .is_some_and(|waiter| waiter.guid == self.guid)
        {
            pending.remove(&self.response);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// [`RobotSession`] over the controller's WebSocket API.
pub struct WebSocketRobotSession {
    config: RobotLinkConfig,
    outbound: mpsc::Sender<Message>,
    link: Arc<LinkState>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketRobotSession {
    /// Open the link and start the I/O tasks.
    ///
    /// # Errors
    ///
    /// [`TeleopError::RobotSessionUnavailable`] when the controller cannot be
    /// reached within `connect_timeout`.
    pub async fn connect(config: RobotLinkConfig) -> Result<Self, TeleopError> {
        let (ws, _) = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| {
                TeleopError::RobotSessionUnavailable(format!("connecting to {} timed out", config.url))
            })?
            .map_err(|e| TeleopError::RobotSessionUnavailable(format!("connecting to {}: {e}", config.url)))?;
        info!(url = %config.url, "Robot link open");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let link = Arc::new(LinkState::new());

        let writer = {
            let link = Arc::clone(&link);
            let mut ping = tokio::time::interval(config.ping_interval);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = rx.recv() => match msg {
                            Some(msg) => {
                                if let Err(e) = sink.send(msg).await {
                                    warn!(error = %e, "robot link write failed");
                                    break;
                                }
                            }
                            None => break,
                        },
                        _ = ping.tick() => {
                            if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                link.close();
                let _ = sink.close().await;
            })
        };

        let reader = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            link.touch();
                            link.handle_text(text.as_str());
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => link.touch(),
                        Err(e) => {
                            warn!(error = %e, "robot link read failed");
                            break;
                        }
                    }
                }
                warn!("Robot link closed");
                link.close();
            })
        };

        Ok(Self {
            config,
            outbound,
            link,
            tasks: vec![writer, reader],
        })
    }

    /// Robot id learned from the controller, once known.
    pub fn accid(&self) -> Option<&str> {
        self.link.accid.get().map(String::as_str)
    }

    fn frame(&self, guid: &str, title: &str, data: Value) -> Message {
        Message::Text(envelope(self.accid(), guid, title, data).to_string().into())
    }

    /// Queue a frame without waiting.
    fn enqueue(&self, title: &str, data: Value) -> Result<(), TeleopError> {
        self.outbound
            .try_send(self.frame(&new_guid(), title, data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TeleopError::Channel("robot outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    TeleopError::RobotSessionUnavailable("robot link closed".to_string())
                }
            })
    }

    /// Send a request and wait for its response payload.
    async fn request(&self, title: &str, data: Value) -> Result<Value, TeleopError> {
        let guid = new_guid();
        let (_pending, rx) = self.link.expect_reply(title, &guid);
        self.outbound
            .send(self.frame(&guid, title, data))
            .await
            .map_err(|_| TeleopError::RobotSessionUnavailable("robot link closed".to_string()))?;
        rx.await.map_err(|_| {
            TeleopError::RobotSessionUnavailable(format!("robot link closed awaiting {title}"))
        })
    }
}

impl Drop for WebSocketRobotSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl RobotSession for WebSocketRobotSession {
    async fn set_mode(&self, mode: RobotMode) -> Result<(), TeleopError> {
        let (title, data) = mode_request(mode);
        let reply = self.request(title, data).await?;
        ack_result(&reply).map_err(|detail| TeleopError::ModeRejected { mode, detail })
    }

    async fn send_command(&self, command: &Command) -> Result<(), TeleopError> {
        if !self.link.open.load(Ordering::SeqCst) {
            return Err(TeleopError::RobotSessionUnavailable(
                "robot link closed".to_string(),
            ));
        }
        self.enqueue(TITLE_SET_EE_POSE, pose_payload(command))?;
        self.enqueue(
            TITLE_CLAW,
            claw_payload(command, self.config.gripper_speed, self.config.gripper_force),
        )
    }

    async fn emergency_stop(&self) -> Result<(), TeleopError> {
        warn!("Sending damping request as emergency stop");
        let msg = self.frame(&new_guid(), TITLE_DAMPING, json!({}));
        match self.outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tokio::time::timeout(ESTOP_SEND_GRACE, self.outbound.send(msg))
                    .await
                    .map_err(|_| TeleopError::Channel("robot outbound queue stuck".to_string()))?
                    .map_err(|_| TeleopError::RobotSessionUnavailable("robot link closed".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TeleopError::RobotSessionUnavailable(
                "robot link closed".to_string(),
            )),
        }
    }

    async fn end_effector_poses(&self) -> Result<(Pose, Pose), TeleopError> {
        let reply = tokio::time::timeout(
            self.config.request_timeout,
            self.request(TITLE_GET_EE_POSE, json!({})),
        )
        .await
        .map_err(|_| TeleopError::Channel("end-effector query timed out".to_string()))??;
        parse_end_effectors(&reply)
    }

    fn is_connected(&self) -> bool {
        self.link.open.load(Ordering::SeqCst) && self.link.silence() <= self.config.stale_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn command() -> Command {
        Command {
            left: Pose::new(Vec3::new(0.1, 0.2, 0.3), Quaternion::identity()),
            right: Pose::new(Vec3::new(0.1, -0.2, 0.3), Quaternion::identity()),
            left_gripper: 250,
            right_gripper: 1000,
            head_pitch_rad: 0.0,
        }
    }

    #[test]
    fn mode_requests_match_controller_titles() {
        assert_eq!(mode_request(RobotMode::Damping).0, "request_damping");
        assert_eq!(mode_request(RobotMode::Ready).0, "request_prepare");
        let (title, data) = mode_request(RobotMode::Mode1);
        assert_eq!(title, "request_set_ub_manip_mode");
        assert_eq!(data["mode"], 1);
    }

    #[test]
    fn response_title_swaps_prefix() {
        assert_eq!(response_title("request_prepare"), "response_prepare");
        assert_eq!(
            response_title("request_set_ub_manip_mode"),
            "response_set_ub_manip_mode"
        );
    }

    #[test]
    fn envelope_carries_accid_and_guid() {
        let guid = new_guid();
        let env = envelope(Some("robot-1"), &guid, "request_damping", json!({}));
        assert_eq!(env["accid"], "robot-1");
        assert_eq!(env["title"], "request_damping");
        assert_eq!(env["guid"].as_str().unwrap(), guid);
        assert_eq!(guid.len(), 32);
        assert!(env["timestamp"].as_i64().unwrap() > 0);

        let anonymous = envelope(None, &new_guid(), "request_damping", json!({}));
        assert!(anonymous["accid"].is_null());
    }

    #[test]
    fn pose_payload_uses_xyzw_quaternions() {
        let payload = pose_payload(&command());
        assert_eq!(payload["left_hand_quat"], json!([0.0, 0.0, 0.0, 1.0]));
        let pos: [f32; 3] = serde_json::from_value(payload["right_hand_pos"].clone()).unwrap();
        assert!((pos[1] + 0.2).abs() < 1e-6);
        // Level head is the identity quaternion.
        assert_eq!(payload["head_quat"], json!([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn claw_payload_carries_both_sides() {
        let payload = claw_payload(&command(), 500, 300);
        assert_eq!(payload["left_opening"], 250);
        assert_eq!(payload["right_opening"], 1000);
        assert_eq!(payload["left_force"], 300);
        assert_eq!(payload["right_mode"], 3);
    }

    #[test]
    fn ack_result_reads_result_field() {
        assert!(ack_result(&json!({"result": "success"})).is_ok());
        assert_eq!(
            ack_result(&json!({"result": "busy"})).unwrap_err(),
            "busy".to_string()
        );
        assert!(ack_result(&json!({})).is_err());
    }

    #[test]
    fn end_effector_payload_parses_and_validates() {
        let data = json!({
            "result": "success",
            "left_hand_pos": [0.3, 0.2, 0.9],
            "left_hand_quat": [0.0, 0.0, 0.0, 1.0],
            "right_hand_pos": [0.3, -0.2, 0.9],
            "right_hand_quat": [0.0, 0.0, 0.0, 2.0],
        });
        let (left, right) = parse_end_effectors(&data).unwrap();
        assert!((left.position.y - 0.2).abs() < 1e-6);
        assert!((right.orientation.w - 1.0).abs() < 1e-6);

        let bad = json!({"result": "success", "left_hand_pos": [0.3, 0.2]});
        assert!(matches!(parse_end_effectors(&bad), Err(TeleopError::Serialization(_))));
        assert!(matches!(
            parse_end_effectors(&json!({"result": "failed"})),
            Err(TeleopError::CommandRejected(_))
        ));
    }

    #[test]
    fn decode_inbound_tolerates_missing_fields() {
        let inbound = decode_inbound(r#"{"accid": "r1"}"#).unwrap();
        assert_eq!(inbound.accid.as_deref(), Some("r1"));
        assert!(inbound.title.is_none());
        assert!(inbound.guid.is_none());
        assert!(inbound.data.is_null());
        assert!(decode_inbound("nope").is_err());
    }

    fn reply(title: &str, guid: Option<&str>, result: &str) -> String {
        json!({"accid": "robot-7", "title": title, "guid": guid, "data": {"result": result}})
            .to_string()
    }

    #[tokio::test]
    async fn abandoned_request_does_not_capture_a_late_reply() {
        let link = LinkState::new();
        {
            let (_pending, _rx) = link.expect_reply(TITLE_PREPARE, "old");
            // Dropped here, as when the caller's timeout fires.
        }
        assert!(lock(&link.pending).is_empty());

        let (_pending, mut rx) = link.expect_reply(TITLE_PREPARE, "new");
        link.handle_text(&reply("response_prepare", Some("old"), "failed"));
        assert!(rx.try_recv().is_err(), "stale reply was delivered");

        link.handle_text(&reply("response_prepare", Some("new"), "success"));
        let data = rx.await.unwrap();
        assert!(ack_result(&data).is_ok());
        assert!(lock(&link.pending).is_empty());
    }

    #[tokio::test]
    async fn reply_without_guid_goes_to_the_waiter() {
        let link = LinkState::new();
        let (_pending, rx) = link.expect_reply(TITLE_GET_EE_POSE, "abc");
        link.handle_text(&reply("response_get_ub_manip_ee_pose", None, "success"));
        assert!(ack_result(&rx.await.unwrap()).is_ok());

        // Nobody waiting: dropped.
        link.handle_text(&reply("response_get_ub_manip_ee_pose", None, "success"));
        assert!(lock(&link.pending).is_empty());
    }

    /// Minimal controller: greets with an accid, acks every request except
    /// manip mode 2, answers end-effector queries, and forwards every
    /// request it sees to the test.
    async fn fake_controller(
        listener: TcpListener,
        seen: mpsc::UnboundedSender<Value>,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let hello = json!({"accid": "robot-7", "title": "notify_connected", "data": {}});
        ws.send(Message::Text(hello.to_string().into())).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            let title = req["title"].as_str().unwrap_or_default().to_string();
            let mut data = json!({"result": "success"});
            if title == TITLE_MANIP_MODE && req["data"]["mode"] == 2 {
                data = json!({"result": "failed"});
            }
            if title == TITLE_GET_EE_POSE {
                data = json!({
                    "result": "success",
                    "left_hand_pos": [0.3, 0.2, 0.9],
                    "left_hand_quat": [0.0, 0.0, 0.0, 1.0],
                    "right_hand_pos": [0.3, -0.2, 0.9],
                    "right_hand_quat": [0.0, 0.0, 0.0, 1.0],
                });
            }
            let _ = seen.send(req.clone());
            let reply = json!({
                "accid": "robot-7",
                "title": response_title(&title),
                "guid": req["guid"],
                "data": data,
            });
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn talks_to_controller() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        tokio::spawn(fake_controller(listener, seen_tx));

        let session = WebSocketRobotSession::connect(RobotLinkConfig {
            url: format!("ws://{addr}"),
            ..RobotLinkConfig::default()
        })
        .await?;

        session.set_mode(RobotMode::Mode1).await?;
        assert_eq!(seen.recv().await.ok_or("no request")?["data"]["mode"], 1);
        assert_eq!(session.accid(), Some("robot-7"));
        assert!(session.is_connected());

        let err = session.set_mode(RobotMode::Mode2).await.unwrap_err();
        assert!(matches!(err, TeleopError::ModeRejected { mode: RobotMode::Mode2, .. }));
        seen.recv().await;

        let (left, _) = session.end_effector_poses().await?;
        assert!((left.position.z - 0.9).abs() < 1e-6);
        seen.recv().await;

        session.send_command(&command()).await?;
        let pose = seen.recv().await.ok_or("no pose frame")?;
        assert_eq!(pose["title"], TITLE_SET_EE_POSE);
        assert_eq!(pose["accid"], "robot-7");
        let claw = seen.recv().await.ok_or("no claw frame")?;
        assert_eq!(claw["title"], TITLE_CLAW);
        assert_eq!(claw["data"]["left_opening"], 250);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_controller_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let res = WebSocketRobotSession::connect(RobotLinkConfig {
            url: format!("ws://{addr}"),
            connect_timeout: Duration::from_millis(500),
            ..RobotLinkConfig::default()
        })
        .await;
        assert!(matches!(res, Err(TeleopError::RobotSessionUnavailable(_))));
    }
}
