//! Headless, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message and a slow subscriber never blocks the publisher.  Pose
//! samples do **not** travel on the bus; they use the single-slot handoff in
//! [`crate::slot`].
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Loop state changes |
//! | [`Topic::OperatorSignals`] | Emergency stop, recalibrate, shutdown, status requests |
//! | [`Topic::SystemAlerts`] | Tracking dropouts, workspace clamps, session faults |

use teleop_types::{Event, TeleopError};
use tokio::sync::broadcast;

/// Default channel capacity (events buffered before slow subscribers lag).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    /// Commands from the operator to the control loop.
    OperatorSignals,
    SystemAlerts,
}

/// Shared event bus.  Clones share the same underlying channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    operator_signals: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (operator_signals, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            operator_signals,
            system_alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event.
    ///
    /// # Errors
    ///
    /// [`TeleopError::Channel`] when nobody is subscribed to the topic.
    /// Observability publishers usually ignore this; signal publishers
    /// should report it, since nobody heard them.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TeleopError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| TeleopError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::OperatorSignals => &self.operator_signals,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`].  Obtained via
/// [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Lagged(n)` means `n` events were dropped for this receiver; the
    /// caller decides whether to continue.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for draining inside a fixed-rate tick.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use teleop_types::EventPayload;

    fn signal() -> Event {
        Event::new("teleop-cli::console", EventPayload::RecalibrateRequested)
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = EventBus::default();
        assert!(matches!(
            bus.publish_to(Topic::OperatorSignals, signal()),
            Err(TeleopError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::OperatorSignals);
        let mut b = bus.subscribe_to(Topic::OperatorSignals);
        assert_eq!(bus.subscriber_count(Topic::OperatorSignals), 2);

        let event = signal();
        assert_eq!(bus.publish_to(Topic::OperatorSignals, event.clone())?, 2);

        assert_eq!(a.recv().await?.id, event.id);
        assert_eq!(b.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _signals = bus.subscribe_to(Topic::OperatorSignals);

        bus.publish_to(Topic::OperatorSignals, signal())?;

        let res = tokio::time::timeout(Duration::from_millis(30), alerts.recv()).await;
        assert!(res.is_err(), "SystemAlerts must not see operator signals");
        assert_eq!(alerts.topic(), Topic::SystemAlerts);
        Ok(())
    }

    #[test]
    fn try_recv_drains_then_reports_empty() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Telemetry);
        bus.publish_to(Topic::Telemetry, signal()).unwrap();
        bus.publish_to(Topic::Telemetry, signal()).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe_to(Topic::Telemetry);
        for _ in 0..32 {
            bus.publish_to(Topic::Telemetry, signal()).unwrap();
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
