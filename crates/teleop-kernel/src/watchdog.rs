//! [`Watchdog`] – liveness deadlines for the robot link and the headset.
//!
//! Two heartbeats are tracked, each against its own deadline:
//!
//! | Component | Beat | Deadline | Missed |
//! |---|---|---|---|
//! | [`Component::RobotSession`] | every tick the session reports itself connected | `control.heartbeat_timeout_ms` | emergency stop |
//! | [`Component::PoseSource`] | every new tracking sample | `pose_source.stale_after_ms` | warning; the last command is held |
//!
//! The watchdog only measures silence.  What a missed deadline means is up to
//! the control loop.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// The two links whose silence the control loop cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// The robot controller connection.
    RobotSession,
    /// The headset tracking stream.
    PoseSource,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::RobotSession => f.write_str("robot_session"),
            Component::PoseSource => f.write_str("pose_source"),
        }
    }
}

/// Whether a link has been heard from within its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    TimedOut,
}

struct ComponentEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Last-heard times for the robot link and the pose stream.
///
/// Nothing is supervised until [`register`](Self::register) is called; the
/// control loop registers both links once initialization has confirmed arm
/// control, so the mode handshake is not subject to the deadlines.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use teleop_kernel::watchdog::{Component, ComponentHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register(Component::RobotSession, Duration::from_secs(1));
/// wd.heartbeat(Component::RobotSession);
///
/// assert_eq!(wd.health(Component::RobotSession), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<Component, ComponentEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start supervising `component`, counting it as just heard from.
    /// Registering again replaces the deadline.
    pub fn register(&mut self, component: Component, timeout: Duration) {
        self.components.insert(
            component,
            ComponentEntry {
                last_heartbeat: Instant::now(),
                timeout,
            },
        );
    }

    /// Record a sign of life.  Ignored for a link that is not registered.
    pub fn heartbeat(&mut self, component: Component) {
        if let Some(entry) = self.components.get_mut(&component) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// An unregistered link counts as [`ComponentHealth::TimedOut`].
    pub fn health(&self, component: Component) -> ComponentHealth {
        match self.components.get(&component) {
            Some(entry) if entry.last_heartbeat.elapsed() <= entry.timeout => {
                ComponentHealth::Healthy
            }
            _ => ComponentHealth::TimedOut,
        }
    }

    /// How long `component` has been silent, for the stop reason.
    pub fn silence(&self, component: Component) -> Option<Duration> {
        self.components
            .get(&component)
            .map(|entry| entry.last_heartbeat.elapsed())
    }

    /// Links past their deadline, in no particular order.
    pub fn check_all(&self) -> Vec<Component> {
        self.components
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > entry.timeout)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_component_is_healthy() {
        let mut wd = Watchdog::new();
        wd.register(Component::RobotSession, Duration::from_secs(5));
        assert_eq!(wd.health(Component::RobotSession), ComponentHealth::Healthy);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let mut wd = Watchdog::new();
        wd.register(Component::PoseSource, Duration::from_millis(40));
        thread::sleep(Duration::from_millis(25));
        wd.heartbeat(Component::PoseSource);
        thread::sleep(Duration::from_millis(25));
        assert_eq!(wd.health(Component::PoseSource), ComponentHealth::Healthy);
    }

    #[test]
    fn silent_component_times_out() {
        let mut wd = Watchdog::new();
        wd.register(Component::RobotSession, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.health(Component::RobotSession), ComponentHealth::TimedOut);
        assert!(wd.silence(Component::RobotSession).unwrap() >= Duration::from_millis(30));
    }

    #[test]
    fn only_the_silent_link_is_reported() {
        let mut wd = Watchdog::new();
        wd.register(Component::RobotSession, Duration::from_millis(20));
        wd.register(Component::PoseSource, Duration::from_secs(60));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.check_all(), vec![Component::RobotSession]);
    }

    #[test]
    fn unregistered_link_is_never_reported() {
        let mut wd = Watchdog::new();
        wd.heartbeat(Component::PoseSource);
        assert_eq!(wd.health(Component::PoseSource), ComponentHealth::TimedOut);
        assert!(wd.silence(Component::PoseSource).is_none());
        assert!(wd.check_all().is_empty());
    }

    #[test]
    fn reregistering_replaces_the_deadline() {
        let mut wd = Watchdog::new();
        wd.register(Component::RobotSession, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.health(Component::RobotSession), ComponentHealth::TimedOut);
        wd.register(Component::RobotSession, Duration::from_secs(60));
        assert_eq!(wd.health(Component::RobotSession), ComponentHealth::Healthy);
    }
}
