//! [`EmergencyStopLatch`] – one-way stop flag shared across tasks.
//!
//! The latch can be tripped from anywhere (Ctrl-C handler, bus relay, the
//! control loop's own watchdog) and is cheap to poll from the hot path.
//! Tasks that are suspended (waiting for a mode acknowledgement, sleeping
//! through the calibration window, waiting for the next tick) race their
//! await against [`EmergencyStopLatch::triggered`] so the stop is honoured
//! within one tick whatever the loop is doing.
//!
//! Only the first [`trigger`](EmergencyStopLatch::trigger) has any effect.
//!
//! # Example
//!
//! ```
//! use teleop_kernel::estop::EmergencyStopLatch;
//!
//! let latch = EmergencyStopLatch::new();
//! assert!(latch.trigger("remote stop pressed"));
//! assert!(!latch.trigger("second press"));
//! assert_eq!(latch.reason().as_deref(), Some("remote stop pressed"));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct LatchInner {
    triggered: AtomicBool,
    reason: OnceLock<String>,
    notify: Notify,
}

/// Idempotent, awaitable emergency-stop flag.  Clones share the same latch.
#[derive(Debug, Clone, Default)]
pub struct EmergencyStopLatch {
    inner: Arc<LatchInner>,
}

impl EmergencyStopLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the latch.  Returns `true` only for the call that tripped it.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        // Reason is recorded before the flag so readers never see a tripped
        // latch without one.
        let _ = self.inner.reason.set(reason.clone());
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        warn!(reason = %reason, "Emergency stop latched");
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Reason given by the first trigger, if any.
    pub fn reason(&self) -> Option<String> {
        if self.is_triggered() {
            self.inner.reason.get().cloned()
        } else {
            None
        }
    }

    /// Resolve once the latch is tripped (immediately if it already is).
    pub async fn triggered(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_latch_is_clear() {
        let latch = EmergencyStopLatch::new();
        assert!(!latch.is_triggered());
        assert!(latch.reason().is_none());
    }

    #[test]
    fn only_first_trigger_counts() {
        let latch = EmergencyStopLatch::new();
        assert!(latch.trigger("first"));
        assert!(!latch.trigger("second"));
        assert!(!latch.trigger("third"));
        assert_eq!(latch.reason().as_deref(), Some("first"));
    }

    #[test]
    fn clones_share_state() {
        let latch = EmergencyStopLatch::new();
        let other = latch.clone();
        other.trigger("from clone");
        assert!(latch.is_triggered());
    }

    #[tokio::test]
    async fn triggered_resolves_immediately_when_tripped() {
        let latch = EmergencyStopLatch::new();
        latch.trigger("already");
        tokio::time::timeout(Duration::from_millis(50), latch.triggered())
            .await
            .expect("should resolve at once");
    }

    #[tokio::test]
    async fn triggered_wakes_waiting_task() {
        let latch = EmergencyStopLatch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.triggered().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.trigger("remote");
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn triggered_pending_while_clear() {
        let latch = EmergencyStopLatch::new();
        let res = tokio::time::timeout(Duration::from_millis(20), latch.triggered()).await;
        assert!(res.is_err());
    }
}
