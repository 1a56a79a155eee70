//! Single-slot latest-value handoff for tracking samples.
//!
//! The pose transport writes whenever a frame arrives; the control loop reads
//! once per tick.  Only the newest sample matters, so there is no queue: each
//! store replaces the previous value.  Both sides are lock-free
//! ([`arc_swap::ArcSwapOption`]), so a burst of tracking frames can never
//! delay the tick.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use teleop_types::Sample;

/// A sample plus the local instant it was stored.
#[derive(Debug, Clone)]
pub struct Received {
    pub sample: Sample,
    pub received_at: Instant,
}

/// Latest-value slot.  Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SampleSlot {
    inner: Arc<ArcSwapOption<Received>>,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current value.
    pub fn store(&self, sample: Sample) {
        self.inner.store(Some(Arc::new(Received {
            sample,
            received_at: Instant::now(),
        })));
    }

    /// Snapshot of the latest value, if any.
    pub fn load(&self) -> Option<Arc<Received>> {
        self.inner.load_full()
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }
}
