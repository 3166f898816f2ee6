use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sleep::high_precision_sleep;

/// Monotonic time source shared by the control and idle loops.
///
/// Readings are offsets from the clock's own origin, so timers can store
/// them by value and compare without touching the clock again.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> Duration;

    fn elapsed(&self, since: Duration) -> Duration {
        self.now().saturating_sub(since)
    }

    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        high_precision_sleep(d)
    }
}

/// Clock that only moves when told to. Sleeping advances it instantly,
/// which lets the simulator run a session faster than real time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, t: Duration) {
        self.nanos.store(t.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, d: Duration) {
        self.advance(d)
    }
}
