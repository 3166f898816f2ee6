use std::time::Duration;

/// Elapsed-time accumulator with reset-and-read semantics.
///
/// Stores the clock reading of its last reset; every read takes `now`
/// explicitly so the same tick sees one consistent time.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    name: &'static str,
    since: Duration,
}

impl Timer {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            since: Duration::ZERO,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn reset(&mut self, now: Duration) {
        self.since = now;
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.since)
    }

    pub fn elapsed_secs(&self, now: Duration) -> f64 {
        self.elapsed(now).as_secs_f64()
    }

    /// True once at least `secs` have passed since the last reset.
    /// Zero and negative limits expire immediately.
    pub fn expired_secs(&self, now: Duration, secs: f64) -> bool {
        self.elapsed_secs(now) >= secs
    }
}
