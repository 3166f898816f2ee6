use std::time::Duration;

/// Condition that must hold continuously for `hold` before it reports true.
///
/// Any update with the raw condition false restarts the hold period.
/// Success never resets it, so the result stays true for as long as the
/// raw condition keeps holding.
#[derive(Debug, Clone, Copy)]
pub struct DebouncedCondition {
    hold: Duration,
    since: Duration,
}

impl DebouncedCondition {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            since: Duration::ZERO,
        }
    }

    pub fn from_secs(hold: f64) -> Self {
        Self::new(Duration::from_secs_f64(hold.max(0.0)))
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn update(&mut self, now: Duration, raw: bool) -> bool {
        if !raw {
            self.since = now;
            return false;
        }
        now.saturating_sub(self.since) >= self.hold
    }

    pub fn reset(&mut self, now: Duration) {
        self.since = now;
    }

    /// How long the condition has held, as of the last violation.
    pub fn held_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.since)
    }
}
