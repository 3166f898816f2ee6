use std::time::Duration;

/// Linear 0..1 envelope used to fade forces in and out.
///
/// The value moves toward its target at `1 / rise_time` per second and
/// never overshoots. A ramp that has not been started reads 0.
#[derive(Debug, Clone, Copy)]
pub struct Ramp {
    rise_time: f64,
    started: bool,
    stopping: bool,
    value: f64,
    target: f64,
    last: Duration,
}

impl Default for Ramp {
    fn default() -> Self {
        Self::new()
    }
}

impl Ramp {
    pub const fn new() -> Self {
        Self {
            rise_time: 0.0,
            started: false,
            stopping: false,
            value: 0.0,
            target: 0.0,
            last: Duration::ZERO,
        }
    }

    /// Activates the ramp at full value.
    pub fn start(&mut self, now: Duration, rise_time: f64) {
        self.rise_time = rise_time.max(0.0);
        self.started = true;
        self.stopping = false;
        self.value = 1.0;
        self.target = 1.0;
        self.last = now;
    }

    /// Ramps to zero, then deactivates.
    pub fn stop(&mut self, now: Duration) {
        self.down(now);
        self.stopping = true;
        self.settle();
    }

    pub fn up(&mut self, now: Duration) {
        self.advance(now);
        self.stopping = false;
        self.target = 1.0;
        self.settle();
    }

    pub fn down(&mut self, now: Duration) {
        self.advance(now);
        self.target = 0.0;
        self.settle();
    }

    pub fn one(&mut self) {
        self.value = 1.0;
        self.target = 1.0;
    }

    pub fn zero(&mut self) {
        self.value = 0.0;
        self.target = 0.0;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn current_value(&mut self, now: Duration) -> f64 {
        if !self.started {
            return 0.0;
        }
        self.advance(now);
        if self.stopping && self.value == 0.0 {
            self.started = false;
            self.stopping = false;
        }
        self.value
    }

    fn advance(&mut self, now: Duration) {
        let dt = now.saturating_sub(self.last).as_secs_f64();
        self.last = now;
        if !self.started || self.value == self.target {
            return;
        }
        if self.rise_time == 0.0 {
            self.value = self.target;
            return;
        }
        let step = dt / self.rise_time;
        self.value = if self.target > self.value {
            (self.value + step).min(self.target)
        } else {
            (self.value - step).max(self.target)
        };
    }

    // Zero rise time jumps straight to the target.
    fn settle(&mut self) {
        if self.started && self.rise_time == 0.0 {
            self.value = self.target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn unstarted_ramp_reads_zero() {
        let mut r = Ramp::new();
        r.one();
        assert_eq!(r.current_value(ms(10)), 0.0);
    }

    #[test]
    fn rises_and_falls_linearly() {
        let mut r = Ramp::new();
        r.start(ms(0), 0.1);
        r.zero();
        assert_eq!(r.current_value(ms(0)), 0.0);

        r.up(ms(0));
        let half = r.current_value(ms(50));
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(r.current_value(ms(100)), 1.0);
        assert_eq!(r.current_value(ms(500)), 1.0);

        r.down(ms(500));
        assert!((r.current_value(ms(525)) - 0.75).abs() < 1e-9);
        assert_eq!(r.current_value(ms(700)), 0.0);
        assert!(r.is_started());
    }

    #[test]
    fn zero_rise_time_is_immediate() {
        let mut r = Ramp::new();
        r.start(ms(0), 0.0);
        r.zero();
        r.up(ms(1));
        assert_eq!(r.current_value(ms(1)), 1.0);
        r.down(ms(2));
        assert_eq!(r.current_value(ms(2)), 0.0);
    }

    #[test]
    fn stop_deactivates_once_at_zero() {
        let mut r = Ramp::new();
        r.start(ms(0), 0.05);
        r.stop(ms(0));
        assert!(r.current_value(ms(20)) > 0.0);
        assert!(r.is_started());
        assert_eq!(r.current_value(ms(60)), 0.0);
        assert!(!r.is_started());
    }

    #[test]
    fn up_cancels_a_pending_stop() {
        let mut r = Ramp::new();
        r.start(ms(0), 0.05);
        r.stop(ms(0));
        r.current_value(ms(25));
        r.up(ms(25));
        assert_eq!(r.current_value(ms(100)), 1.0);
        assert!(r.is_started());
    }
}
