use std::time::Duration;

/// Summary of a stream of loop timings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopStats {
    pub samples: u64,
    pub mean_ns: f64,
    pub jitter_ns: f64,
    pub min_ns: f64,
    pub max_ns: f64,
    pub effective_hz: f64,
}

/// Running mean/variance/min/max over `f64` samples (Welford).
///
/// Fixed size, so it can be fed from the control loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64) {
        self.n += 1;
        if self.n == 1 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            (self.m2 / self.n as f64).sqrt()
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// Tracks control-tick period and in-tick latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopMonitor {
    last_start: Option<Duration>,
    entered: Duration,
    period: RunningStats,
    latency: RunningStats,
}

impl LoopMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a tick and returns the period since the previous one.
    pub fn tick_start(&mut self, now: Duration) -> Duration {
        let period = match self.last_start {
            Some(prev) => now.saturating_sub(prev),
            None => Duration::ZERO,
        };
        if self.last_start.is_some() {
            self.period.push(period.as_nanos() as f64);
        }
        self.last_start = Some(now);
        self.entered = now;
        period
    }

    /// Marks the end of a tick and returns the time spent inside it.
    pub fn tick_end(&mut self, now: Duration) -> Duration {
        let latency = now.saturating_sub(self.entered);
        self.latency.push(latency.as_nanos() as f64);
        latency
    }

    pub fn period_stats(&self) -> LoopStats {
        summarize(&self.period)
    }

    pub fn latency_stats(&self) -> LoopStats {
        summarize(&self.latency)
    }
}

fn summarize(s: &RunningStats) -> LoopStats {
    if s.count() == 0 {
        return LoopStats::default();
    }
    let mean = s.mean();
    LoopStats {
        samples: s.count(),
        mean_ns: mean,
        jitter_ns: s.std_dev(),
        min_ns: s.min(),
        max_ns: s.max(),
        effective_hz: if mean > 0.0 { 1e9 / mean } else { 0.0 },
    }
}
