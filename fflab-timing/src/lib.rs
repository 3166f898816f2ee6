pub mod clock;
pub mod debounce;
pub mod sleep;
pub mod stats;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use debounce::DebouncedCondition;
pub use sleep::high_precision_sleep;
pub use stats::{LoopMonitor, LoopStats, RunningStats};
pub use timer::Timer;
