use std::time::Duration;

/// Sleeps on the monotonic clock where the platform allows it.
pub fn high_precision_sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(not(target_os = "linux"))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC, EINTR};

    let mut req = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    let mut rem = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // Resume with the remainder when a signal interrupts the sleep.
    loop {
        let rc = unsafe { clock_nanosleep(CLOCK_MONOTONIC, 0, &req, &mut rem) };
        if rc != EINTR {
            break;
        }
        req = rem;
    }
}
