mod units;

pub use units::*;

/// A source of monotonic nanosecond timestamps. Probe handlers read the clock
/// on entry and again on return, so both reads must come from the same clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Reads `CLOCK_MONOTONIC`, which is the clock behind `bpf_ktime_get_ns()`.
#[derive(Copy, Clone, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        // CLOCK_MONOTONIC is always available and `ts` is a valid pointer
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }

        ts.tv_sec as u64 * SECONDS + ts.tv_nsec as u64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
