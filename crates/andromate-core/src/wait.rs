//! Fixed-cadence polling.
//!
//! Every "wait for" operation in the crate goes through [`Poll::until`]: check
//! a condition, and if it does not hold yet sleep one interval and check
//! again, giving up once the deadline `start + timeout` has passed.
//!
//! The clock and the sleep function are passed in so callers can route them
//! through the device channel (and tests can drive a virtual clock instead of
//! sleeping).

use std::time::{Duration, Instant};

use tracing::trace;

/// Polling cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    /// Time between two checks.
    pub interval: Duration,
    /// Total waiting budget.
    pub timeout: Duration,
}

impl Poll {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// A poll that checks once per second for `secs` seconds.
    pub fn seconds(secs: u64) -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(secs))
    }

    /// Checks `condition` until it returns `true` or the deadline passes.
    ///
    /// The condition is checked immediately, then again after each interval.
    /// Time spent inside `condition` counts toward the timeout, and the last
    /// sleep is cut short so the final check lands on the deadline. With
    /// instant checks a timeout of `n` intervals gives at most `n + 1` checks.
    pub fn until<N, S, F>(&self, mut now: N, mut sleep: S, mut condition: F) -> bool
    where
        N: FnMut() -> Instant,
        S: FnMut(Duration),
        F: FnMut() -> bool,
    {
        let started = now();
        let deadline = started + self.timeout;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if condition() {
                trace!(attempt, elapsed_ms = (now() - started).as_millis() as u64, "condition met");
                return true;
            }
            let current = now();
            if current >= deadline || self.interval.is_zero() {
                trace!(attempt, elapsed_ms = (current - started).as_millis() as u64, "poll timed out");
                return false;
            }
            sleep(self.interval.min(deadline - current));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// A clock that only moves when told to.
    struct VirtualClock {
        epoch: Instant,
        offset: Cell<Duration>,
    }

    impl VirtualClock {
        fn new() -> Self {
            Self {
                epoch: Instant::now(),
                offset: Cell::new(Duration::ZERO),
            }
        }

        fn now(&self) -> Instant {
            self.epoch + self.offset.get()
        }

        fn advance(&self, by: Duration) {
            self.offset.set(self.offset.get() + by);
        }

        fn elapsed(&self) -> Duration {
            self.offset.get()
        }
    }

    #[test]
    fn test_condition_met_after_two_intervals() {
        let clock = VirtualClock::new();
        let poll = Poll::seconds(5);
        let mut checks = 0;
        let mut slept = Vec::new();

        let met = poll.until(
            || clock.now(),
            |d| {
                slept.push(d);
                clock.advance(d);
            },
            || {
                checks += 1;
                checks > 2
            },
        );

        assert!(met);
        assert_eq!(checks, 3);
        assert_eq!(slept, vec![Duration::from_secs(1); 2]);
    }

    #[test]
    fn test_always_false_times_out() {
        let clock = VirtualClock::new();
        let poll = Poll::seconds(1);
        let mut checks = 0;

        let met = poll.until(
            || clock.now(),
            |d| clock.advance(d),
            || {
                checks += 1;
                false
            },
        );

        assert!(!met);
        assert_eq!(checks, 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_immediate_success_never_sleeps() {
        let clock = VirtualClock::new();
        let poll = Poll::seconds(10);
        let mut sleeps = 0;
        assert!(poll.until(|| clock.now(), |_| sleeps += 1, || true));
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn test_zero_timeout_checks_once() {
        let clock = VirtualClock::new();
        let poll = Poll::seconds(0);
        let mut checks = 0;
        let met = poll.until(|| clock.now(), |d| clock.advance(d), || {
            checks += 1;
            false
        });
        assert!(!met);
        assert_eq!(checks, 1);
    }

    #[test]
    fn test_zero_interval_does_not_spin() {
        let clock = VirtualClock::new();
        let poll = Poll::new(Duration::ZERO, Duration::from_secs(5));
        let mut checks = 0;
        let met = poll.until(|| clock.now(), |d| clock.advance(d), || {
            checks += 1;
            false
        });
        assert!(!met);
        assert_eq!(checks, 1);
    }

    #[test]
    fn test_sub_second_cadence() {
        let clock = VirtualClock::new();
        let poll = Poll::new(Duration::from_millis(250), Duration::from_secs(1));
        let mut checks = 0;
        let met = poll.until(|| clock.now(), |d| clock.advance(d), || {
            checks += 1;
            false
        });
        assert!(!met);
        assert_eq!(checks, 5);
    }

    #[test]
    fn test_last_sleep_is_cut_to_deadline() {
        let clock = VirtualClock::new();
        let poll = Poll::new(Duration::from_millis(300), Duration::from_millis(500));
        let mut slept = Vec::new();
        let met = poll.until(
            || clock.now(),
            |d| {
                slept.push(d);
                clock.advance(d);
            },
            || false,
        );
        assert!(!met);
        assert_eq!(slept, vec![Duration::from_millis(300), Duration::from_millis(200)]);
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn test_slow_condition_counts_toward_timeout() {
        let clock = VirtualClock::new();
        let poll = Poll::new(Duration::from_millis(100), Duration::from_millis(500));
        let mut checks = 0;
        let met = poll.until(
            || clock.now(),
            |d| clock.advance(d),
            || {
                checks += 1;
                clock.advance(Duration::from_millis(300));
                false
            },
        );
        assert!(!met);
        // 0..300 first check, 300..400 sleep, 400..700 second check.
        assert_eq!(checks, 2);
        assert_eq!(clock.elapsed(), Duration::from_millis(700));
    }
}
