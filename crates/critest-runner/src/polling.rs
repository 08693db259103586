//! Polling assertions over values that change asynchronously.
//!
//! [`eventually`] samples a probe until a matcher holds; [`consistently`]
//! samples it for a whole window and requires the matcher to hold every
//! time. Both stop early and fail when the current spec deadline expires.

use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};

use critest_common::constants::{DEFAULT_EVENTUALLY_TIMEOUT, DEFAULT_POLL_INTERVAL};

use crate::assertion::{Matcher, failure_message};
use crate::deadline;
use crate::failure::fail;

/// A pending "sample until it matches" assertion.
pub struct Eventually<F> {
    probe: F,
    timeout: Duration,
    interval: Duration,
}

/// A pending "must keep matching" assertion.
pub struct Consistently<F> {
    probe: F,
    window: Duration,
    interval: Duration,
}

/// Samples `probe` until a matcher holds.
///
/// Defaults to a one minute timeout sampled every second.
pub fn eventually<T, F: FnMut() -> T>(probe: F) -> Eventually<F> {
    Eventually {
        probe,
        timeout: DEFAULT_EVENTUALLY_TIMEOUT,
        interval: DEFAULT_POLL_INTERVAL,
    }
}

/// Samples `probe` for a window, requiring a matcher to hold throughout.
pub fn consistently<T, F: FnMut() -> T>(probe: F) -> Consistently<F> {
    Consistently {
        probe,
        window: Duration::from_secs(2),
        interval: Duration::from_millis(250),
    }
}

impl<F> Eventually<F> {
    /// Sets the overall timeout.
    #[must_use]
    pub const fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sampling interval.
    #[must_use]
    pub const fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl<T: Debug, F: FnMut() -> T> Eventually<F> {
    /// Samples until `matcher` holds and returns the matching value.
    ///
    /// Fails the spec with the last sampled value on timeout.
    #[track_caller]
    pub fn should<M: Matcher<T>>(mut self, matcher: M) -> T {
        let limit = deadline::current().bound(self.timeout);
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            let value = (self.probe)();
            attempts += 1;
            if matcher.matches(&value) {
                return value;
            }
            let elapsed = start.elapsed();
            if elapsed >= limit || deadline::current().expired() {
                fail(format!(
                    "Timed out after {:.1}s ({attempts} attempts).\n{}",
                    elapsed.as_secs_f64(),
                    failure_message(&value, "to eventually", &matcher.describe()),
                ));
            }
            tracing::trace!(attempts, "condition not met yet");
            thread::sleep(self.interval.min(limit.saturating_sub(elapsed)));
        }
    }
}

impl<F> Consistently<F> {
    /// Sets the observation window.
    #[must_use]
    pub const fn during(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the sampling interval.
    #[must_use]
    pub const fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl<T: Debug, F: FnMut() -> T> Consistently<F> {
    /// Samples for the whole window; fails on the first value that does not match.
    ///
    /// A window cut short by the spec deadline or an interrupt fails too.
    #[track_caller]
    pub fn should<M: Matcher<T>>(mut self, matcher: M) {
        let window = self.window;
        let start = Instant::now();
        loop {
            let value = (self.probe)();
            if !matcher.matches(&value) {
                fail(format!(
                    "Failed after {:.1}s.\n{}",
                    start.elapsed().as_secs_f64(),
                    failure_message(&value, "to consistently", &matcher.describe()),
                ));
            }
            let elapsed = start.elapsed();
            if elapsed >= window {
                return;
            }
            let current = deadline::current();
            if current.expired() {
                fail(format!(
                    "Deadline reached after {:.1}s of a {:.1}s consistently window",
                    elapsed.as_secs_f64(),
                    window.as_secs_f64(),
                ));
            }
            let pause = self.interval.min(window.saturating_sub(elapsed));
            thread::sleep(current.bound(pause));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{be_true, equal};
    use crate::deadline::Deadline;
    use crate::failure::{Interruption, recover};

    #[test]
    fn eventually_returns_the_matching_value() {
        let mut n = 0;
        let got = eventually(|| {
            n += 1;
            n
        })
        .within(Duration::from_secs(5))
        .every(Duration::from_millis(1))
        .should(equal(3));
        assert_eq!(got, 3);
    }

    #[test]
    fn eventually_reports_the_last_value_on_timeout() {
        let err = recover(|| {
            let _ = eventually(|| "CONTAINER_CREATED")
                .within(Duration::from_millis(30))
                .every(Duration::from_millis(5))
                .should(equal("CONTAINER_RUNNING"));
        })
        .unwrap_err();
        match err {
            Interruption::Failed(message) => {
                assert!(message.starts_with("Timed out after"));
                assert!(message.contains("\"CONTAINER_CREATED\""));
                assert!(message.contains("to eventually equal \"CONTAINER_RUNNING\""));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn eventually_stops_at_the_spec_deadline() {
        let start = Instant::now();
        let result = deadline::scoped(Deadline::after(Duration::from_millis(20)), || {
            recover(|| {
                let _ = eventually(|| false)
                    .within(Duration::from_secs(30))
                    .every(Duration::from_millis(5))
                    .should(be_true());
            })
        });
        assert!(matches!(result, Err(Interruption::Failed(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn consistently_samples_the_whole_window() {
        let mut samples = 0;
        consistently(|| {
            samples += 1;
            true
        })
        .during(Duration::from_millis(30))
        .every(Duration::from_millis(5))
        .should(be_true());
        assert!(samples > 1);
    }

    #[test]
    fn consistently_fails_when_the_deadline_cuts_the_window() {
        let start = Instant::now();
        let mut samples = 0;
        let result = deadline::scoped(Deadline::after(Duration::from_millis(50)), || {
            recover(|| {
                consistently(|| {
                    samples += 1;
                    1
                })
                .during(Duration::from_secs(5))
                .every(Duration::from_millis(10))
                .should(equal(1));
            })
        });
        match result {
            Err(Interruption::Failed(message)) => {
                assert!(message.starts_with("Deadline reached after"));
                assert!(message.contains("of a 5.0s consistently window"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(samples > 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn consistently_fails_on_first_mismatch() {
        let mut n = 0;
        let err = recover(|| {
            consistently(|| {
                n += 1;
                n < 3
            })
            .during(Duration::from_secs(5))
            .every(Duration::from_millis(1))
            .should(be_true());
        })
        .unwrap_err();
        assert!(matches!(err, Interruption::Failed(m) if m.contains("to consistently be true")));
    }
}
