//! Spec-level deadlines.
//!
//! The runner installs a [`Deadline`] for every spec on the running thread.
//! RPCs bound their own timeouts by it and polls stop sampling once it has
//! expired. An interrupt flag, set from the Ctrl+C handler, expires every
//! deadline that shares it.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A point in time after which the current spec must stop waiting.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Deadline {
    /// A deadline that never expires on its own.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            at: None,
            interrupt: None,
        }
    }

    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            interrupt: None,
        }
    }

    /// Attaches an interrupt flag; once set, the deadline counts as expired.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Returns whether the interrupt flag has been raised.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Returns whether the deadline's time has passed, ignoring interrupts.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Returns whether the deadline has passed or the run was interrupted.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.interrupted() || self.timed_out()
    }

    /// Time left before expiry; `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        if self.interrupted() {
            return Some(Duration::ZERO);
        }
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Clamps an operation timeout to the time left.
    #[must_use]
    pub fn bound(&self, timeout: Duration) -> Duration {
        self.remaining().map_or(timeout, |left| left.min(timeout))
    }
}

thread_local! {
    static CURRENT: RefCell<Deadline> = const { RefCell::new(Deadline::none()) };
}

/// Returns the deadline of the spec running on this thread.
#[must_use]
pub fn current() -> Deadline {
    CURRENT.with(|d| d.borrow().clone())
}

/// Installs `deadline` for the duration of `f`.
pub fn scoped<R>(deadline: Deadline, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|d| d.replace(deadline));
    let guard = Restore(Some(previous));
    let result = f();
    drop(guard);
    result
}

struct Restore(Option<Deadline>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            CURRENT.with(|d| {
                let _ = d.replace(previous);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_expires() {
        let d = Deadline::none();
        assert!(!d.expired());
        assert_eq!(d.remaining(), None);
        assert_eq!(d.bound(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn bound_clamps_to_remaining_time() {
        let d = Deadline::after(Duration::from_millis(50));
        assert!(d.bound(Duration::from_secs(30)) <= Duration::from_millis(50));
    }

    #[test]
    fn zero_deadline_is_expired() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.expired());
    }

    #[test]
    fn interrupt_expires_deadline() {
        let flag = Arc::new(AtomicBool::new(false));
        let d = Deadline::after(Duration::from_secs(60)).with_interrupt(flag.clone());
        assert!(!d.expired());
        flag.store(true, Ordering::SeqCst);
        assert!(d.expired());
        assert!(!d.timed_out());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn scoped_restores_previous_deadline() {
        assert!(current().remaining().is_none());
        scoped(Deadline::after(Duration::from_secs(5)), || {
            assert!(current().remaining().is_some());
        });
        assert!(current().remaining().is_none());
    }

    #[test]
    fn scoped_restores_after_unwind() {
        let result = std::panic::catch_unwind(|| {
            scoped(Deadline::after(Duration::from_secs(5)), || panic!("unwind"));
        });
        assert!(result.is_err());
        assert!(current().remaining().is_none());
    }
}
