//! Per-spec cleanup stack.
//!
//! Fixtures push a release hook right after they create a remote resource
//! or materialize host state. The runner drains the stack in LIFO order once
//! the spec and its after-each hooks have finished, whatever their outcome.
//! Each entry is isolated: an error or panic is logged and the remaining
//! entries still run.
//!
//! Every entry gets its own teardown deadline, detached from the spec's
//! deadline and from the interrupt flag, so a timed-out or interrupted spec
//! can still reach the runtime to release what it created.

use std::fmt::Display;
use std::time::Duration;

use critest_common::constants::DEFAULT_TEARDOWN_TIMEOUT;

use crate::deadline::{self, Deadline};
use crate::failure::{self, Interruption};

type Release = Box<dyn FnOnce() -> Result<(), String>>;

struct Entry {
    description: String,
    release: Release,
}

/// LIFO list of release hooks.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field(
                "entries",
                &self
                    .entries
                    .iter()
                    .map(|e| e.description.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CleanupStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a release hook.
    pub fn defer<E, F>(&mut self, description: impl Into<String>, release: F)
    where
        E: Display,
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let description = description.into();
        tracing::debug!(%description, depth = self.entries.len() + 1, "deferred cleanup");
        self.entries.push(Entry {
            description,
            release: Box::new(move || release().map_err(|e| e.to_string())),
        });
    }

    /// Number of pending hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no hooks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every pending hook, newest first, each under a fresh
    /// [`DEFAULT_TEARDOWN_TIMEOUT`] deadline.
    ///
    /// Returns one message per hook that failed or panicked; teardown
    /// errors never change a spec's outcome, so callers only log them.
    pub fn drain(&mut self) -> Vec<String> {
        self.drain_within(DEFAULT_TEARDOWN_TIMEOUT)
    }

    /// Like [`drain`](Self::drain) with an explicit per-hook budget.
    pub fn drain_within(&mut self, budget: Duration) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(entry) = self.entries.pop() {
            let description = entry.description;
            let release = entry.release;
            let mut outcome = Ok(());
            let caught = deadline::scoped(Deadline::after(budget), || {
                failure::recover(|| outcome = release())
            });
            let error = match (caught, outcome) {
                (Ok(()), Ok(())) => None,
                (Ok(()), Err(e)) => Some(e),
                (Err(Interruption::Skipped(reason)), _) => {
                    Some(format!("skip requested during cleanup: {reason}"))
                }
                (Err(interruption), _) => Some(interruption.message().to_string()),
            };
            match error {
                None => tracing::debug!(%description, "cleanup done"),
                Some(error) => {
                    tracing::warn!(%description, %error, "cleanup failed");
                    errors.push(format!("{description}: {error}"));
                }
            }
        }
        errors
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let _ = self.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn drain_runs_hooks_in_lifo_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for name in ["mount", "sandbox", "container"] {
            let order = order.clone();
            stack.defer(name, move || {
                order.borrow_mut().push(name);
                Ok::<(), String>(())
            });
        }
        assert_eq!(stack.len(), 3);
        assert!(stack.drain().is_empty());
        assert_eq!(*order.borrow(), vec!["container", "sandbox", "mount"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn failing_hook_does_not_stop_the_rest() {
        let ran = Rc::new(RefCell::new(0));
        let mut stack = CleanupStack::new();
        let counter = ran.clone();
        stack.defer("first", move || {
            *counter.borrow_mut() += 1;
            Ok::<(), String>(())
        });
        stack.defer("broken", || Err::<(), _>("device busy"));
        stack.defer("panicking", || -> Result<(), String> { panic!("kaboom") });

        let errors = stack.drain();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("panicking: kaboom"));
        assert_eq!(errors[1], "broken: device busy");
        assert_eq!(*ran.borrow(), 1);
    }

    #[test]
    fn assertion_failure_inside_hook_is_reported() {
        let mut stack = CleanupStack::new();
        stack.defer("remove sandbox", || -> Result<(), String> {
            crate::failure::fail("remove failed")
        });
        let errors = stack.drain();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("remove failed"));
    }

    #[test]
    fn hooks_run_under_a_fresh_deadline() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;

        let budgets = Rc::new(RefCell::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for _ in 0..2 {
            let budgets = budgets.clone();
            stack.defer("remove sandbox", move || {
                let current = deadline::current();
                budgets.borrow_mut().push((current.remaining(), current.expired()));
                Ok::<(), String>(())
            });
        }

        let expired = Deadline::after(Duration::ZERO).with_interrupt(Arc::new(AtomicBool::new(true)));
        let errors = deadline::scoped(expired, || stack.drain_within(Duration::from_secs(30)));
        assert!(errors.is_empty());
        assert_eq!(budgets.borrow().len(), 2);
        for (remaining, expired) in budgets.borrow().iter() {
            assert!(!expired);
            assert!(remaining.unwrap() > Duration::from_secs(20));
        }
        assert!(deadline::current().remaining().is_none());
    }

    #[test]
    fn dropping_a_stack_drains_it() {
        let ran = Rc::new(RefCell::new(false));
        {
            let mut stack = CleanupStack::new();
            let flag = ran.clone();
            stack.defer("flag", move || {
                *flag.borrow_mut() = true;
                Ok::<(), String>(())
            });
        }
        assert!(*ran.borrow());
    }
}
