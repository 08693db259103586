//! Failure and skip sentinels, and the recovery boundary that catches them.
//!
//! Assertions unwind with [`Failure`] and precondition checks unwind with
//! [`Skip`]. [`recover`] runs a closure and classifies how it ended. A
//! process-wide panic hook keeps sentinel unwinds quiet while still logging
//! genuine panics.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Once;

/// Payload carried by an assertion failure unwind.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Human-readable failure message.
    pub message: String,
    /// Source location of the failed assertion.
    pub location: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.location)
    }
}

/// Payload carried by a skip unwind.
#[derive(Debug, Clone)]
pub struct Skip {
    /// Why the spec was skipped.
    pub reason: String,
}

/// How a closure run under [`recover`] ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// An assertion failed.
    Failed(String),
    /// A precondition was not met.
    Skipped(String),
    /// Any other panic.
    Panicked(String),
}

impl Interruption {
    /// Returns the message attached to the interruption.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(m) | Self::Skipped(m) | Self::Panicked(m) => m,
        }
    }
}

/// Fails the current spec with the given message.
#[track_caller]
pub fn fail(message: impl Into<String>) -> ! {
    let location = Location::caller();
    panic::panic_any(Failure {
        message: message.into(),
        location: format!("{}:{}", location.file(), location.line()),
    })
}

/// Skips the current spec with the given reason.
pub fn skip(reason: impl Into<String>) -> ! {
    panic::panic_any(Skip {
        reason: reason.into(),
    })
}

/// Runs `f`, converting failure, skip, and panic unwinds into an [`Interruption`].
///
/// # Errors
///
/// Returns the interruption if `f` unwound.
pub fn recover<F: FnOnce()>(f: F) -> Result<(), Interruption> {
    catch(f)
}

/// Like [`recover`], but keeps the closure's return value.
///
/// # Errors
///
/// Returns the interruption if `f` unwound.
pub fn catch<R, F: FnOnce() -> R>(f: F) -> Result<R, Interruption> {
    install_panic_hook();
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(classify)
}

fn classify(payload: Box<dyn Any + Send>) -> Interruption {
    if let Some(failure) = payload.downcast_ref::<Failure>() {
        return Interruption::Failed(failure.to_string());
    }
    if let Some(skip) = payload.downcast_ref::<Skip>() {
        return Interruption::Skipped(skip.reason.clone());
    }
    Interruption::Panicked(panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

static HOOK: Once = Once::new();

/// Installs the panic hook that silences sentinel unwinds.
///
/// Other panics are logged and then handed to the previously installed
/// hook. Idempotent; called automatically by [`recover`].
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let payload = info.payload();
            if payload.is::<Failure>() || payload.is::<Skip>() {
                return;
            }
            let location = info
                .location()
                .map_or_else(String::new, |l| format!("{}:{}", l.file(), l.line()));
            tracing::error!(%location, message = %panic_message(payload), "panic inside spec");
            previous(info);
        }));
    });
}
