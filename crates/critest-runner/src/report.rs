//! Spec outcomes and the suite report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Final state of a leaf spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every assertion held.
    Passed,
    /// An assertion or hook failed.
    Failed,
    /// A precondition was not met, or the run was interrupted.
    Skipped,
    /// The spec panicked outside the assertion library.
    Panicked,
}

impl Outcome {
    /// Returns whether this outcome counts against the run.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Panicked)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// Result of one leaf spec.
#[derive(Debug, Clone, Serialize)]
pub struct SpecReport {
    /// Full path text: ancestor descriptions and the leaf description.
    pub full_text: String,
    /// Final outcome.
    pub outcome: Outcome,
    /// Failure, skip, or panic message.
    pub message: Option<String>,
    /// Steps recorded before the spec ended.
    pub steps: Vec<String>,
    /// Wall time including hooks and cleanup.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl SpecReport {
    pub(crate) fn failed_without_running(full_text: String, message: String) -> Self {
        Self {
            full_text,
            outcome: Outcome::Failed,
            message: Some(message),
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn skipped(full_text: String, reason: impl Into<String>) -> Self {
        Self {
            full_text,
            outcome: Outcome::Skipped,
            message: Some(reason.into()),
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Aggregate of every selected leaf.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    /// Per-leaf results in execution order.
    pub specs: Vec<SpecReport>,
    /// Wall time of the whole run.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl SuiteReport {
    /// Number of leaves with the given outcome.
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.specs.iter().filter(|s| s.outcome == outcome).count()
    }

    /// Returns whether every leaf passed or was skipped.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.specs.iter().all(|s| !s.outcome.is_failure())
    }

    /// Leaves that failed or panicked.
    pub fn failures(&self) -> impl Iterator<Item = &SpecReport> {
        self.specs.iter().filter(|s| s.outcome.is_failure())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
