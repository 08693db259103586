//! # critest-runner
//!
//! The spec-running engine of the critest suite.
//!
//! A [`Registry`](registry::Registry) is populated once at startup with a
//! tree of described groups, hooks and leaf specs. The
//! [`Runner`](runner::Runner) walks that tree exactly once, running nested
//! setup and teardown around every selected leaf, catching assertion
//! failures and panics at the leaf boundary, and draining each spec's
//! [`CleanupStack`](cleanup::CleanupStack) in LIFO order.
//!
//! Assertions ([`expect`](assertion::expect)) and polls
//! ([`eventually`](polling::eventually), [`consistently`](polling::consistently))
//! report failures by unwinding with a [`Failure`](failure::Failure)
//! sentinel, which the runner converts into a failed outcome.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod assertion;
pub mod cleanup;
pub mod deadline;
pub mod failure;
pub mod filter;
pub mod polling;
pub mod registry;
pub mod report;
pub mod runner;
pub mod step;

pub use assertion::{expect, expect_err, expect_ok};
pub use cleanup::CleanupStack;
pub use deadline::Deadline;
pub use failure::{fail, skip};
pub use filter::Filter;
pub use polling::{consistently, eventually};
pub use registry::{Group, Registry};
pub use report::{Outcome, SpecReport, SuiteReport};
pub use runner::{Runner, SpecContext, SpecInfo};
pub use step::step;
