//! # critest-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire critest workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the foundational primitives that the runner,
//! the CRI facade, the fixture library and the suite build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
