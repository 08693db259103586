//! # critest-fixtures
//!
//! Everything a spec body needs besides assertions: the per-spec
//! [`Framework`] context, canonical sandbox and container configurations,
//! lifecycle helpers that register their own cleanup, streaming helpers,
//! host-state materialization, and container log verification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod defaults;
pub mod framework;
pub mod host;
pub mod lifecycle;
pub mod logs;
pub mod streams;

pub use defaults::{Commands, commands};
pub use framework::{Clients, Framework};
pub use logs::{LogEntry, LogTag, parse_log_file, parse_log_line, verify_log_contents};
pub use streams::{SafeBuffer, StreamOutput, StreamSession};
