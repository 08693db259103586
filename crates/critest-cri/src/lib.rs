//! # critest-cri
//!
//! Client of the CRI `runtime.v1` API as seen by the conformance suite.
//!
//! - [`proto`] holds the protobuf messages and [`grpc`] the async stubs.
//! - [`transport`] parses endpoints and dials them over Unix sockets or TCP.
//! - [`RuntimeClient`] and [`ImageClient`] are blocking facades whose calls
//!   are bounded by the running spec's deadline.
//! - [`streaming`] speaks SPDY/3.1 to the URLs returned by `Exec`, `Attach`,
//!   and `PortForward`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod error;
pub mod grpc;
pub mod image;
pub mod proto;
pub mod runtime;
pub mod streaming;
pub mod transport;

pub use error::{ErrorKind, RuntimeError, StreamError};
pub use image::ImageClient;
pub use runtime::{ExecSyncOutput, RuntimeClient};
pub use streaming::{OutputSink, PortForwarder, RemoteIo, RemoteSession, StreamingClient};
