//! Error types of the CRI client.

use std::fmt;
use std::time::Duration;

/// Coarse classification of a failed CRI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced sandbox, container, or image does not exist.
    NotFound,
    /// The request was rejected as malformed or not applicable.
    InvalidArgument,
    /// The runtime could not be reached.
    Unavailable,
    /// The call did not finish before its deadline.
    Deadline,
    /// Anything else.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Deadline => write!(f, "deadline exceeded"),
            Self::Other => write!(f, "error"),
        }
    }
}

impl From<tonic::Code> for ErrorKind {
    fn from(code: tonic::Code) -> Self {
        match code {
            tonic::Code::NotFound => Self::NotFound,
            tonic::Code::InvalidArgument
            | tonic::Code::FailedPrecondition
            | tonic::Code::OutOfRange => Self::InvalidArgument,
            tonic::Code::Unavailable => Self::Unavailable,
            tonic::Code::DeadlineExceeded => Self::Deadline,
            _ => Self::Other,
        }
    }
}

/// A failed CRI call; the runtime's message is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {kind}: {message}")]
pub struct RuntimeError {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// RPC or local operation that failed.
    pub operation: String,
    /// Message reported by the runtime or the transport.
    pub message: String,
}

impl RuntimeError {
    /// Builds an error of the given kind.
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Maps a gRPC status returned by `operation`.
    #[must_use]
    pub fn from_status(operation: &str, status: &tonic::Status) -> Self {
        Self::new(status.code().into(), operation, status.message())
    }

    /// The local timeout of `operation` fired after `timeout`.
    #[must_use]
    pub fn deadline(operation: &str, timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Deadline,
            operation,
            format!("no response within {timeout:?}"),
        )
    }

    /// Returns whether the referenced object did not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Errors of the SPDY streaming client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The streaming URL cannot be dialed.
    #[error("invalid streaming URL {url}: {message}")]
    Url {
        /// The URL returned by the runtime.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// The HTTP upgrade to SPDY/3.1 failed.
    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A header block could not be compressed or decompressed.
    #[error("header compression error: {0}")]
    Compression(String),

    /// The peer reset a stream.
    #[error("stream {stream_id} reset by peer (status {status})")]
    Reset {
        /// Stream that was reset.
        stream_id: u32,
        /// SPDY RST_STREAM status code.
        status: u32,
    },

    /// The remote command or port forward reported a failure.
    #[error("remote error: {message}")]
    Remote {
        /// Message from the error stream.
        message: String,
        /// Exit code for commands that exited non-zero.
        exit_code: Option<i32>,
    },

    /// The session ended before the operation completed.
    #[error("connection closed")]
    Closed,

    /// The operation did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        assert_eq!(ErrorKind::from(tonic::Code::NotFound), ErrorKind::NotFound);
        assert_eq!(
            ErrorKind::from(tonic::Code::FailedPrecondition),
            ErrorKind::InvalidArgument
        );
        assert_eq!(ErrorKind::from(tonic::Code::OutOfRange), ErrorKind::InvalidArgument);
        assert_eq!(ErrorKind::from(tonic::Code::Unavailable), ErrorKind::Unavailable);
        assert_eq!(ErrorKind::from(tonic::Code::DeadlineExceeded), ErrorKind::Deadline);
        assert_eq!(ErrorKind::from(tonic::Code::Internal), ErrorKind::Other);
        assert_eq!(ErrorKind::from(tonic::Code::Unknown), ErrorKind::Other);
    }

    #[test]
    fn status_message_is_preserved() {
        let status = tonic::Status::not_found("container \"abc\" not found");
        let err = RuntimeError::from_status("ContainerStatus", &status);
        assert!(err.is_not_found());
        assert_eq!(err.message, "container \"abc\" not found");
        assert_eq!(
            err.to_string(),
            "ContainerStatus: not found: container \"abc\" not found"
        );
    }

    #[test]
    fn local_timeout_is_a_deadline() {
        let err = RuntimeError::deadline("ExecSync", Duration::from_secs(3));
        assert_eq!(err.kind, ErrorKind::Deadline);
        assert!(err.message.contains("3s"));
    }
}
