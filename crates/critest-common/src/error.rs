//! Unified error types for the critest workspace.
//!
//! Each higher-level crate defines its own domain-specific error enum
//! (RPC errors in the CRI facade, stream errors in the streaming client)
//! and converts into these common variants when crossing crate boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CritestError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A host helper command failed or wrote to stderr.
    #[error("host command `{command}` failed: {message}")]
    HostCommand {
        /// Command line that was executed.
        command: String,
        /// Exit status and captured stderr.
        message: String,
    },

    /// A required host or runtime feature is missing.
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of the missing feature.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// YAML parsing failed.
    #[error("yaml error in {path}: {source}")]
    Yaml {
        /// File being parsed.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
}

impl CritestError {
    /// Builds an [`CritestError::Io`] from a path and error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CritestError>;
