//! The `channel.k8s.io` remote command protocol used by `Exec` and `Attach`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connection::{Connection, Stream, StreamReader};
use super::header::HeaderBlock;
use super::upgrade;
use crate::error::StreamError;

/// Sub-protocols offered, most preferred first.
pub const PROTOCOLS: [&str; 4] = [
    "v4.channel.k8s.io",
    "v3.channel.k8s.io",
    "v2.channel.k8s.io",
    "channel.k8s.io",
];

const STREAM_TYPE: &str = "streamType";

/// Receives output of a remote process.
pub trait OutputSink: Send + Sync {
    /// Appends a chunk of output.
    fn write(&self, data: &[u8]);
}

/// The standard streams of a remote command.
pub struct RemoteIo {
    /// Chunks to send on stdin; stdin is closed once every sender is dropped.
    pub stdin: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Closes stdin after this long even if senders are still alive.
    pub stdin_close_after: Option<Duration>,
    /// Destination of stdout.
    pub stdout: Option<Arc<dyn OutputSink>>,
    /// Destination of stderr; ignored with a TTY.
    pub stderr: Option<Arc<dyn OutputSink>>,
    /// Whether the command runs with a terminal.
    pub tty: bool,
}

impl std::fmt::Debug for RemoteIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdin_close_after", &self.stdin_close_after)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("tty", &self.tty)
            .finish()
    }
}

fn typed(kind: &str) -> HeaderBlock {
    HeaderBlock::new().with(STREAM_TYPE, kind)
}

/// Runs the session behind `url` to completion.
///
/// # Errors
///
/// Returns [`StreamError::Remote`] when the command fails or exits non-zero,
/// and transport errors as they occur.
pub async fn run(url: &str, io: RemoteIo) -> Result<(), StreamError> {
    let (conn, negotiated) = upgrade::dial(url, &PROTOCOLS).await?;
    let protocol = negotiated.unwrap_or_else(|| PROTOCOLS[3].to_string());
    tracing::debug!(url, %protocol, tty = io.tty, "remote command session established");
    stream(&conn, &protocol, io).await
}

async fn stream(conn: &Connection, protocol: &str, io: RemoteIo) -> Result<(), StreamError> {
    let mut error = conn.open_stream(typed("error")).await?;
    let stdin = match io.stdin {
        Some(rx) => Some((conn.open_stream(typed("stdin")).await?, rx)),
        None => None,
    };
    let stdout = match io.stdout {
        Some(sink) => Some((conn.open_stream(typed("stdout")).await?, sink)),
        None => None,
    };
    let stderr = match io.stderr {
        Some(sink) if !io.tty => Some((conn.open_stream(typed("stderr")).await?, sink)),
        _ => None,
    };
    let _resize = if io.tty && supports_resize(protocol) {
        Some(conn.open_stream(typed("resize")).await?)
    } else {
        None
    };

    let stdin_pump = stdin.map(|(stream, rx)| tokio::spawn(pump_stdin(stream, rx, io.stdin_close_after)));

    let (stdout_done, stderr_done) = tokio::join!(
        copy_output(stdout.map(|(s, sink)| (s.split().0, sink))),
        copy_output(stderr.map(|(s, sink)| (s.split().0, sink))),
    );
    let status = error.read_to_end().await;
    if let Some(pump) = stdin_pump {
        pump.abort();
    }
    stdout_done?;
    stderr_done?;
    decode_status(protocol, &status?)
}

fn supports_resize(protocol: &str) -> bool {
    protocol.starts_with("v3.") || protocol.starts_with("v4.")
}

async fn pump_stdin(stream: Stream, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, close_after: Option<Duration>) {
    let close_at = close_after.map(|d| Instant::now() + d);
    loop {
        let next = match close_at {
            Some(at) => tokio::time::timeout_at(at, rx.recv()).await.unwrap_or(None),
            None => rx.recv().await,
        };
        let Some(chunk) = next else { break };
        if let Err(e) = stream.write(&chunk).await {
            tracing::debug!(error = %e, "stdin write failed");
            return;
        }
    }
    if let Err(e) = stream.close_write().await {
        tracing::debug!(error = %e, "closing stdin failed");
    }
}

async fn copy_output(pair: Option<(StreamReader, Arc<dyn OutputSink>)>) -> Result<(), StreamError> {
    let Some((mut reader, sink)) = pair else {
        return Ok(());
    };
    while let Some(chunk) = reader.read().await? {
        sink.write(&chunk);
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    details: Option<StatusDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusDetails {
    #[serde(default)]
    causes: Vec<StatusCause>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusCause {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Interprets the contents of the error stream.
///
/// Protocol v4 sends a JSON status object; older versions send plain text,
/// where anything non-empty is a failure.
fn decode_status(protocol: &str, raw: &[u8]) -> Result<(), StreamError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    if !protocol.starts_with("v4.") {
        return Err(StreamError::Remote {
            message: String::from_utf8_lossy(raw).trim().to_string(),
            exit_code: None,
        });
    }
    let status: Status = serde_json::from_slice(raw)
        .map_err(|e| StreamError::Protocol(format!("undecodable error stream: {e}")))?;
    if status.status == "Success" {
        return Ok(());
    }
    let exit_code = if status.reason == "NonZeroExitCode" {
        status
            .details
            .iter()
            .flat_map(|d| d.causes.iter())
            .find(|c| c.reason == "ExitCode")
            .and_then(|c| c.message.trim().parse().ok())
    } else {
        None
    };
    Err(StreamError::Remote {
        message: status.message,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4: &str = "v4.channel.k8s.io";

    #[test]
    fn empty_error_stream_is_success() {
        assert!(decode_status(V4, b"").is_ok());
        assert!(decode_status("v2.channel.k8s.io", b"\n").is_ok());
    }

    #[test]
    fn v4_success_status() {
        assert!(decode_status(V4, br#"{"metadata":{},"status":"Success"}"#).is_ok());
    }

    #[test]
    fn v4_non_zero_exit_carries_the_code() {
        let raw = br#"{"metadata":{},"status":"Failure","message":"command terminated with non-zero exit code: error executing command [sh -c exit 3], exit code 3","reason":"NonZeroExitCode","details":{"causes":[{"reason":"ExitCode","message":"3"}]}}"#;
        match decode_status(V4, raw) {
            Err(StreamError::Remote { message, exit_code }) => {
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("exit code 3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v4_other_failures_have_no_code() {
        let raw = br#"{"status":"Failure","message":"container not running","reason":"InternalError"}"#;
        assert!(matches!(
            decode_status(V4, raw),
            Err(StreamError::Remote { exit_code: None, .. })
        ));
    }

    #[test]
    fn legacy_protocols_use_plain_text() {
        match decode_status("v3.channel.k8s.io", b"exec failed: no such file\n") {
            Err(StreamError::Remote { message, exit_code }) => {
                assert_eq!(message, "exec failed: no such file");
                assert_eq!(exit_code, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_v4_status_is_a_protocol_error() {
        assert!(matches!(
            decode_status(V4, b"{not json"),
            Err(StreamError::Protocol(_))
        ));
    }

    #[test]
    fn resize_only_from_v3() {
        assert!(supports_resize(V4));
        assert!(supports_resize("v3.channel.k8s.io"));
        assert!(!supports_resize("v2.channel.k8s.io"));
        assert!(!supports_resize("channel.k8s.io"));
    }
}
