//! Container log parsing and verification.
//!
//! Runtimes write one record per line, either in the CRI text format
//! `<RFC3339Nano> <stream> <F|P> <payload>` or as a JSON object
//! `{"log": ..., "stream": ..., "time": ...}`. The format is detected per
//! line from its first byte.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use critest_common::types::LogStream;
use critest_runner::fail;

/// Whether a record holds a complete line or a fragment of a long one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    /// The payload ends a line.
    Full,
    /// The payload continues in the next record.
    Partial,
}

/// One parsed log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the runtime captured the output.
    pub timestamp: DateTime<FixedOffset>,
    /// Which stream it came from.
    pub stream: LogStream,
    /// Full or partial line.
    pub tag: LogTag,
    /// Payload without the trailing newline.
    pub line: String,
}

/// Errors raised while reading a container log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log file could not be read.
    #[error("cannot read log {path}: {source}")]
    Io {
        /// Log file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A line did not match either format.
    #[error("malformed log line {line:?}: {reason}")]
    Malformed {
        /// The offending line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },
}

fn malformed(line: &str, reason: impl Into<String>) -> LogError {
    LogError::Malformed {
        line: line.to_string(),
        reason: reason.into(),
    }
}

#[derive(Deserialize)]
struct JsonRecord {
    log: String,
    stream: String,
    time: String,
}

fn parse_time(line: &str, raw: &str) -> Result<DateTime<FixedOffset>, LogError> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| malformed(line, format!("bad timestamp {raw:?}: {e}")))
}

fn parse_stream(line: &str, raw: &str) -> Result<LogStream, LogError> {
    LogStream::parse(raw).ok_or_else(|| malformed(line, format!("unknown stream {raw:?}")))
}

/// Parses one line in either log format.
///
/// # Errors
///
/// Returns [`LogError::Malformed`] if the line matches neither format.
pub fn parse_log_line(line: &str) -> Result<LogEntry, LogError> {
    if line.starts_with('{') {
        let record: JsonRecord =
            serde_json::from_str(line).map_err(|e| malformed(line, e.to_string()))?;
        let (payload, tag) = match record.log.strip_suffix('\n') {
            Some(payload) => (payload.to_string(), LogTag::Full),
            None => (record.log, LogTag::Partial),
        };
        return Ok(LogEntry {
            timestamp: parse_time(line, &record.time)?,
            stream: parse_stream(line, &record.stream)?,
            tag,
            line: payload,
        });
    }

    let mut fields = line.splitn(4, ' ');
    let (Some(time), Some(stream), Some(tag)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(malformed(line, "expected `<time> <stream> <tag> <payload>`"));
    };
    let tag = match tag {
        "F" => LogTag::Full,
        "P" => LogTag::Partial,
        other => return Err(malformed(line, format!("unknown tag {other:?}"))),
    };
    Ok(LogEntry {
        timestamp: parse_time(line, time)?,
        stream: parse_stream(line, stream)?,
        tag,
        line: fields.next().unwrap_or_default().to_string(),
    })
}

/// Reads and parses `log_dir/relative`; blank lines are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds a malformed line.
pub fn parse_log_file(log_dir: &Path, relative: &str) -> Result<Vec<LogEntry>, LogError> {
    let path = log_dir.join(relative);
    let content = std::fs::read_to_string(&path).map_err(|source| LogError::Io {
        path: path.clone(),
        source,
    })?;
    let entries = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_log_line)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(path = %path.display(), entries = entries.len(), "parsed container log");
    Ok(entries)
}

/// Returns whether some entry on `stream` carries `expected` as its payload.
#[must_use]
pub fn contains_line(entries: &[LogEntry], expected: &str, stream: LogStream) -> bool {
    entries
        .iter()
        .any(|e| e.stream == stream && e.line == expected)
}

/// Fails the spec unless some entry on `stream` carries `expected`.
#[track_caller]
pub fn verify_log_contents(entries: &[LogEntry], expected: &str, stream: LogStream) {
    if !contains_line(entries, expected, stream) {
        fail(format!(
            "no {stream} log entry with payload {expected:?} among {} entries: {entries:#?}",
            entries.len()
        ));
    }
}
