//! Host helper commands.
//!
//! Every external tool the fixtures invoke goes through
//! [`run_host_command`], which locates the binary, bounds the run by the
//! spec deadline, and applies a stderr policy.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use critest_common::constants::DEFAULT_HOST_COMMAND_TIMEOUT;
use critest_common::error::{CritestError, Result};
use critest_runner::deadline;

const WAIT_INTERVAL: Duration = Duration::from_millis(20);

/// What to make of output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrPolicy {
    /// Only the exit status decides success.
    Ignore,
    /// Any byte on stderr is a failure, whatever the exit status.
    Fail,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Runs `program` with `args` and returns its stdout.
///
/// # Errors
///
/// Returns [`CritestError::Unsupported`] if `program` is not installed and
/// [`CritestError::HostCommand`] if it fails, times out, or violates
/// `policy`.
pub fn run_host_command(program: &str, args: &[&str], policy: StderrPolicy) -> Result<String> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    let path = which::which(program).map_err(|e| CritestError::Unsupported {
        message: format!("`{program}` not found on the host: {e}"),
    })?;
    let failed = |message: String| CritestError::HostCommand {
        command: command_line.clone(),
        message,
    };

    let budget = deadline::current().bound(DEFAULT_HOST_COMMAND_TIMEOUT);
    tracing::debug!(command = %command_line, ?budget, "running host command");
    let mut child = Command::new(&path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CritestError::io(&path, e))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(|e| CritestError::io(&path, e))? {
            break status;
        }
        if started.elapsed() >= budget {
            let _ = child.kill();
            let _ = child.wait();
            return Err(failed(format!("timed out after {budget:?}")));
        }
        thread::sleep(WAIT_INTERVAL);
    };

    let stdout = String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default()).into_owned();
    if !status.success() {
        return Err(failed(format!("{status}: {}", stderr.trim())));
    }
    if policy == StderrPolicy::Fail && !stderr.is_empty() {
        return Err(failed(format!("wrote to stderr: {}", stderr.trim())));
    }
    tracing::debug!(command = %command_line, "host command succeeded");
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = run_host_command("sh", &["-c", "echo hello"], StderrPolicy::Fail).unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn stderr_fails_under_strict_policy() {
        let script = ["-c", "echo oops >&2"];
        assert!(run_host_command("sh", &script, StderrPolicy::Ignore).is_ok());
        let err = run_host_command("sh", &script, StderrPolicy::Fail).unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = run_host_command("sh", &["-c", "exit 3"], StderrPolicy::Ignore).unwrap_err();
        assert!(matches!(err, CritestError::HostCommand { .. }));
    }

    #[test]
    fn missing_program_is_unsupported() {
        let err = run_host_command("critest-no-such-tool", &[], StderrPolicy::Ignore).unwrap_err();
        assert!(matches!(err, CritestError::Unsupported { .. }));
    }

    #[test]
    fn deadline_kills_the_command() {
        let deadline = critest_runner::Deadline::after(Duration::from_millis(200));
        let err = deadline::scoped(deadline, || {
            run_host_command("sh", &["-c", "sleep 5"], StderrPolicy::Ignore)
        })
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
