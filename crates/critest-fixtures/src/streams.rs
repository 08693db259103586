//! Exec, attach, and port-forward helpers built on the streaming client.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use critest_common::constants::DEFAULT_EXEC_STDIN_CLOSE;
use critest_common::types::{ContainerId, SandboxId};
use critest_cri::proto::{AttachRequest, ExecRequest, PortForwardRequest};
use critest_cri::{OutputSink, RemoteIo, RemoteSession, StreamError};
use critest_runner::{expect_ok, step};

use crate::framework::Framework;

/// Output buffer shared between the session task and the spec thread.
#[derive(Debug, Clone, Default)]
pub struct SafeBuffer(Arc<Mutex<Vec<u8>>>);

impl SafeBuffer {
    /// An empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Contents as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns whether nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputSink for SafeBuffer {
    fn write(&self, data: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }
}

/// Captured output of a finished streaming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
}

/// An interactive exec or attach session.
#[derive(Debug)]
pub struct StreamSession {
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
    stdout: SafeBuffer,
    stderr: SafeBuffer,
    session: RemoteSession,
}

impl StreamSession {
    /// Sends `data` on stdin; ignored once stdin is closed.
    pub fn write_stdin(&self, data: &[u8]) {
        if self
            .stdin
            .as_ref()
            .is_some_and(|tx| tx.send(data.to_vec()).is_err())
        {
            tracing::debug!("stdin already closed by the session");
        }
    }

    /// Closes stdin.
    pub fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    /// Output received on stdout so far.
    #[must_use]
    pub const fn stdout(&self) -> &SafeBuffer {
        &self.stdout
    }

    /// Output received on stderr so far.
    #[must_use]
    pub const fn stderr(&self) -> &SafeBuffer {
        &self.stderr
    }

    /// Returns whether the remote side has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Closes stdin and waits up to `timeout` for the session to end.
    ///
    /// # Errors
    ///
    /// Returns the session's error or a timeout.
    pub fn finish(mut self, timeout: Duration) -> Result<StreamOutput, StreamError> {
        self.close_stdin();
        self.session.wait(timeout)?;
        Ok(StreamOutput {
            stdout: self.stdout.text(),
            stderr: self.stderr.text(),
        })
    }
}

fn session_io(tty: bool, stdin: bool) -> (RemoteIo, Option<mpsc::UnboundedSender<Vec<u8>>>, SafeBuffer, SafeBuffer) {
    let stdout = SafeBuffer::new();
    let stderr = SafeBuffer::new();
    let (tx, rx) = if stdin {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let io = RemoteIo {
        stdin: rx,
        stdin_close_after: stdin.then_some(DEFAULT_EXEC_STDIN_CLOSE),
        stdout: Some(Arc::new(stdout.clone())),
        stderr: (!tty).then(|| Arc::new(stderr.clone()) as Arc<dyn OutputSink>),
        tty,
    };
    (io, tx, stdout, stderr)
}

/// Fetches `url` over plain HTTP and returns the body.
///
/// # Errors
///
/// Returns the transport error or a non-success status.
pub fn http_get(url: &str, timeout: Duration) -> Result<String, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?
        .get(url)
        .send()?
        .error_for_status()?
        .text()
}

impl Framework {
    /// Streaming URL for an exec of `cmd`.
    pub fn exec_url(&self, id: &ContainerId, cmd: &[String], tty: bool, stdin: bool) -> String {
        let request = ExecRequest {
            container_id: id.to_string(),
            cmd: cmd.to_vec(),
            tty,
            stdin,
            stdout: true,
            stderr: !tty,
        };
        let url = expect_ok(self.runtime().exec(request), "request exec URL");
        tracing::debug!(container = %id, %url, "exec URL");
        url
    }

    /// Runs `cmd` through the streaming exec and returns its output.
    pub fn exec_streaming(&self, id: &ContainerId, cmd: &[String], tty: bool) -> StreamOutput {
        step(format!("exec {cmd:?} over a streaming session"));
        let url = self.exec_url(id, cmd, tty, false);
        let (io, _, stdout, stderr) = session_io(tty, false);
        expect_ok(self.streaming().run_remote(&url, io), "run streaming exec");
        StreamOutput {
            stdout: stdout.text(),
            stderr: stderr.text(),
        }
    }

    /// Starts an interactive exec of `cmd` with stdin attached.
    pub fn exec_interactive(&self, id: &ContainerId, cmd: &[String], tty: bool) -> StreamSession {
        step(format!("start interactive exec {cmd:?}"));
        let url = self.exec_url(id, cmd, tty, true);
        self.spawn_session(&url, tty)
    }

    /// Attaches to the main process of a container created with stdin open.
    pub fn attach(&self, id: &ContainerId, tty: bool) -> StreamSession {
        step("attach to container");
        let request = AttachRequest {
            container_id: id.to_string(),
            stdin: true,
            tty,
            stdout: true,
            stderr: !tty,
        };
        let url = expect_ok(self.runtime().attach(request), "request attach URL");
        tracing::debug!(container = %id, %url, "attach URL");
        self.spawn_session(&url, tty)
    }

    fn spawn_session(&self, url: &str, tty: bool) -> StreamSession {
        let (io, stdin, stdout, stderr) = session_io(tty, true);
        let session = self.streaming().spawn_remote(url, io);
        StreamSession {
            stdin,
            stdout,
            stderr,
            session,
        }
    }

    /// Forwards `127.0.0.1:host_port` to `container_port` of the sandbox.
    ///
    /// The listener and every tunnel are torn down when the spec ends.
    pub fn port_forward(&mut self, sandbox: &SandboxId, host_port: u16, container_port: u16) -> SocketAddr {
        step(format!("forward host port {host_port} to container port {container_port}"));
        let request = PortForwardRequest {
            pod_sandbox_id: sandbox.to_string(),
            port: vec![i32::from(container_port)],
        };
        let url = expect_ok(self.runtime().port_forward(request), "request port-forward URL");
        let listen = SocketAddr::from((Ipv4Addr::LOCALHOST, host_port));
        let forwarder = expect_ok(
            self.streaming().port_forward(&url, listen, container_port),
            "start port forwarding",
        );
        let local = forwarder.local_addr();
        self.defer(format!("stop port forward on {local}"), move || {
            drop(forwarder);
            Ok::<(), Infallible>(())
        });
        local
    }
}
