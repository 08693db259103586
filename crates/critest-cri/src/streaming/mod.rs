//! Client side of the SPDY/3.1 streaming protocols behind `Exec`, `Attach`,
//! and `PortForward` URLs.
//!
//! The async pieces live in the submodules; [`StreamingClient`] drives them
//! from synchronous spec code on the shared I/O runtime.

pub mod connection;
pub mod frame;
pub mod header;
pub mod portforward;
pub mod remotecommand;
pub mod upgrade;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use critest_common::constants::DEFAULT_RPC_TIMEOUT;
use critest_runner::deadline;

pub use remotecommand::{OutputSink, RemoteIo};

use crate::error::StreamError;

/// Synchronous entry point to the streaming protocols.
#[derive(Debug, Clone)]
pub struct StreamingClient {
    runtime: Arc<Runtime>,
}

impl StreamingClient {
    /// Uses `runtime` for every session.
    #[must_use]
    pub const fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Runs the remote command behind `url` and waits for it to finish,
    /// bounded by the spec deadline.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Remote`] if the command fails and
    /// [`StreamError::Timeout`] if it outlives the budget.
    pub fn run_remote(&self, url: &str, io: RemoteIo) -> Result<(), StreamError> {
        let budget = deadline::current().bound(DEFAULT_RPC_TIMEOUT);
        self.runtime.block_on(async {
            tokio::time::timeout(budget, remotecommand::run(url, io))
                .await
                .map_err(|_| StreamError::Timeout(budget))?
        })
    }

    /// Starts the remote command behind `url` in the background.
    #[must_use]
    pub fn spawn_remote(&self, url: &str, io: RemoteIo) -> RemoteSession {
        let url = url.to_string();
        let task = self
            .runtime
            .spawn(async move { remotecommand::run(&url, io).await });
        RemoteSession {
            runtime: self.runtime.clone(),
            task: Some(task),
        }
    }

    /// Binds `listen` and forwards every accepted connection to
    /// `container_port` through the session behind `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade fails or `listen` cannot be bound.
    pub fn port_forward(
        &self,
        url: &str,
        listen: SocketAddr,
        container_port: u16,
    ) -> Result<PortForwarder, StreamError> {
        let budget = deadline::current().bound(DEFAULT_RPC_TIMEOUT);
        let (listener, conn) = self.runtime.block_on(async {
            tokio::time::timeout(budget, async {
                let conn = portforward::open(url).await?;
                let listener = tokio::net::TcpListener::bind(listen).await?;
                Ok::<_, StreamError>((listener, conn))
            })
            .await
            .map_err(|_| StreamError::Timeout(budget))?
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, container_port, "port forwarding started");
        let task = self
            .runtime
            .spawn(portforward::serve(listener, conn, container_port));
        Ok(PortForwarder { local_addr, task })
    }
}

/// A remote command running in the background.
#[derive(Debug)]
pub struct RemoteSession {
    runtime: Arc<Runtime>,
    task: Option<JoinHandle<Result<(), StreamError>>>,
}

impl RemoteSession {
    /// Returns whether the command has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits up to `timeout` for the command to finish.
    ///
    /// # Errors
    ///
    /// Returns the session's error, or [`StreamError::Timeout`] if it is
    /// still running; the session is then aborted.
    pub fn wait(mut self, timeout: Duration) -> Result<(), StreamError> {
        let Some(task) = self.task.take() else {
            return Err(StreamError::Closed);
        };
        let abort = task.abort_handle();
        self.runtime.block_on(async {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join)) => Err(StreamError::Protocol(format!("session task failed: {join}"))),
                Err(_) => {
                    abort.abort();
                    Err(StreamError::Timeout(timeout))
                }
            }
        })
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A running port forward; dropping it closes the listener and every relay.
#[derive(Debug)]
pub struct PortForwarder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl PortForwarder {
    /// Address the local listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PortForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}
