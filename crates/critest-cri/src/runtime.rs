//! Synchronous facade over `runtime.v1.RuntimeService`.
//!
//! Specs are plain synchronous functions, so every call blocks on the shared
//! I/O runtime. Each call is bounded by its own default budget and by
//! whatever is left of the running spec's deadline, whichever is shorter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tonic::{Response, Status};

use critest_common::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RPC_TIMEOUT};
use critest_common::types::{ContainerId, SandboxId};
use critest_runner::deadline;

use crate::error::{ErrorKind, RuntimeError};
use crate::grpc::RuntimeServiceClient;
use crate::proto::{
    AttachRequest, Container, ContainerConfig, ContainerFilter, ContainerStats,
    ContainerStatsFilter, ContainerStatsRequest, ContainerStatus, ContainerStatusRequest,
    CreateContainerRequest, ExecRequest, ExecSyncRequest, LinuxContainerResources,
    ListContainerStatsRequest, ListContainersRequest, ListPodSandboxRequest, PodSandbox,
    PodSandboxConfig, PodSandboxFilter, PodSandboxStatus, PodSandboxStatusRequest,
    PortForwardRequest, RemoveContainerRequest, RemovePodSandboxRequest,
    ReopenContainerLogRequest, RunPodSandboxRequest, StartContainerRequest, StatusRequest,
    StatusResponse, StopContainerRequest, StopPodSandboxRequest,
    UpdateContainerResourcesRequest, VersionRequest, VersionResponse,
};
use crate::streaming::StreamingClient;
use crate::transport;

/// Extra budget granted to `ExecSync` on top of the command timeout.
const EXEC_SYNC_SLACK: Duration = Duration::from_secs(10);

/// Runs one RPC to completion on `runtime`.
///
/// The effective budget is `default` capped by the current spec deadline.
pub(crate) fn call<C, T, F, Fut>(
    runtime: &Runtime,
    client: &C,
    operation: &'static str,
    default: Duration,
    f: F,
) -> Result<T, RuntimeError>
where
    C: Clone,
    F: FnOnce(C) -> Fut,
    Fut: Future<Output = Result<Response<T>, Status>>,
{
    let budget = deadline::current().bound(default);
    tracing::trace!(operation, ?budget, "cri call");
    let client = client.clone();
    let outcome = runtime.block_on(async move {
        match tokio::time::timeout(budget, f(client)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(RuntimeError::from_status(operation, &status)),
            Err(_) => Err(RuntimeError::deadline(operation, budget)),
        }
    });
    if let Err(e) = &outcome {
        tracing::debug!(operation, error = %e, "cri call failed");
    }
    outcome
}

pub(crate) fn missing(operation: &str, field: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::Other,
        operation,
        format!("response carried no {field}"),
    )
}

pub(crate) fn whole_seconds(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}

/// Output of a synchronous exec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecSyncOutput {
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// Exit code of the command.
    pub exit_code: i32,
}

impl ExecSyncOutput {
    /// Stdout as lossy UTF-8.
    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as lossy UTF-8.
    #[must_use]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Fails if the command exited non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the exit code and stderr.
    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.exit_code == 0 {
            return Ok(());
        }
        Err(RuntimeError::new(
            ErrorKind::Other,
            "ExecSync",
            format!(
                "command exited with code {}: stdout {:?}, stderr {:?}",
                self.exit_code,
                self.stdout_str(),
                self.stderr_str()
            ),
        ))
    }
}

/// Blocking client of the runtime service.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    runtime: Arc<Runtime>,
    inner: RuntimeServiceClient,
    endpoint: String,
}

impl RuntimeClient {
    /// Connects to `endpoint` using `runtime` for I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is malformed or unreachable.
    pub fn connect(
        runtime: Arc<Runtime>,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, RuntimeError> {
        let timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let channel = runtime.block_on(transport::connect(endpoint, timeout))?;
        tracing::info!(endpoint, "connected to runtime service");
        Ok(Self {
            runtime,
            inner: RuntimeServiceClient::new(channel),
            endpoint: endpoint.to_string(),
        })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A streaming client sharing this client's I/O runtime.
    #[must_use]
    pub fn streaming(&self) -> StreamingClient {
        StreamingClient::new(self.runtime.clone())
    }

    fn call<T, F, Fut>(&self, operation: &'static str, default: Duration, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(RuntimeServiceClient) -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        call(&self.runtime, &self.inner, operation, default, f)
    }

    /// Runtime name, version, and CRI API version.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn version(&self, api_version: &str) -> Result<VersionResponse, RuntimeError> {
        let request = VersionRequest {
            version: api_version.to_string(),
        };
        self.call("Version", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.version(request).await
        })
    }

    /// Runtime conditions, handler features, and the verbose info map.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn status(&self, verbose: bool) -> Result<StatusResponse, RuntimeError> {
        self.call("Status", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.status(StatusRequest { verbose }).await
        })
    }

    /// Starts a pod sandbox with `handler` (empty for the default).
    ///
    /// # Errors
    ///
    /// Returns the RPC error; invalid configs are rejected by the runtime.
    pub fn run_sandbox(&self, config: &PodSandboxConfig, handler: &str) -> Result<SandboxId, RuntimeError> {
        let request = RunPodSandboxRequest {
            config: Some(config.clone()),
            runtime_handler: handler.to_string(),
        };
        let id = self.call("RunPodSandbox", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.run_pod_sandbox(request).await
        })?;
        tracing::debug!(sandbox = %id.pod_sandbox_id, "sandbox started");
        Ok(SandboxId::new(id.pod_sandbox_id))
    }

    /// Stops a sandbox and its containers.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn stop_sandbox(&self, id: &SandboxId) -> Result<(), RuntimeError> {
        let request = StopPodSandboxRequest {
            pod_sandbox_id: id.to_string(),
        };
        self.call("StopPodSandbox", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.stop_pod_sandbox(request).await
        })
        .map(drop)
    }

    /// Removes a sandbox.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn remove_sandbox(&self, id: &SandboxId) -> Result<(), RuntimeError> {
        let request = RemovePodSandboxRequest {
            pod_sandbox_id: id.to_string(),
        };
        self.call("RemovePodSandbox", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.remove_pod_sandbox(request).await
        })
        .map(drop)
    }

    /// Sandboxes matching `filter`, in the runtime's order.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn list_sandboxes(&self, filter: Option<PodSandboxFilter>) -> Result<Vec<PodSandbox>, RuntimeError> {
        self.call("ListPodSandbox", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.list_pod_sandbox(ListPodSandboxRequest { filter }).await
        })
        .map(|r| r.items)
    }

    /// Status of one sandbox.
    ///
    /// # Errors
    ///
    /// Returns the RPC error, including `NotFound` for unknown ids.
    pub fn sandbox_status(&self, id: &SandboxId, verbose: bool) -> Result<PodSandboxStatus, RuntimeError> {
        let request = PodSandboxStatusRequest {
            pod_sandbox_id: id.to_string(),
            verbose,
        };
        self.call("PodSandboxStatus", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.pod_sandbox_status(request).await
        })?
        .status
        .ok_or_else(|| missing("PodSandboxStatus", "status"))
    }

    /// Creates a container in `sandbox`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error verbatim.
    pub fn create_container(
        &self,
        sandbox: &SandboxId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId, RuntimeError> {
        let request = CreateContainerRequest {
            pod_sandbox_id: sandbox.to_string(),
            config: Some(config.clone()),
            sandbox_config: Some(sandbox_config.clone()),
        };
        let created = self.call("CreateContainer", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.create_container(request).await
        })?;
        tracing::debug!(%sandbox, container = %created.container_id, "container created");
        Ok(ContainerId::new(created.container_id))
    }

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let request = StartContainerRequest {
            container_id: id.to_string(),
        };
        self.call("StartContainer", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.start_container(request).await
        })
        .map(drop)
    }

    /// Stops a container, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn stop_container(&self, id: &ContainerId, timeout: Duration) -> Result<(), RuntimeError> {
        let request = StopContainerRequest {
            container_id: id.to_string(),
            timeout: whole_seconds(timeout),
        };
        self.call(
            "StopContainer",
            timeout.saturating_add(DEFAULT_RPC_TIMEOUT),
            move |mut c| async move { c.stop_container(request).await },
        )
        .map(drop)
    }

    /// Removes a container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn remove_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let request = RemoveContainerRequest {
            container_id: id.to_string(),
        };
        self.call("RemoveContainer", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.remove_container(request).await
        })
        .map(drop)
    }

    /// Containers matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn list_containers(&self, filter: Option<ContainerFilter>) -> Result<Vec<Container>, RuntimeError> {
        self.call("ListContainers", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.list_containers(ListContainersRequest { filter }).await
        })
        .map(|r| r.containers)
    }

    /// Status of one container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error, including `NotFound` for unknown ids.
    pub fn container_status(&self, id: &ContainerId, verbose: bool) -> Result<ContainerStatus, RuntimeError> {
        let request = ContainerStatusRequest {
            container_id: id.to_string(),
            verbose,
        };
        self.call("ContainerStatus", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.container_status(request).await
        })?
        .status
        .ok_or_else(|| missing("ContainerStatus", "status"))
    }

    /// Resource usage of one container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn container_stats(&self, id: &ContainerId) -> Result<ContainerStats, RuntimeError> {
        let request = ContainerStatsRequest {
            container_id: id.to_string(),
        };
        self.call("ContainerStats", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.container_stats(request).await
        })?
        .stats
        .ok_or_else(|| missing("ContainerStats", "stats"))
    }

    /// Resource usage of every container matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn list_container_stats(
        &self,
        filter: Option<ContainerStatsFilter>,
    ) -> Result<Vec<ContainerStats>, RuntimeError> {
        self.call("ListContainerStats", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.list_container_stats(ListContainerStatsRequest { filter }).await
        })
        .map(|r| r.stats)
    }

    /// Applies new Linux resource limits to a running container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn update_container_resources(
        &self,
        id: &ContainerId,
        resources: LinuxContainerResources,
    ) -> Result<(), RuntimeError> {
        let request = UpdateContainerResourcesRequest {
            container_id: id.to_string(),
            linux: Some(resources),
            ..UpdateContainerResourcesRequest::default()
        };
        self.call("UpdateContainerResources", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.update_container_resources(request).await
        })
        .map(drop)
    }

    /// Asks the runtime to reopen the container's log file.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn reopen_container_log(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let request = ReopenContainerLogRequest {
            container_id: id.to_string(),
        };
        self.call("ReopenContainerLog", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.reopen_container_log(request).await
        })
        .map(drop)
    }

    /// Runs `cmd` in the container and collects its output.
    ///
    /// A zero `timeout` lets the command run without a runtime-side limit.
    ///
    /// # Errors
    ///
    /// Returns the RPC error; a non-zero exit is not an error here, see
    /// [`ExecSyncOutput::check`].
    pub fn exec_sync(&self, id: &ContainerId, cmd: &[String], timeout: Duration) -> Result<ExecSyncOutput, RuntimeError> {
        let request = ExecSyncRequest {
            container_id: id.to_string(),
            cmd: cmd.to_vec(),
            timeout: whole_seconds(timeout),
        };
        let budget = if timeout.is_zero() {
            DEFAULT_RPC_TIMEOUT
        } else {
            timeout.saturating_add(EXEC_SYNC_SLACK)
        };
        let response = self.call("ExecSync", budget, move |mut c| async move {
            c.exec_sync(request).await
        })?;
        tracing::debug!(container = %id, ?cmd, exit_code = response.exit_code, "exec sync finished");
        Ok(ExecSyncOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
        })
    }

    /// Requests a streaming URL for an exec session.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn exec(&self, request: ExecRequest) -> Result<String, RuntimeError> {
        self.call("Exec", DEFAULT_RPC_TIMEOUT, move |mut c| async move { c.exec(request).await })
            .map(|r| r.url)
    }

    /// Requests a streaming URL for attaching to a container.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn attach(&self, request: AttachRequest) -> Result<String, RuntimeError> {
        self.call("Attach", DEFAULT_RPC_TIMEOUT, move |mut c| async move { c.attach(request).await })
            .map(|r| r.url)
    }

    /// Requests a streaming URL for forwarding ports of a sandbox.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn port_forward(&self, request: PortForwardRequest) -> Result<String, RuntimeError> {
        self.call("PortForward", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.port_forward(request).await
        })
        .map(|r| r.url)
    }
}
