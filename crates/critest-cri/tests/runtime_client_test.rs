//! Integration tests for the blocking CRI clients over a live channel.
//!
//! A fake runtime serves `RuntimeService` and `ImageService` on a Unix
//! socket in a temporary directory, and the tests drive it through
//! [`RuntimeClient`] and [`ImageClient`]:
//! 1. Sandbox run/list/status/stop/remove round trips
//! 2. gRPC status codes mapped onto [`ErrorKind`]
//! 3. Call budgets bounded by the running spec deadline

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::runtime::Runtime;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use critest_common::types::SandboxId;
use critest_cri::grpc::{ImageService, ImageServiceServer, RuntimeService, RuntimeServiceServer};
use critest_cri::proto::{
    AttachRequest, AttachResponse, ContainerStatsRequest, ContainerStatsResponse,
    ContainerStatusRequest, ContainerStatusResponse, CreateContainerRequest,
    CreateContainerResponse, ExecRequest, ExecResponse, ExecSyncRequest, ExecSyncResponse, Image,
    ImageFsInfoRequest, ImageFsInfoResponse, ImageSpec, ImageStatusRequest, ImageStatusResponse,
    ListContainerStatsRequest, ListContainerStatsResponse, ListContainersRequest,
    ListContainersResponse, ListImagesRequest, ListImagesResponse, ListPodSandboxRequest,
    ListPodSandboxResponse, PodSandbox, PodSandboxConfig, PodSandboxMetadata, PodSandboxState,
    PodSandboxStatus, PodSandboxStatusRequest, PodSandboxStatusResponse, PortForwardRequest,
    PortForwardResponse, PullImageRequest, PullImageResponse, RemoveContainerRequest,
    RemoveContainerResponse, RemoveImageRequest, RemoveImageResponse, RemovePodSandboxRequest,
    RemovePodSandboxResponse, ReopenContainerLogRequest, ReopenContainerLogResponse,
    RunPodSandboxRequest, RunPodSandboxResponse, StartContainerRequest, StartContainerResponse,
    StatusRequest, StatusResponse, StopContainerRequest, StopContainerResponse,
    StopPodSandboxRequest, StopPodSandboxResponse, UpdateContainerResourcesRequest,
    UpdateContainerResourcesResponse, VersionRequest, VersionResponse,
};
use critest_cri::{ErrorKind, ImageClient, RuntimeClient, transport};
use critest_runner::deadline::{self, Deadline};

const STORED_IMAGE: &str = "registry.k8s.io/pause:3.10";

/// Keeps sandboxes in memory and answers `Status` slowly.
#[derive(Default)]
struct FakeRuntime {
    next_id: AtomicU64,
    sandboxes: Mutex<HashMap<String, PodSandbox>>,
}

impl FakeRuntime {
    fn lookup(&self, id: &str) -> Result<PodSandbox, Status> {
        self.sandboxes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("pod sandbox {id} not found")))
    }
}

fn unsupported<T>(rpc: &str) -> Result<Response<T>, Status> {
    Err(Status::unimplemented(format!("{rpc} is not served by the fake runtime")))
}

#[tonic::async_trait]
impl RuntimeService for FakeRuntime {
    async fn version(&self, request: Request<VersionRequest>) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: request.into_inner().version,
            runtime_name: "fake".into(),
            runtime_version: "0.0.1".into(),
            runtime_api_version: "v1".into(),
        }))
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        let request = request.into_inner();
        let config = request
            .config
            .ok_or_else(|| Status::invalid_argument("sandbox config is required"))?;
        let id = format!("sandbox-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let sandbox = PodSandbox {
            id: id.clone(),
            metadata: config.metadata,
            state: PodSandboxState::SandboxReady as i32,
            labels: config.labels,
            annotations: config.annotations,
            runtime_handler: request.runtime_handler,
            ..PodSandbox::default()
        };
        let _ = self.sandboxes.lock().unwrap().insert(id.clone(), sandbox);
        Ok(Response::new(RunPodSandboxResponse { pod_sandbox_id: id }))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        let id = request.into_inner().pod_sandbox_id;
        if let Some(sandbox) = self.sandboxes.lock().unwrap().get_mut(&id) {
            sandbox.set_state(PodSandboxState::SandboxNotready);
        }
        Ok(Response::new(StopPodSandboxResponse {}))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        // Removing an unknown sandbox succeeds.
        let _ = self
            .sandboxes
            .lock()
            .unwrap()
            .remove(&request.into_inner().pod_sandbox_id);
        Ok(Response::new(RemovePodSandboxResponse {}))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        let sandbox = self.lookup(&request.into_inner().pod_sandbox_id)?;
        Ok(Response::new(PodSandboxStatusResponse {
            status: Some(PodSandboxStatus {
                id: sandbox.id,
                metadata: sandbox.metadata,
                state: sandbox.state,
                labels: sandbox.labels,
                annotations: sandbox.annotations,
                runtime_handler: sandbox.runtime_handler,
                ..PodSandboxStatus::default()
            }),
            info: HashMap::new(),
        }))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        let filter = request.into_inner().filter.unwrap_or_default();
        let mut items: Vec<PodSandbox> = self
            .sandboxes
            .lock()
            .unwrap()
            .values()
            .filter(|s| filter.id.is_empty() || s.id == filter.id)
            .filter(|s| filter.state.as_ref().is_none_or(|want| want.state == s.state))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Response::new(ListPodSandboxResponse { items }))
    }

    async fn create_container(
        &self,
        _request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        unsupported("CreateContainer")
    }

    async fn start_container(
        &self,
        _request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        unsupported("StartContainer")
    }

    async fn stop_container(
        &self,
        _request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        unsupported("StopContainer")
    }

    async fn remove_container(
        &self,
        _request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        unsupported("RemoveContainer")
    }

    async fn list_containers(
        &self,
        _request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        Ok(Response::new(ListContainersResponse::default()))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        Err(Status::not_found(format!(
            "container {} not found",
            request.into_inner().container_id
        )))
    }

    async fn update_container_resources(
        &self,
        _request: Request<UpdateContainerResourcesRequest>,
    ) -> Result<Response<UpdateContainerResourcesResponse>, Status> {
        unsupported("UpdateContainerResources")
    }

    async fn reopen_container_log(
        &self,
        _request: Request<ReopenContainerLogRequest>,
    ) -> Result<Response<ReopenContainerLogResponse>, Status> {
        unsupported("ReopenContainerLog")
    }

    async fn exec_sync(&self, _request: Request<ExecSyncRequest>) -> Result<Response<ExecSyncResponse>, Status> {
        unsupported("ExecSync")
    }

    async fn exec(&self, _request: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        unsupported("Exec")
    }

    async fn attach(&self, _request: Request<AttachRequest>) -> Result<Response<AttachResponse>, Status> {
        unsupported("Attach")
    }

    async fn port_forward(
        &self,
        _request: Request<PortForwardRequest>,
    ) -> Result<Response<PortForwardResponse>, Status> {
        unsupported("PortForward")
    }

    async fn container_stats(
        &self,
        _request: Request<ContainerStatsRequest>,
    ) -> Result<Response<ContainerStatsResponse>, Status> {
        unsupported("ContainerStats")
    }

    async fn list_container_stats(
        &self,
        _request: Request<ListContainerStatsRequest>,
    ) -> Result<Response<ListContainerStatsResponse>, Status> {
        unsupported("ListContainerStats")
    }

    async fn status(&self, _request: Request<StatusRequest>) -> Result<Response<StatusResponse>, Status> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Response::new(StatusResponse::default()))
    }
}

/// Holds a single pre-pulled image.
struct FakeImages;

#[tonic::async_trait]
impl ImageService for FakeImages {
    async fn list_images(&self, _request: Request<ListImagesRequest>) -> Result<Response<ListImagesResponse>, Status> {
        Ok(Response::new(ListImagesResponse {
            images: vec![stored_image()],
        }))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        let wanted = request.into_inner().image.unwrap_or_default().image;
        // A missing image is an empty response, not an error.
        let image = (wanted == STORED_IMAGE).then(stored_image);
        Ok(Response::new(ImageStatusResponse {
            image,
            info: HashMap::new(),
        }))
    }

    async fn pull_image(&self, _request: Request<PullImageRequest>) -> Result<Response<PullImageResponse>, Status> {
        unsupported("PullImage")
    }

    async fn remove_image(
        &self,
        _request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        Ok(Response::new(RemoveImageResponse {}))
    }

    async fn image_fs_info(
        &self,
        _request: Request<ImageFsInfoRequest>,
    ) -> Result<Response<ImageFsInfoResponse>, Status> {
        unsupported("ImageFsInfo")
    }
}

fn stored_image() -> Image {
    Image {
        id: "sha256:fake".into(),
        repo_tags: vec![STORED_IMAGE.into()],
        spec: Some(ImageSpec::named(STORED_IMAGE)),
        ..Image::default()
    }
}

/// Fake runtime listening on a socket in its own temporary directory.
struct Harness {
    _dir: tempfile::TempDir,
    io: Arc<Runtime>,
    endpoint: String,
}

impl Harness {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("runtime.sock");
        let io = transport::new_runtime().unwrap();
        let listener = {
            let _guard = io.enter();
            UnixListener::bind(&socket).unwrap()
        };
        let server = Server::builder()
            .add_service(RuntimeServiceServer::new(FakeRuntime::default()))
            .add_service(ImageServiceServer::new(FakeImages))
            .serve_with_incoming(UnixListenerStream::new(listener));
        let _server = io.spawn(server);
        Self {
            endpoint: endpoint_of(&socket),
            _dir: dir,
            io,
        }
    }

    fn runtime(&self) -> RuntimeClient {
        RuntimeClient::connect(self.io.clone(), &self.endpoint, Some(Duration::from_secs(5))).unwrap()
    }

    fn images(&self) -> ImageClient {
        ImageClient::connect(self.io.clone(), &self.endpoint, Some(Duration::from_secs(5))).unwrap()
    }
}

fn endpoint_of(socket: &Path) -> String {
    format!("unix://{}", socket.display())
}

fn sandbox_config(name: &str) -> PodSandboxConfig {
    PodSandboxConfig {
        metadata: Some(PodSandboxMetadata {
            name: name.into(),
            uid: format!("{name}-uid"),
            namespace: "critest".into(),
            attempt: 0,
        }),
        labels: HashMap::from([("suite".to_string(), "critest".to_string())]),
        ..PodSandboxConfig::default()
    }
}

// =============================================================================
// Sandbox lifecycle
// =============================================================================

#[test]
fn sandbox_lifecycle_round_trips() {
    let harness = Harness::start();
    let client = harness.runtime();

    let id = client.run_sandbox(&sandbox_config("web"), "").unwrap();

    let listed = client.list_sandboxes(None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id.to_string());
    assert_eq!(listed[0].state(), PodSandboxState::SandboxReady);

    let status = client.sandbox_status(&id, false).unwrap();
    assert_eq!(status.state(), PodSandboxState::SandboxReady);
    assert_eq!(status.metadata.unwrap().name, "web");
    assert_eq!(status.labels.get("suite").map(String::as_str), Some("critest"));

    client.stop_sandbox(&id).unwrap();
    let status = client.sandbox_status(&id, false).unwrap();
    assert_eq!(status.state(), PodSandboxState::SandboxNotready);

    client.remove_sandbox(&id).unwrap();
    assert!(client.list_sandboxes(None).unwrap().is_empty());
}

#[test]
fn removing_a_sandbox_twice_succeeds() {
    let harness = Harness::start();
    let client = harness.runtime();

    let id = client.run_sandbox(&sandbox_config("twice"), "").unwrap();
    client.stop_sandbox(&id).unwrap();
    client.remove_sandbox(&id).unwrap();
    client.remove_sandbox(&id).unwrap();
}

#[test]
fn list_filters_by_id() {
    let harness = Harness::start();
    let client = harness.runtime();

    let first = client.run_sandbox(&sandbox_config("first"), "").unwrap();
    let _second = client.run_sandbox(&sandbox_config("second"), "").unwrap();

    let filter = critest_cri::proto::PodSandboxFilter {
        id: first.to_string(),
        ..Default::default()
    };
    let listed = client.list_sandboxes(Some(filter)).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, first.to_string());
}

// =============================================================================
// Status mapping
// =============================================================================

#[test]
fn unknown_sandbox_is_not_found() {
    let harness = Harness::start();
    let client = harness.runtime();

    let err = client
        .sandbox_status(&SandboxId::new("does-not-exist"), false)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.is_not_found());
    assert_eq!(err.operation, "PodSandboxStatus");
    assert!(err.message.contains("does-not-exist"));
}

#[test]
fn unimplemented_rpc_keeps_the_runtime_message() {
    let harness = Harness::start();
    let client = harness.runtime();

    let err = client.exec(ExecRequest::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Other);
    assert_eq!(err.message, "Exec is not served by the fake runtime");
}

#[test]
fn version_echoes_the_requested_api() {
    let harness = Harness::start();
    let version = harness.runtime().version("v1").unwrap();
    assert_eq!(version.version, "v1");
    assert_eq!(version.runtime_name, "fake");
}

#[test]
fn image_status_of_absent_image_is_none() {
    let harness = Harness::start();
    let images = harness.images();

    assert!(images.image_status(&ImageSpec::named("busybox:missing")).unwrap().is_none());
    let stored = images.image_status(&ImageSpec::named(STORED_IMAGE)).unwrap().unwrap();
    assert_eq!(stored.repo_tags, vec![STORED_IMAGE.to_string()]);
    assert_eq!(images.list_images(None).unwrap().len(), 1);
}

// =============================================================================
// Deadlines
// =============================================================================

#[test]
fn call_is_bounded_by_the_spec_deadline() {
    let harness = Harness::start();
    let client = harness.runtime();

    let started = std::time::Instant::now();
    let err = deadline::scoped(Deadline::after(Duration::from_millis(200)), || {
        client.status(false).unwrap_err()
    });
    assert_eq!(err.kind, ErrorKind::Deadline);
    assert_eq!(err.operation, "Status");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn connect_to_missing_socket_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint_of(&dir.path().join("absent.sock"));
    let io = transport::new_runtime().unwrap();

    let err = RuntimeClient::connect(io, &endpoint, Some(Duration::from_secs(2))).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Unavailable | ErrorKind::Deadline));
}
