//! Synchronous facade over `runtime.v1.ImageService`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tonic::{Response, Status};

use critest_common::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PULL_TIMEOUT, DEFAULT_RPC_TIMEOUT};
use critest_common::types::ImageRef;

use crate::error::RuntimeError;
use crate::grpc::ImageServiceClient;
use crate::proto::{
    AuthConfig, Image, ImageFilter, ImageFsInfoRequest, ImageFsInfoResponse, ImageSpec,
    ImageStatusRequest, ListImagesRequest, PodSandboxConfig, PullImageRequest, RemoveImageRequest,
};
use crate::runtime::call;
use crate::transport;

/// Blocking client of the image service.
#[derive(Debug, Clone)]
pub struct ImageClient {
    runtime: Arc<Runtime>,
    inner: ImageServiceClient,
}

impl ImageClient {
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
        let channel = runtime.block_on(transport::connect(
            endpoint,
            timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        ))?;
        tracing::info!(endpoint, "connected to image service");
        Ok(Self {
            runtime,
            inner: ImageServiceClient::new(channel),
        })
    }

    fn call<T, F, Fut>(&self, operation: &'static str, default: Duration, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(ImageServiceClient) -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        call(&self.runtime, &self.inner, operation, default, f)
    }

    /// Pulls `image`, returning the reference the runtime stored it under.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn pull_image(
        &self,
        image: &ImageSpec,
        auth: Option<AuthConfig>,
        sandbox_config: Option<PodSandboxConfig>,
    ) -> Result<ImageRef, RuntimeError> {
        let request = PullImageRequest {
            image: Some(image.clone()),
            auth,
            sandbox_config,
        };
        tracing::info!(image = %image.image, "pulling image");
        let pulled = self.call("PullImage", DEFAULT_PULL_TIMEOUT, move |mut c| async move {
            c.pull_image(request).await
        })?;
        Ok(ImageRef::new(pulled.image_ref))
    }

    /// Status of `image`; `None` when the runtime does not have it.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>, RuntimeError> {
        let request = ImageStatusRequest {
            image: Some(image.clone()),
            verbose: false,
        };
        self.call("ImageStatus", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.image_status(request).await
        })
        .map(|r| r.image)
    }

    /// Images matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn list_images(&self, filter: Option<ImageFilter>) -> Result<Vec<Image>, RuntimeError> {
        self.call("ListImages", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.list_images(ListImagesRequest { filter }).await
        })
        .map(|r| r.images)
    }

    /// Removes `image`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn remove_image(&self, image: &ImageSpec) -> Result<(), RuntimeError> {
        let request = RemoveImageRequest {
            image: Some(image.clone()),
        };
        self.call("RemoveImage", DEFAULT_RPC_TIMEOUT, move |mut c| async move {
            c.remove_image(request).await
        })
        .map(drop)
    }

    /// Usage of the filesystems holding images and container layers.
    ///
    /// # Errors
    ///
    /// Returns the RPC error.
    pub fn image_fs_info(&self) -> Result<ImageFsInfoResponse, RuntimeError> {
        self.call("ImageFsInfo", DEFAULT_RPC_TIMEOUT, |mut c| async move {
            c.image_fs_info(ImageFsInfoRequest {}).await
        })
    }
}
