//! Async gRPC stubs for `runtime.v1.RuntimeService` and `runtime.v1.ImageService`.
//!
//! The clients are the tonic-generated ones bound to a [`Channel`]; the
//! server halves are re-exported for in-process fakes.

use tonic::transport::Channel;

use crate::proto::{image_service_client, runtime_service_client};

pub use crate::proto::image_service_server::{ImageService, ImageServiceServer};
pub use crate::proto::runtime_service_server::{RuntimeService, RuntimeServiceServer};

/// Client of `runtime.v1.RuntimeService`.
pub type RuntimeServiceClient = runtime_service_client::RuntimeServiceClient<Channel>;

/// Client of `runtime.v1.ImageService`.
pub type ImageServiceClient = image_service_client::ImageServiceClient<Channel>;
