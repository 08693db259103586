//! Wire messages and gRPC stubs of the `runtime.v1` CRI API.
//!
//! Generated at build time from `proto/api.proto`, which follows
//! `k8s.io/cri-api/pkg/apis/runtime/v1/api.proto` field for field. Only the
//! messages the suite exercises are declared; prost skips unknown fields on
//! decode, so a newer runtime stays compatible.

mod generated {
    #![allow(
        missing_docs,
        unused_results,
        clippy::all,
        clippy::pedantic,
        clippy::nursery,
        clippy::unwrap_used,
        clippy::expect_used
    )]

    tonic::include_proto!("runtime.v1");
}

pub use generated::*;
pub use security_profile::ProfileType;

/// Condition type reported while the runtime is ready.
pub const RUNTIME_READY: &str = "RuntimeReady";
/// Condition type reported while the pod network is ready.
pub const NETWORK_READY: &str = "NetworkReady";

impl StatusResponse {
    /// Value of the named runtime condition, if reported.
    #[must_use]
    pub fn condition(&self, kind: &str) -> Option<bool> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == kind)
            .map(|c| c.status)
    }

    /// Features advertised for a runtime handler; the empty name is the default handler.
    #[must_use]
    pub fn handler_features(&self, handler: &str) -> Option<&RuntimeHandlerFeatures> {
        self.runtime_handlers
            .iter()
            .find(|h| h.name == handler)
            .and_then(|h| h.features.as_ref())
    }
}

impl SecurityProfile {
    /// A `Localhost` profile referencing `reference`.
    #[must_use]
    pub fn localhost(reference: impl Into<String>) -> Self {
        Self {
            profile_type: ProfileType::Localhost as i32,
            localhost_ref: reference.into(),
        }
    }

    /// A profile of the given non-localhost type.
    #[must_use]
    pub fn of(kind: ProfileType) -> Self {
        Self {
            profile_type: kind as i32,
            localhost_ref: String::new(),
        }
    }
}

impl ImageSpec {
    /// An image spec naming `image`.
    #[must_use]
    pub fn named(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }
}
