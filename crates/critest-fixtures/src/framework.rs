//! The per-spec context handed to every hook and leaf.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use critest_common::config::SuiteConfig;
use critest_common::constants::CRI_API_VERSION;
use critest_cri::proto::{RuntimeHandlerFeatures, StatusResponse};
use critest_cri::{ImageClient, RuntimeClient, RuntimeError, StreamingClient, transport};
use critest_runner::{CleanupStack, SpecContext, SpecInfo, expect_ok, skip};

/// Connections shared by every spec of a run.
#[derive(Debug, Clone)]
pub struct Clients {
    runtime: RuntimeClient,
    images: ImageClient,
    config: Arc<SuiteConfig>,
}

impl Clients {
    /// Connects to the runtime and image services named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is malformed or unreachable.
    pub fn connect(config: SuiteConfig) -> Result<Self, RuntimeError> {
        let io = transport::new_runtime()?;
        let runtime = RuntimeClient::connect(
            io.clone(),
            &config.runtime_endpoint,
            Some(config.connect_timeout),
        )?;
        let images =
            ImageClient::connect(io, &config.image_endpoint, Some(config.connect_timeout))?;
        let version = runtime.version(CRI_API_VERSION)?;
        tracing::info!(
            runtime = %version.runtime_name,
            version = %version.runtime_version,
            api = %version.runtime_api_version,
            "runtime reachable"
        );
        Ok(Self {
            runtime,
            images,
            config: Arc::new(config),
        })
    }

    /// Builds a fresh context for the scope described by `info`.
    #[must_use]
    pub fn framework(&self, info: &SpecInfo) -> Framework {
        Framework {
            runtime: self.runtime.clone(),
            images: self.images.clone(),
            config: self.config.clone(),
            cleanup: CleanupStack::new(),
            full_text: info.full_text.clone(),
        }
    }
}

/// Clients, configuration, and the cleanup stack of one spec.
#[derive(Debug)]
pub struct Framework {
    runtime: RuntimeClient,
    images: ImageClient,
    config: Arc<SuiteConfig>,
    cleanup: CleanupStack,
    full_text: String,
}

impl SpecContext for Framework {
    fn cleanup(&mut self) -> &mut CleanupStack {
        &mut self.cleanup
    }
}

impl Framework {
    /// Builds a context from already connected clients.
    #[must_use]
    pub fn new(runtime: RuntimeClient, images: ImageClient, config: Arc<SuiteConfig>) -> Self {
        Self {
            runtime,
            images,
            config,
            cleanup: CleanupStack::new(),
            full_text: String::new(),
        }
    }

    /// The runtime service client.
    #[must_use]
    pub const fn runtime(&self) -> &RuntimeClient {
        &self.runtime
    }

    /// The image service client.
    #[must_use]
    pub const fn images(&self) -> &ImageClient {
        &self.images
    }

    /// A streaming client on the shared I/O runtime.
    #[must_use]
    pub fn streaming(&self) -> StreamingClient {
        self.runtime.streaming()
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Runtime handler passed to `RunPodSandbox`; empty for the default one.
    #[must_use]
    pub fn handler(&self) -> &str {
        self.config.runtime_handler.as_deref().unwrap_or_default()
    }

    /// Full path text of the running spec.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Default test image.
    #[must_use]
    pub fn default_image(&self) -> &str {
        &self.config.images.default_test_container_image
    }

    /// Image serving HTTP on port 80.
    #[must_use]
    pub fn web_server_image(&self) -> &str {
        &self.config.images.web_server_test_image
    }

    /// Registers `release` to run when the spec ends, newest first.
    pub fn defer<E, F>(&mut self, description: impl Into<String>, release: F)
    where
        E: Display,
        F: FnOnce() -> Result<(), E> + 'static,
    {
        self.cleanup.defer(description, release);
    }

    /// Creates a scratch directory removed when the spec ends.
    pub fn temp_dir(&mut self, prefix: &str) -> PathBuf {
        let dir = expect_ok(
            tempfile::Builder::new().prefix(&format!("critest-{prefix}-")).tempdir(),
            "create scratch directory",
        );
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "created scratch directory");
        self.defer(format!("remove {}", path.display()), move || dir.close());
        path
    }

    /// Writes `content` to a fresh file in a scratch directory.
    pub fn temp_file(&mut self, prefix: &str, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir(prefix).join(name);
        expect_ok(std::fs::write(&path, content), &format!("write {}", path.display()));
        path
    }

    /// Verbose runtime status, including handler and runtime features.
    pub fn runtime_status(&self) -> StatusResponse {
        expect_ok(self.runtime.status(true), "query runtime status")
    }

    /// Features advertised for the configured handler, skipping the spec
    /// when the runtime reports none.
    pub fn handler_features(&self) -> RuntimeHandlerFeatures {
        let status = self.runtime_status();
        match status.handler_features(self.handler()) {
            Some(features) => features.clone(),
            None => skip(format!(
                "runtime does not report features for handler {:?}",
                self.handler()
            )),
        }
    }

    /// Skips unless the handler supports recursive read-only mounts.
    pub fn require_recursive_read_only(&self) {
        if !self.handler_features().recursive_read_only_mounts {
            skip("runtime handler does not support recursive read-only mounts");
        }
    }

    /// Skips unless the handler supports user namespaces.
    pub fn require_user_namespaces(&self) {
        if !self.handler_features().user_namespaces {
            skip("runtime handler does not support user namespaces");
        }
    }

    /// Skips unless the runtime supports `SupplementalGroupsPolicy`.
    pub fn require_supplemental_groups_policy(&self) {
        let supported = self
            .runtime_status()
            .features
            .is_some_and(|f| f.supplemental_groups_policy);
        if !supported {
            skip("runtime does not support SupplementalGroupsPolicy");
        }
    }
}
