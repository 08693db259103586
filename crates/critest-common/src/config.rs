//! Suite configuration model.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CritestError, Result};

/// Images used by the suite, overridable with `--test-image-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestImages {
    /// Image used by most container specs.
    pub default_test_container_image: String,
    /// Image serving HTTP on port 80.
    pub web_server_test_image: String,
}

impl Default for TestImages {
    fn default() -> Self {
        Self {
            default_test_container_image: constants::DEFAULT_CONTAINER_IMAGE.into(),
            web_server_test_image: constants::WEB_SERVER_IMAGE.into(),
        }
    }
}

impl TestImages {
    /// Loads an image list from a YAML file.
    ///
    /// Keys missing from the file keep their default value.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML,
    /// or if it leaves an image empty.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CritestError::io(path, e))?;
        let images: Self = serde_yaml::from_str(&content).map_err(|e| CritestError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        images.validate()?;
        tracing::info!(path = %path.display(), ?images, "loaded test image list");
        Ok(images)
    }

    fn validate(&self) -> Result<()> {
        if self.default_test_container_image.trim().is_empty() {
            return Err(CritestError::Config {
                message: "defaultTestContainerImage must not be empty".into(),
            });
        }
        if self.web_server_test_image.trim().is_empty() {
            return Err(CritestError::Config {
                message: "webServerTestImage must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Root configuration for a suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Address of the CRI runtime service.
    pub runtime_endpoint: String,
    /// Address of the CRI image service.
    pub image_endpoint: String,
    /// Runtime handler passed to `RunPodSandbox`, if any.
    pub runtime_handler: Option<String>,
    /// Per-spec deadline.
    pub spec_timeout: Duration,
    /// gRPC connect timeout.
    pub connect_timeout: Duration,
    /// Images used by the suite.
    pub images: TestImages,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            runtime_endpoint: constants::DEFAULT_RUNTIME_ENDPOINT.into(),
            image_endpoint: constants::DEFAULT_RUNTIME_ENDPOINT.into(),
            runtime_handler: None,
            spec_timeout: constants::DEFAULT_SPEC_TIMEOUT,
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            images: TestImages::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_overrides_both_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("images.yaml");
        std::fs::write(
            &path,
            "defaultTestContainerImage: example.com/busybox:1\nwebServerTestImage: example.com/nginx:1\n",
        )
        .expect("write");

        let images = TestImages::load(&path).expect("load");
        assert_eq!(images.default_test_container_image, "example.com/busybox:1");
        assert_eq!(images.web_server_test_image, "example.com/nginx:1");
    }

    #[test]
    fn load_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("images.yaml");
        std::fs::write(&path, "defaultTestContainerImage: example.com/busybox:1\n")
            .expect("write");

        let images = TestImages::load(&path).expect("load");
        assert_eq!(images.web_server_test_image, constants::WEB_SERVER_IMAGE);
    }

    #[test]
    fn load_rejects_empty_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("images.yaml");
        std::fs::write(&path, "defaultTestContainerImage: \"\"\n").expect("write");

        assert!(matches!(
            TestImages::load(&path),
            Err(CritestError::Config { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = TestImages::load(Path::new("/nonexistent/images.yaml")).unwrap_err();
        assert!(matches!(err, CritestError::Io { .. }));
    }

    #[test]
    fn default_config_points_both_services_at_same_endpoint() {
        let config = SuiteConfig::default();
        assert_eq!(config.runtime_endpoint, config.image_endpoint);
        assert!(config.runtime_handler.is_none());
    }
}
