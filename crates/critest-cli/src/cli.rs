//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use critest_common::config::{SuiteConfig, TestImages};
use critest_common::constants::{
    BIN_NAME, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RUNTIME_ENDPOINT, DEFAULT_SPEC_TIMEOUT,
};
use critest_runner::Filter;

/// Validates a container runtime against the CRI.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Runtime service endpoint, e.g. `unix:///run/containerd/containerd.sock`.
    #[arg(long, env = "CONTAINER_RUNTIME_ENDPOINT", default_value = DEFAULT_RUNTIME_ENDPOINT)]
    pub runtime_endpoint: String,

    /// Image service endpoint; defaults to the runtime endpoint.
    #[arg(long, env = "IMAGE_SERVICE_ENDPOINT")]
    pub image_endpoint: Option<String>,

    /// Runtime handler used for every sandbox.
    #[arg(long)]
    pub runtime_handler: Option<String>,

    /// Only run specs whose full text matches this regex.
    #[arg(long)]
    pub focus: Option<String>,

    /// Skip specs whose full text matches this regex.
    #[arg(long)]
    pub skip: Option<String>,

    /// YAML file overriding the test images.
    #[arg(long)]
    pub test_image_list: Option<PathBuf>,

    /// Deadline of a single spec, in seconds.
    #[arg(long, default_value_t = DEFAULT_SPEC_TIMEOUT.as_secs())]
    pub spec_timeout: u64,

    /// Timeout for connecting to the endpoints, in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout: u64,

    /// Write a JSON report to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the selected specs and exit.
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// The focus/skip filter.
    ///
    /// # Errors
    ///
    /// Returns an error if either pattern is not a valid regex.
    pub fn filter(&self) -> Result<Filter, regex::Error> {
        Filter::new(self.focus.as_deref(), self.skip.as_deref())
    }

    /// The run configuration described by the arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the image list cannot be loaded.
    pub fn suite_config(&self) -> anyhow::Result<SuiteConfig> {
        let images = match &self.test_image_list {
            Some(path) => TestImages::load(path)
                .with_context(|| format!("load test image list {}", path.display()))?,
            None => TestImages::default(),
        };
        let runtime_handler = self.runtime_handler.clone().filter(|h| !h.is_empty());
        Ok(SuiteConfig {
            runtime_endpoint: self.runtime_endpoint.clone(),
            image_endpoint: self
                .image_endpoint
                .clone()
                .unwrap_or_else(|| self.runtime_endpoint.clone()),
            runtime_handler,
            spec_timeout: Duration::from_secs(self.spec_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("critest").chain(args.iter().copied())).expect("parse")
    }

    #[test]
    fn image_endpoint_defaults_to_runtime_endpoint() {
        let cli = parse(&["--runtime-endpoint", "unix:///run/crio/crio.sock"]);
        let config = cli.suite_config().unwrap();
        assert_eq!(config.runtime_endpoint, "unix:///run/crio/crio.sock");
        if std::env::var_os("IMAGE_SERVICE_ENDPOINT").is_none() {
            assert_eq!(config.image_endpoint, config.runtime_endpoint);
        }
        assert_eq!(config.spec_timeout, DEFAULT_SPEC_TIMEOUT);
        assert!(config.runtime_handler.is_none());
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = parse(&[
            "--runtime-endpoint",
            "unix:///a.sock",
            "--image-endpoint",
            "unix:///b.sock",
            "--runtime-handler",
            "kata",
            "--spec-timeout",
            "30",
            "--connect-timeout",
            "2",
            "--list",
        ]);
        let config = cli.suite_config().unwrap();
        assert_eq!(config.image_endpoint, "unix:///b.sock");
        assert_eq!(config.runtime_handler.as_deref(), Some("kata"));
        assert_eq!(config.spec_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert!(cli.list);
    }

    #[test]
    fn image_list_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.yaml");
        std::fs::write(&path, "defaultTestContainerImage: example.com/busybox:1\n").unwrap();
        let cli = parse(&["--test-image-list", path.to_str().unwrap()]);
        let config = cli.suite_config().unwrap();
        assert_eq!(config.images.default_test_container_image, "example.com/busybox:1");
        assert_eq!(config.images.web_server_test_image, TestImages::default().web_server_test_image);
    }

    #[test]
    fn missing_image_list_is_an_error() {
        let cli = parse(&["--test-image-list", "/nonexistent/critest-images.yaml"]);
        assert!(cli.suite_config().is_err());
    }

    #[test]
    fn filter_patterns_are_validated() {
        assert!(parse(&["--focus", "Conformance"]).filter().is_ok());
        assert!(parse(&["--skip", "("]).filter().is_err());
    }
}
