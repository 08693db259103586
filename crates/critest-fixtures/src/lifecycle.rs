//! Resource lifecycle helpers.
//!
//! Every helper that creates a remote resource registers its release on the
//! spec's cleanup stack right away, so a spec that fails halfway still
//! leaves the runtime clean. RPC errors become assertion failures.
//!
//! Containers move through `created → running → exited`; stop and remove
//! are idempotent on the runtime side and the release hooks rely on it.

use std::time::Duration;

use critest_common::constants::{
    DEFAULT_EXEC_SYNC_TIMEOUT, DEFAULT_STATE_POLL_TIMEOUT, DEFAULT_STOP_TIMEOUT,
    STATE_POLL_INTERVAL,
};
use critest_common::types::{ContainerId, ImageRef, SandboxId};
use critest_cri::proto::{
    ContainerConfig, ContainerState, ContainerStatus, ImageSpec, PodSandboxConfig,
    PodSandboxState, PodSandboxStatus,
};
use critest_cri::{ExecSyncOutput, RuntimeError};
use critest_runner::assertion::equal;
use critest_runner::{eventually, expect_err, expect_ok, step};

use crate::config;
use crate::framework::Framework;

impl Framework {
    // ── sandboxes ────────────────────────────────────────────────────

    /// Runs a sandbox with the default configuration.
    pub fn run_default_sandbox(&mut self, prefix: &str) -> (SandboxId, PodSandboxConfig) {
        let config = config::sandbox_config(prefix);
        let id = self.run_sandbox(&config);
        (id, config)
    }

    /// Runs a sandbox from `config`; stop and remove are deferred.
    pub fn run_sandbox(&mut self, config: &PodSandboxConfig) -> SandboxId {
        step("run pod sandbox");
        let id = expect_ok(
            self.runtime().run_sandbox(config, self.handler()),
            "run pod sandbox",
        );
        tracing::info!(sandbox = %id, "sandbox running");
        let runtime = self.runtime().clone();
        let released = id.clone();
        self.defer(format!("stop and remove sandbox {id}"), move || {
            runtime.stop_sandbox(&released)?;
            runtime.remove_sandbox(&released)
        });
        id
    }

    /// Runs a sandbox from `config`, returning the runtime's error.
    ///
    /// A sandbox that unexpectedly starts is still cleaned up.
    pub fn run_sandbox_result(&mut self, config: &PodSandboxConfig) -> Result<SandboxId, RuntimeError> {
        let outcome = self.runtime().run_sandbox(config, self.handler());
        if let Ok(id) = &outcome {
            let runtime = self.runtime().clone();
            let released = id.clone();
            self.defer(format!("stop and remove sandbox {id}"), move || {
                runtime.stop_sandbox(&released)?;
                runtime.remove_sandbox(&released)
            });
        }
        outcome
    }

    /// Stops a sandbox.
    pub fn stop_sandbox(&self, id: &SandboxId) {
        step("stop pod sandbox");
        expect_ok(self.runtime().stop_sandbox(id), "stop pod sandbox");
    }

    /// Removes a sandbox.
    pub fn remove_sandbox(&self, id: &SandboxId) {
        step("remove pod sandbox");
        expect_ok(self.runtime().remove_sandbox(id), "remove pod sandbox");
    }

    /// Status of a sandbox.
    pub fn sandbox_status(&self, id: &SandboxId) -> PodSandboxStatus {
        expect_ok(self.runtime().sandbox_status(id, false), "get pod sandbox status")
    }

    /// Current state of a sandbox.
    pub fn sandbox_state(&self, id: &SandboxId) -> PodSandboxState {
        self.sandbox_status(id).state()
    }

    // ── images ───────────────────────────────────────────────────────

    /// Pulls `image` unless the runtime already has it.
    pub fn pull_image_for_test(&self, image: &str) -> ImageRef {
        let spec = ImageSpec::named(image);
        let present = expect_ok(self.images().image_status(&spec), "get image status");
        if let Some(found) = present {
            tracing::debug!(image, id = %found.id, "image already present");
            return ImageRef::new(found.id);
        }
        step(format!("pull image {image}"));
        expect_ok(self.images().pull_image(&spec, None, None), "pull image")
    }

    /// Removes `image` from the runtime.
    pub fn remove_image_for_test(&self, image: &str) {
        step(format!("remove image {image}"));
        expect_ok(
            self.images().remove_image(&ImageSpec::named(image)),
            "remove image",
        );
    }

    // ── containers ───────────────────────────────────────────────────

    /// Creates a container running the default sleep command.
    pub fn create_default_container(
        &mut self,
        sandbox: &SandboxId,
        sandbox_config: &PodSandboxConfig,
        prefix: &str,
    ) -> ContainerId {
        let image = self.default_image().to_string();
        let command = crate::defaults::Commands::to_vec(crate::defaults::commands().sleep);
        let config = config::container_config(prefix, &image, command);
        self.create_container(sandbox, &config, sandbox_config)
    }

    /// Creates a container from `config`, pulling its image first;
    /// removal is deferred.
    pub fn create_container(
        &mut self,
        sandbox: &SandboxId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> ContainerId {
        let outcome = self.create_container_result(sandbox, config, sandbox_config);
        expect_ok(outcome, "create container")
    }

    /// Like [`create_container`](Self::create_container) but returns the error.
    pub fn create_container_result(
        &mut self,
        sandbox: &SandboxId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId, RuntimeError> {
        if let Some(image) = &config.image {
            let _ = self.pull_image_for_test(&image.image);
        }
        step("create container");
        let id = self.runtime().create_container(sandbox, config, sandbox_config)?;
        tracing::info!(container = %id, sandbox = %sandbox, "container created");
        let runtime = self.runtime().clone();
        let released = id.clone();
        self.defer(format!("remove container {id}"), move || {
            runtime.remove_container(&released)
        });
        Ok(id)
    }

    /// Creates a container that the runtime must refuse; returns the error.
    pub fn create_container_expect_error(
        &mut self,
        sandbox: &SandboxId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> RuntimeError {
        let outcome = self.create_container_result(sandbox, config, sandbox_config);
        expect_err(outcome, "create container")
    }

    /// Starts a container.
    pub fn start_container(&self, id: &ContainerId) {
        step("start container");
        expect_ok(self.runtime().start_container(id), "start container");
    }

    /// Stops a container with the default grace period.
    pub fn stop_container(&self, id: &ContainerId) {
        self.stop_container_within(id, DEFAULT_STOP_TIMEOUT);
    }

    /// Stops a container with the given grace period.
    pub fn stop_container_within(&self, id: &ContainerId, timeout: Duration) {
        step("stop container");
        expect_ok(self.runtime().stop_container(id, timeout), "stop container");
    }

    /// Removes a container.
    pub fn remove_container(&self, id: &ContainerId) {
        step("remove container");
        expect_ok(self.runtime().remove_container(id), "remove container");
    }

    /// Status of a container.
    pub fn container_status(&self, id: &ContainerId) -> ContainerStatus {
        expect_ok(self.runtime().container_status(id, false), "get container status")
    }

    /// Current state of a container.
    pub fn container_state(&self, id: &ContainerId) -> ContainerState {
        self.container_status(id).state()
    }

    /// Polls until the container reaches `state`, within `budget`.
    pub fn wait_for_state(&self, id: &ContainerId, state: ContainerState, budget: Duration) {
        step(format!("wait for container to be {}", state.as_str_name()));
        let _ = eventually(|| self.container_state(id))
            .within(budget)
            .every(STATE_POLL_INTERVAL)
            .should(equal(state));
    }

    /// Starts a container and waits for it to run.
    pub fn start_and_wait_running(&self, id: &ContainerId) {
        self.start_container(id);
        self.wait_for_state(id, ContainerState::ContainerRunning, DEFAULT_STATE_POLL_TIMEOUT);
    }

    /// Runs `cmd` in a container with the default exec budget.
    pub fn exec_sync(&self, id: &ContainerId, cmd: &[String]) -> ExecSyncOutput {
        step(format!("exec {cmd:?}"));
        expect_ok(
            self.runtime().exec_sync(id, cmd, DEFAULT_EXEC_SYNC_TIMEOUT),
            "exec sync",
        )
    }

    /// Runs `cmd` and fails the spec unless it exits zero.
    pub fn exec_sync_ok(&self, id: &ContainerId, cmd: &[String]) -> ExecSyncOutput {
        let output = self.exec_sync(id, cmd);
        expect_ok(output.check(), &format!("exec {cmd:?}"));
        output
    }
}
