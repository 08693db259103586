//! Stop and remove must succeed for absent or already stopped resources.

use critest_common::types::{ContainerId, SandboxId, new_uid};
use critest_cri::proto::{ContainerState, PodSandboxState};
use critest_fixtures::Framework;
use critest_runner::assertion::equal;
use critest_runner::{Group, expect, expect_ok, step};

/// Registers the idempotence group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Idempotence", |g| {
        g.describe("PodSandbox", |g| {
            g.it("stopping a sandbox twice should succeed [Conformance]", stops_sandbox_twice);
            g.it("removing a sandbox twice should succeed [Conformance]", removes_sandbox_twice);
            g.it("stopping an unknown sandbox should succeed [Conformance]", stops_unknown_sandbox);
            g.it("removing an unknown sandbox should succeed [Conformance]", removes_unknown_sandbox);
        });
        g.describe("Container", |g| {
            g.it("stopping a container twice should succeed [Conformance]", stops_container_twice);
            g.it("removing a container twice should succeed [Conformance]", removes_container_twice);
            g.it("removing an unknown container should succeed [Conformance]", removes_unknown_container);
        });
    });
}

fn stops_sandbox_twice(f: &mut Framework) {
    let (sandbox, _) = f.run_default_sandbox("idempotent-stop");
    f.stop_sandbox(&sandbox);
    f.stop_sandbox(&sandbox);
    expect(f.sandbox_state(&sandbox)).to(equal(PodSandboxState::SandboxNotready));
}

fn removes_sandbox_twice(f: &mut Framework) {
    let (sandbox, _) = f.run_default_sandbox("idempotent-remove");
    f.stop_sandbox(&sandbox);
    f.remove_sandbox(&sandbox);
    f.remove_sandbox(&sandbox);
}

fn stops_unknown_sandbox(f: &mut Framework) {
    step("stop a sandbox id that was never created");
    expect_ok(f.runtime().stop_sandbox(&SandboxId::new(new_uid())), "stop unknown sandbox");
}

fn removes_unknown_sandbox(f: &mut Framework) {
    step("remove a sandbox id that was never created");
    expect_ok(f.runtime().remove_sandbox(&SandboxId::new(new_uid())), "remove unknown sandbox");
}

fn stops_container_twice(f: &mut Framework) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("idempotent-stop");
    let id = f.create_default_container(&sandbox, &sandbox_config, "idempotent-stop");
    f.start_and_wait_running(&id);
    f.stop_container(&id);
    f.stop_container(&id);
    expect(f.container_state(&id)).to(equal(ContainerState::ContainerExited));
}

fn removes_container_twice(f: &mut Framework) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("idempotent-remove");
    let id = f.create_default_container(&sandbox, &sandbox_config, "idempotent-remove");
    f.remove_container(&id);
    f.remove_container(&id);
}

fn removes_unknown_container(f: &mut Framework) {
    step("remove a container id that was never created");
    expect_ok(
        f.runtime().remove_container(&ContainerId::new(new_uid())),
        "remove unknown container",
    );
}
