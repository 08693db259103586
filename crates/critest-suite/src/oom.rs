//! Out-of-memory termination.

use critest_common::constants::{DEFAULT_STATE_POLL_TIMEOUT, OOM_KILLED_REASON, SIGKILL_EXIT_CODE};
use critest_cri::proto::ContainerState;
use critest_fixtures::{Framework, commands, config};
use critest_runner::assertion::equal;
use critest_runner::{Group, expect, step};

const MEMORY_LIMIT: i64 = 15 * 1024 * 1024;
const ALLOCATION: &str = "dd if=/dev/zero of=/dev/null bs=20M";

/// Registers the OOM group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("OOMKilled", |g| {
        g.it("should terminate with exitCode 137 and reason OOMKilled [Conformance]", oom_killed);
    });
}

fn oom_killed(f: &mut Framework) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("oom");
    let image = f.default_image().to_string();
    let mut container = config::container_config("oom", &image, commands().script(ALLOCATION));
    let resources = config::container_resources(&mut container);
    resources.memory_limit_in_bytes = MEMORY_LIMIT;
    resources.memory_swap_limit_in_bytes = MEMORY_LIMIT;
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_container(&id);
    f.wait_for_state(&id, ContainerState::ContainerExited, DEFAULT_STATE_POLL_TIMEOUT);

    step("check the termination reason");
    let status = f.container_status(&id);
    expect(status.reason.as_str()).to(equal(OOM_KILLED_REASON));
    expect(status.exit_code).to(equal(SIGKILL_EXIT_CODE));
}
