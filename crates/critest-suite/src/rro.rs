//! Recursive read-only mounts.

use std::path::{Path, PathBuf};

use critest_common::types::SandboxId;
use critest_cri::proto::{ContainerConfig, Mount, MountPropagation, PodSandboxConfig};
use critest_fixtures::host::Propagation;
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::equal;
use critest_runner::{Group, expect, expect_ok, step};

use crate::probe::script_exit_code;

const CONTAINER_PATH: &str = "/mnt/rro";
const SUBMOUNT: &str = "sub";

/// Registers the recursive read-only group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Recursive read-only mounts", |g| {
        g.before_each(|f| f.require_recursive_read_only());
        g.it("should leave submounts writable without RRO [Conformance]", |f| writes(f, false));
        g.it("should make submounts read-only with RRO [Conformance]", |f| writes(f, true));
        g.it("should reject RRO on a writable mount [Conformance]", |f| {
            rejects(f, false, MountPropagation::PropagationPrivate);
        });
        g.it("should reject RRO with host-to-container propagation [Conformance]", |f| {
            rejects(f, true, MountPropagation::PropagationHostToContainer);
        });
        g.it("should reject RRO with bidirectional propagation [Conformance]", |f| {
            rejects(f, true, MountPropagation::PropagationBidirectional);
        });
    });
}

fn rro_mount(host: &Path, readonly: bool, propagation: MountPropagation) -> Mount {
    Mount {
        readonly,
        recursive_read_only: true,
        ..config::bind_mount(&host.to_string_lossy(), CONTAINER_PATH, propagation)
    }
}

/// A host directory with a tmpfs submount.
fn host_tree(f: &mut Framework) -> PathBuf {
    let host = f.host_bind_mount("rro", Propagation::Private);
    let sub = host.join(SUBMOUNT);
    expect_ok(std::fs::create_dir(&sub), "create submount directory");
    f.host_tmpfs(&sub);
    host
}

fn prepare(f: &mut Framework, mount: Mount) -> (SandboxId, PodSandboxConfig, ContainerConfig) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("rro");
    let image = f.default_image().to_string();
    let mut container = config::container_config("rro", &image, Commands::to_vec(commands().sleep));
    container.mounts.push(mount);
    (sandbox, sandbox_config, container)
}

fn writes(f: &mut Framework, recursive: bool) {
    let host = host_tree(f);
    let mount = Mount {
        readonly: true,
        recursive_read_only: recursive,
        ..config::bind_mount(&host.to_string_lossy(), CONTAINER_PATH, MountPropagation::PropagationPrivate)
    };
    let (sandbox, sandbox_config, container) = prepare(f, mount);
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);

    step("write to the top of the mount");
    expect(script_exit_code(f, &id, &format!("touch {CONTAINER_PATH}/probe"))).not_to(equal(0));

    step("write to the submount");
    let code = script_exit_code(f, &id, &format!("touch {CONTAINER_PATH}/{SUBMOUNT}/probe"));
    expect(code == 0)
        .with_context(format!("submount writable with recursive_read_only={recursive}"))
        .to(equal(!recursive));
}

fn rejects(f: &mut Framework, readonly: bool, propagation: MountPropagation) {
    let host = f.temp_dir("rro");
    let (sandbox, sandbox_config, container) = prepare(f, rro_mount(&host, readonly, propagation));
    step("create a container with an invalid recursive read-only mount");
    let error = f.create_container_expect_error(&sandbox, &container, &sandbox_config);
    tracing::info!(%error, "runtime rejected the mount");
}
