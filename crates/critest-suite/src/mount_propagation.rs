//! Mount propagation between the host and containers.

use std::path::{Path, PathBuf};

use critest_common::types::ContainerId;
use critest_cri::proto::MountPropagation;
use critest_fixtures::host::Propagation;
use critest_fixtures::host::mount::unmount_if_mounted;
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{be_empty, contain, equal};
use critest_runner::{Group, expect, expect_ok, step};

use crate::probe::{list_dir, script_exit_code};

const CONTAINER_PATH: &str = "/mnt/propagation";
const FROM_HOST: &str = "from-host";
const FROM_CONTAINER: &str = "from-container";
const MARKER: &str = "marker";

/// Registers the mount propagation group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Mount propagation", |g| {
        g.it("mount with 'rprivate' should not support propagation [Conformance]", |f| {
            propagation(f, MountPropagation::PropagationPrivate);
        });
        g.it("mount with 'rshared' should support propagation from host to container and vice versa [Conformance]", |f| {
            propagation(f, MountPropagation::PropagationBidirectional);
        });
        g.it("mount with 'rslave' should support propagation from host to container [Conformance]", |f| {
            propagation(f, MountPropagation::PropagationHostToContainer);
        });
    });
}

/// Which directions a mount created after container start travels.
const fn visibility(mode: MountPropagation) -> (bool, bool) {
    match mode {
        MountPropagation::PropagationPrivate => (false, false),
        MountPropagation::PropagationHostToContainer => (true, false),
        MountPropagation::PropagationBidirectional => (true, true),
    }
}

fn run_privileged_with(f: &mut Framework, host: &Path, mode: MountPropagation) -> ContainerId {
    let mut sandbox_config = config::sandbox_config("propagation");
    config::sandbox_security(&mut sandbox_config).privileged = true;
    let sandbox = f.run_sandbox(&sandbox_config);
    let image = f.default_image().to_string();
    let mut container = config::container_config("propagation", &image, Commands::to_vec(commands().sleep));
    config::container_security(&mut container).privileged = true;
    container
        .mounts
        .push(config::bind_mount(&host.to_string_lossy(), CONTAINER_PATH, mode));
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);
    id
}

fn host_entries(dir: &Path) -> Vec<String> {
    let entries = expect_ok(std::fs::read_dir(dir), &format!("list {}", dir.display()));
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn propagation(f: &mut Framework, mode: MountPropagation) {
    let (to_container, to_host) = visibility(mode);
    let host = f.host_bind_mount("propagation", Propagation::Shared);
    let host_side = host.join(FROM_HOST);
    let container_side = host.join(FROM_CONTAINER);
    for dir in [&host_side, &container_side] {
        expect_ok(std::fs::create_dir(dir), &format!("create {}", dir.display()));
    }
    let id = run_privileged_with(f, &host, mode);

    step("mount a tmpfs on the host after the container started");
    f.host_tmpfs(&host_side);
    expect_ok(std::fs::write(host_side.join(MARKER), "host"), "write host marker");
    let seen = list_dir(f, &id, &format!("{CONTAINER_PATH}/{FROM_HOST}"));
    if to_container {
        expect(&seen).to(contain(MARKER.to_string()));
    } else {
        expect(&seen).to(be_empty());
    }

    step("mount a tmpfs inside the container");
    release_propagated(f, container_side.clone());
    let script = format!(
        "mount -t tmpfs none {CONTAINER_PATH}/{FROM_CONTAINER} && touch {CONTAINER_PATH}/{FROM_CONTAINER}/{MARKER}"
    );
    expect(script_exit_code(f, &id, &script)).to(equal(0));
    if to_host {
        expect(host_entries(&container_side)).to(contain(MARKER.to_string()));
    } else {
        expect(host_entries(&container_side)).to(be_empty());
    }
}

/// Unmounts on the host whatever propagated back from a container, if anything did.
fn release_propagated(f: &mut Framework, path: PathBuf) {
    f.defer(format!("unmount {}", path.display()), move || {
        unmount_if_mounted(&path)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bidirectional_reaches_the_host() {
        assert_eq!(visibility(MountPropagation::PropagationPrivate), (false, false));
        assert_eq!(visibility(MountPropagation::PropagationHostToContainer), (true, false));
        assert_eq!(visibility(MountPropagation::PropagationBidirectional), (true, true));
    }
}
