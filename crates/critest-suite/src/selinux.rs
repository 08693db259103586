//! SELinux process labels and volume relabeling.

use std::path::Path;

use critest_common::types::ContainerId;
use critest_cri::proto::{MountPropagation, SeLinuxOption};
use critest_fixtures::host::selinux::selinux_enforcing;
use critest_fixtures::host::{StderrPolicy, run_host_command};
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{contain, equal};
use critest_runner::{Group, expect, expect_ok, skip, step};

use crate::probe::{script_exit_code, shell_output};

const LEVEL: &str = "s0:c4,c5";
const VOLUME: &str = "/mnt/relabel";

/// Registers the SELinux group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("SELinux", |g| {
        g.before_each(|f| f.require_selinux());
        g.it("should apply the requested process label [Conformance]", process_label);
        g.it("should relabel a volume when requested [Conformance]", relabels_volume);
        g.it("should deny writes to a volume that is not relabeled", denies_unlabeled_volume);
    });
}

fn selinux_options() -> SeLinuxOption {
    SeLinuxOption {
        level: LEVEL.into(),
        ..SeLinuxOption::default()
    }
}

fn run_labeled(f: &mut Framework, volume: Option<(&Path, bool)>) -> ContainerId {
    let mut sandbox_config = config::sandbox_config("selinux");
    config::sandbox_security(&mut sandbox_config).selinux_options = Some(selinux_options());
    let sandbox = f.run_sandbox(&sandbox_config);
    let image = f.default_image().to_string();
    let mut container = config::container_config("selinux", &image, Commands::to_vec(commands().sleep));
    config::container_security(&mut container).selinux_options = Some(selinux_options());
    if let Some((host, relabel)) = volume {
        let mut mount = config::bind_mount(&host.to_string_lossy(), VOLUME, MountPropagation::PropagationPrivate);
        mount.selinux_relabel = relabel;
        container.mounts.push(mount);
    }
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);
    id
}

fn process_label(f: &mut Framework) {
    let id = run_labeled(f, None);
    let label = shell_output(f, &id, "cat /proc/self/attr/current");
    expect(label).to(contain(LEVEL));
}

fn relabels_volume(f: &mut Framework) {
    let host = f.temp_dir("selinux");
    let id = run_labeled(f, Some((&host, true)));
    expect(script_exit_code(f, &id, &format!("touch {VOLUME}/probe"))).to(equal(0));

    step("check the host label of the volume");
    let listing = expect_ok(
        run_host_command("ls", &["-Zd", &host.to_string_lossy()], StderrPolicy::Ignore),
        "read volume label",
    );
    expect(listing).to(contain(LEVEL));
}

fn denies_unlabeled_volume(f: &mut Framework) {
    if !selinux_enforcing() {
        skip("SELinux is not enforcing");
    }
    let host = f.temp_dir("selinux");
    let id = run_labeled(f, Some((&host, false)));
    expect(script_exit_code(f, &id, &format!("touch {VOLUME}/probe"))).not_to(equal(0));
}
