//! Seccomp filtering of container processes.

use critest_common::types::ContainerId;
use critest_cri::proto::{Capability, ProfileType, SecurityProfile};
use critest_fixtures::host::SeccompProfile;
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{contain, equal};
use critest_runner::{Group, expect, step};

use crate::probe::{proc_status, script_exit_code, status_field};

/// `Seccomp:` value of a process without a filter.
const MODE_DISABLED: &str = "0";
/// `Seccomp:` value of a process with a BPF filter.
const MODE_FILTER: &str = "2";
const BLOCKED_SYSCALL: &str = "sethostname";

/// Registers the seccomp group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Seccomp", |g| {
        g.it("should support unconfined seccomp [Conformance]", |f| {
            expect_mode(f, Some(SecurityProfile::of(ProfileType::Unconfined)), false, MODE_DISABLED);
        });
        g.it("should support the runtime default seccomp profile [Conformance]", |f| {
            expect_mode(f, Some(SecurityProfile::of(ProfileType::RuntimeDefault)), false, MODE_FILTER);
        });
        g.it("should run unconfined when no profile is set [Conformance]", |f| {
            expect_mode(f, None, false, MODE_DISABLED);
        });
        g.it("should ignore the profile of a privileged container [Conformance]", |f| {
            expect_mode(f, Some(SecurityProfile::of(ProfileType::RuntimeDefault)), true, MODE_DISABLED);
        });
        g.it("should block a syscall with a localhost profile [Conformance]", blocks_syscall);
    });
}

fn run_with_profile(
    f: &mut Framework,
    profile: Option<SecurityProfile>,
    privileged: bool,
    add_sys_admin: bool,
) -> ContainerId {
    let mut sandbox_config = config::sandbox_config("seccomp");
    config::sandbox_security(&mut sandbox_config).privileged = privileged;
    let sandbox = f.run_sandbox(&sandbox_config);
    let image = f.default_image().to_string();
    let mut container = config::container_config("seccomp", &image, Commands::to_vec(commands().sleep));
    let security = config::container_security(&mut container);
    security.seccomp = profile;
    security.privileged = privileged;
    if add_sys_admin {
        security.capabilities = Some(Capability {
            add_capabilities: vec!["SYS_ADMIN".into()],
            ..Capability::default()
        });
    }
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);
    id
}

fn expect_mode(f: &mut Framework, profile: Option<SecurityProfile>, privileged: bool, mode: &str) {
    let id = run_with_profile(f, profile, privileged, false);
    let status = proc_status(f, &id);
    expect(status_field(&status, "Seccomp")).to(equal(Some(mode)));
}

fn blocks_syscall(f: &mut Framework) {
    let path = f.write_seccomp_profile("block-sethostname.json", &SeccompProfile::blocking(&[BLOCKED_SYSCALL]));
    let profile = SecurityProfile::localhost(path.to_string_lossy());
    let id = run_with_profile(f, Some(profile), false, true);

    step(format!("call {BLOCKED_SYSCALL} inside the container"));
    let output = f.exec_sync(&id, &commands().script("hostname critest-blocked"));
    expect(output.exit_code).not_to(equal(0));
    expect(output.stderr_str()).to(contain("Operation not permitted"));

    step("other syscalls still work");
    expect(script_exit_code(f, &id, "touch /tmp/seccomp-probe")).to(equal(0));
}
