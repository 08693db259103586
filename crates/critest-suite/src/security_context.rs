//! Linux security context: identity, rootfs, privileges, paths, namespaces.

use critest_common::types::ContainerId;
use critest_cri::proto::{
    Capability, ContainerConfig, Int64Value, PodSandboxConfig, SupplementalGroupsPolicy,
};
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{be_false, be_true, contain, equal};
use critest_runner::{Group, expect, expect_ok, step};

use crate::probe::{effective_caps, has_cap, proc_status, script_exit_code, shell_output, status_field};

const RUN_AS_USER: i64 = 1000;
const RUN_AS_GROUP: i64 = 2000;
const EXTRA_GROUP: i64 = 3000;
const RUN_AS_USERNAME: &str = "nobody";
const CAP_CHOWN: u32 = 0;
const CAP_SYS_ADMIN: u32 = 21;

/// Registers the security context group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Security Context", |g| {
        g.describe("NamespaceOption", |g| {
            g.it("runtime should support HostPID [Conformance]", host_pid);
            g.it("runtime should support PodPID [Conformance]", pod_pid);
            g.it("runtime should support HostIpc is true [Conformance]", host_ipc);
            g.it("runtime should support HostIpc is false [Conformance]", pod_ipc);
            g.it("runtime should support HostNetwork is true [Conformance]", host_network);
        });
        g.describe("RunAsUser", |g| {
            g.it("runtime should support RunAsUser [Conformance]", run_as_user);
            g.it("runtime should support RunAsUserName [Conformance]", run_as_username);
            g.it("runtime should support RunAsGroup [Conformance]", run_as_group);
            g.it("runtime should support SupplementalGroups [Conformance]", supplemental_groups);
        });
        g.describe("ReadOnlyRootfs", |g| {
            g.it("runtime should support that ReadOnlyRootfs is false [Conformance]", |f| {
                readonly_rootfs(f, false);
            });
            g.it("runtime should support that ReadOnlyRootfs is true [Conformance]", |f| {
                readonly_rootfs(f, true);
            });
        });
        g.describe("Privileged", |g| {
            g.it("runtime should support an unprivileged container [Conformance]", |f| {
                privileged(f, false);
            });
            g.it("runtime should support a privileged container [Conformance]", |f| {
                privileged(f, true);
            });
        });
        g.describe("Capability", |g| {
            g.it("runtime should support adding a capability [Conformance]", adds_capability);
            g.it("runtime should support dropping a capability [Conformance]", drops_capability);
        });
        g.describe("Paths", |g| {
            g.it("runtime should support MaskedPaths [Conformance]", masked_paths);
            g.it("runtime should support ReadonlyPaths [Conformance]", readonly_paths);
        });
        g.describe("NoNewPrivs", |g| {
            g.it("runtime should support NoNewPrivs is false [Conformance]", |f| {
                no_new_privs(f, false);
            });
            g.it("runtime should support NoNewPrivs is true [Conformance]", |f| {
                no_new_privs(f, true);
            });
        });
        g.describe("SupplementalGroupsPolicy", |g| {
            g.before_each(|f| f.require_supplemental_groups_policy());
            g.it("runtime should merge image groups with SupplementalGroupsPolicy=Merge", |f| {
                supplemental_groups_policy(f, SupplementalGroupsPolicy::Merge);
            });
            g.it("runtime should use only requested groups with SupplementalGroupsPolicy=Strict", |f| {
                supplemental_groups_policy(f, SupplementalGroupsPolicy::Strict);
            });
        });
    });
}

/// Runs a sleeping container after letting the caller adjust both configs.
fn run_with(
    f: &mut Framework,
    prefix: &str,
    sandbox: impl FnOnce(&mut PodSandboxConfig),
    container: impl FnOnce(&mut ContainerConfig),
) -> ContainerId {
    let mut sandbox_config = config::sandbox_config(prefix);
    sandbox(&mut sandbox_config);
    let sandbox_id = f.run_sandbox(&sandbox_config);
    let image = f.default_image().to_string();
    let mut container_config = config::container_config(prefix, &image, Commands::to_vec(commands().sleep));
    container(&mut container_config);
    let id = f.create_container(&sandbox_id, &container_config, &sandbox_config);
    f.start_and_wait_running(&id);
    id
}

fn run_secured(
    f: &mut Framework,
    prefix: &str,
    container: impl FnOnce(&mut ContainerConfig),
) -> ContainerId {
    run_with(f, prefix, |_| {}, container)
}

/// Runs a container sharing the selected host namespaces.
fn run_in_namespaces(f: &mut Framework, prefix: &str, network: bool, pid: bool, ipc: bool) -> ContainerId {
    let mut template = PodSandboxConfig::default();
    config::use_host_namespaces(&mut template, network, pid, ipc);
    let namespaces = config::sandbox_namespaces(&mut template).clone();
    run_with(
        f,
        prefix,
        |s| config::use_host_namespaces(s, network, pid, ipc),
        |c| config::container_security(c).namespace_options = Some(namespaces),
    )
}

fn caps_of(f: &Framework, id: &ContainerId) -> u64 {
    let status = proc_status(f, id);
    match effective_caps(&status) {
        Some(mask) => mask,
        None => critest_runner::fail(format!("no CapEff line in {status:?}")),
    }
}

/// Segment ids listed in a `/proc/sysvipc/shm` table.
fn shm_ids(table: &str) -> Vec<u32> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1)?.parse().ok())
        .collect()
}

/// Numeric ids printed by `id -G`, sorted.
fn parse_ids(output: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = output.split_whitespace().filter_map(|id| id.parse().ok()).collect();
    ids.sort_unstable();
    ids
}

fn host_file(path: &str) -> String {
    expect_ok(std::fs::read_to_string(path), &format!("read host {path}"))
        .trim()
        .to_string()
}

fn host_pid(f: &mut Framework) {
    let id = run_in_namespaces(f, "host-pid", false, true, false);
    step("compare PID 1 inside the container with the host");
    let init = shell_output(f, &id, "cat /proc/1/comm");
    expect(init.trim()).to(equal(host_file("/proc/1/comm").as_str()));
}

fn pod_pid(f: &mut Framework) {
    let id = run_in_namespaces(f, "pod-pid", false, false, false);
    let init = shell_output(f, &id, "cat /proc/1/comm");
    expect(init.trim()).not_to(equal(host_file("/proc/1/comm").as_str()));
}

fn host_ipc(f: &mut Framework) {
    let segment = f.host_shm_segment(1024);
    let id = run_in_namespaces(f, "host-ipc", false, false, true);
    let table = shell_output(f, &id, "cat /proc/sysvipc/shm");
    expect(shm_ids(&table)).to(contain(segment));
}

fn pod_ipc(f: &mut Framework) {
    let segment = f.host_shm_segment(1024);
    let id = run_in_namespaces(f, "pod-ipc", false, false, false);
    let table = shell_output(f, &id, "cat /proc/sysvipc/shm");
    expect(shm_ids(&table)).not_to(contain(segment));
}

fn host_network(f: &mut Framework) {
    let id = run_in_namespaces(f, "host-net", true, false, false);
    let inside = f.exec_sync_ok(&id, &Commands::to_vec(commands().hostname)).stdout_str();
    expect(inside.trim()).to(equal(host_file("/proc/sys/kernel/hostname").as_str()));
}

fn run_as_user(f: &mut Framework) {
    let id = run_secured(f, "run-as-user", |c| {
        config::container_security(c).run_as_user = Some(Int64Value { value: RUN_AS_USER });
    });
    let uid = shell_output(f, &id, "id -u");
    expect(parse_ids(&uid)).to(equal(vec![RUN_AS_USER]));
}

fn run_as_username(f: &mut Framework) {
    let id = run_secured(f, "run-as-username", |c| {
        config::container_security(c).run_as_username = RUN_AS_USERNAME.into();
    });
    let name = shell_output(f, &id, "id -un");
    expect(name.trim()).to(equal(RUN_AS_USERNAME));
}

fn run_as_group(f: &mut Framework) {
    let id = run_secured(f, "run-as-group", |c| {
        let security = config::container_security(c);
        security.run_as_user = Some(Int64Value { value: RUN_AS_USER });
        security.run_as_group = Some(Int64Value { value: RUN_AS_GROUP });
    });
    let gid = shell_output(f, &id, "id -g");
    expect(parse_ids(&gid)).to(equal(vec![RUN_AS_GROUP]));
}

fn supplemental_groups(f: &mut Framework) {
    let id = run_secured(f, "supplemental-groups", |c| {
        config::container_security(c).supplemental_groups = vec![EXTRA_GROUP, EXTRA_GROUP + 1];
    });
    let groups = parse_ids(&shell_output(f, &id, "id -G"));
    expect(&groups).to(contain(EXTRA_GROUP));
    expect(&groups).to(contain(EXTRA_GROUP + 1));
}

fn readonly_rootfs(f: &mut Framework, readonly: bool) {
    let id = run_secured(f, "readonly-rootfs", |c| {
        config::container_security(c).readonly_rootfs = readonly;
    });
    step("write to the root filesystem");
    let code = script_exit_code(f, &id, "touch /critest-rootfs-probe");
    expect(code == 0)
        .with_context(format!("write with readonly_rootfs={readonly}"))
        .to(equal(!readonly));
}

fn privileged(f: &mut Framework, privileged: bool) {
    let id = run_with(
        f,
        "privileged",
        |s| config::sandbox_security(s).privileged = privileged,
        |c| config::container_security(c).privileged = privileged,
    );
    expect(has_cap(caps_of(f, &id), CAP_SYS_ADMIN))
        .with_context("CAP_SYS_ADMIN in the effective set")
        .to(equal(privileged));
    let code = script_exit_code(f, &id, "mkdir -p /tmp/critest-mnt && mount -t tmpfs none /tmp/critest-mnt");
    expect(code == 0).with_context("mount inside the container").to(equal(privileged));
}

fn adds_capability(f: &mut Framework) {
    let id = run_secured(f, "cap-add", |c| {
        config::container_security(c).capabilities = Some(Capability {
            add_capabilities: vec!["SYS_ADMIN".into()],
            ..Capability::default()
        });
    });
    expect(has_cap(caps_of(f, &id), CAP_SYS_ADMIN)).to(be_true());
}

fn drops_capability(f: &mut Framework) {
    let id = run_secured(f, "cap-drop", |c| {
        config::container_security(c).capabilities = Some(Capability {
            drop_capabilities: vec!["CHOWN".into()],
            ..Capability::default()
        });
    });
    expect(has_cap(caps_of(f, &id), CAP_CHOWN)).to(be_false());
    let code = script_exit_code(f, &id, "touch /tmp/chown-probe && chown 1234 /tmp/chown-probe");
    expect(code).not_to(equal(0));
}

fn masked_paths(f: &mut Framework) {
    let id = run_secured(f, "masked-paths", |c| {
        config::container_security(c).masked_paths = vec!["/bin/ls".into()];
    });
    step("check that the masked file is empty");
    expect(script_exit_code(f, &id, "test -s /bin/ls")).not_to(equal(0));
}

fn readonly_paths(f: &mut Framework) {
    let id = run_secured(f, "readonly-paths", |c| {
        config::container_security(c).readonly_paths = vec!["/tmp".into()];
    });
    expect(script_exit_code(f, &id, "touch /tmp/readonly-probe")).not_to(equal(0));
}

fn no_new_privs(f: &mut Framework, enabled: bool) {
    let id = run_secured(f, "no-new-privs", |c| {
        config::container_security(c).no_new_privs = enabled;
    });
    let status = proc_status(f, &id);
    let expected = if enabled { "1" } else { "0" };
    expect(status_field(&status, "NoNewPrivs")).to(equal(Some(expected)));
}

fn supplemental_groups_policy(f: &mut Framework, policy: SupplementalGroupsPolicy) {
    let id = run_with(
        f,
        "supplemental-groups-policy",
        |s| config::sandbox_security(s).supplemental_groups_policy = policy as i32,
        |c| {
            let security = config::container_security(c);
            security.run_as_user = Some(Int64Value { value: RUN_AS_USER });
            security.run_as_group = Some(Int64Value { value: RUN_AS_GROUP });
            security.supplemental_groups = vec![EXTRA_GROUP];
            security.supplemental_groups_policy = policy as i32;
        },
    );
    let groups = parse_ids(&shell_output(f, &id, "id -G"));
    if policy == SupplementalGroupsPolicy::Strict {
        expect(&groups).to(equal(&vec![RUN_AS_GROUP, EXTRA_GROUP]));
    } else {
        expect(&groups).to(contain(RUN_AS_GROUP));
        expect(&groups).to(contain(EXTRA_GROUP));
    }

    step("check the groups reported in the container status");
    let reported = f
        .container_status(&id)
        .user
        .and_then(|user| user.linux)
        .map(|linux| linux.supplemental_groups)
        .unwrap_or_default();
    expect(&reported).to(contain(EXTRA_GROUP));
}

#[cfg(test)]
mod tests {
    use super::*;
    use critest_cri::proto::NamespaceMode;

    #[test]
    fn shm_table_ids() {
        let table = "       key      shmid perms size\n  1234   32769   644   1024\n     0   5   600  4096\n";
        assert_eq!(shm_ids(table), vec![32769, 5]);
        assert!(shm_ids("       key      shmid perms\n").is_empty());
    }

    #[test]
    fn group_ids_are_sorted() {
        assert_eq!(parse_ids("3000 2000\n"), vec![2000, 3000]);
        assert!(parse_ids("").is_empty());
    }

    #[test]
    fn host_namespace_mode_is_node() {
        let mut sandbox = config::sandbox_config("ns");
        config::use_host_namespaces(&mut sandbox, false, true, false);
        assert_eq!(config::sandbox_namespaces(&mut sandbox).pid(), NamespaceMode::Node);
    }
}
