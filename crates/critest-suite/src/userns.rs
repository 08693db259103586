//! User namespaces with id mappings.

use critest_common::types::ContainerId;
use critest_cri::proto::{IdMapping, NamespaceMode, UserNamespace};
use critest_fixtures::host::userns::{IdMapEntry, parse_id_map, self_uid_map};
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::equal;
use critest_runner::{Group, expect, expect_ok};

use crate::probe::shell_output;

const HOST_ID: u32 = 65536;
const MAPPING_LENGTH: u32 = 65536;

/// Registers the user namespace group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("User namespaces", |g| {
        g.before_each(|f| f.require_user_namespaces());
        g.it("should map container root to the requested host range [Conformance]", mapped_pod);
        g.it("should share the host user namespace in node mode [Conformance]", node_mode);
    });
}

fn mapping() -> Vec<IdMapping> {
    vec![IdMapping {
        host_id: HOST_ID,
        container_id: 0,
        length: MAPPING_LENGTH,
    }]
}

fn user_namespace(mode: NamespaceMode) -> UserNamespace {
    let (uids, gids) = if mode == NamespaceMode::Pod {
        (mapping(), mapping())
    } else {
        (Vec::new(), Vec::new())
    };
    UserNamespace {
        mode: mode as i32,
        uids,
        gids,
    }
}

fn run_in_user_namespace(f: &mut Framework, mode: NamespaceMode) -> ContainerId {
    let userns = user_namespace(mode);
    let mut sandbox_config = config::sandbox_config("userns");
    config::sandbox_namespaces(&mut sandbox_config).userns_options = Some(userns.clone());
    let sandbox = f.run_sandbox(&sandbox_config);
    let image = f.default_image().to_string();
    let mut container = config::container_config("userns", &image, Commands::to_vec(commands().sleep));
    let namespaces = config::container_security(&mut container)
        .namespace_options
        .get_or_insert_with(Default::default);
    namespaces.userns_options = Some(userns);
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);
    id
}

fn uid_map_of(f: &Framework, id: &ContainerId) -> Vec<IdMapEntry> {
    let content = shell_output(f, id, "cat /proc/self/uid_map");
    expect_ok(parse_id_map(&content), "parse container uid map")
}

fn mapped_pod(f: &mut Framework) {
    let id = run_in_user_namespace(f, NamespaceMode::Pod);
    expect(uid_map_of(f, &id)).to(equal(vec![IdMapEntry {
        inside: 0,
        outside: HOST_ID,
        length: MAPPING_LENGTH,
    }]));
}

fn node_mode(f: &mut Framework) {
    let id = run_in_user_namespace(f, NamespaceMode::Node);
    let host = expect_ok(self_uid_map(), "read host uid map");
    expect(uid_map_of(f, &id)).to(equal(host));
}
