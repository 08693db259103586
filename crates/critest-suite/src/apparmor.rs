//! AppArmor confinement of containers.

use critest_common::constants::DEFAULT_STATE_POLL_TIMEOUT;
use critest_common::types::SandboxId;
use critest_cri::proto::{ContainerState, PodSandboxConfig, ProfileType, SecurityProfile};
use critest_fixtures::{Framework, commands, config};
use critest_runner::assertion::equal;
use critest_runner::{Group, expect, step};

/// Prefix marking a profile already loaded on the host.
const LOCALHOST_PREFIX: &str = "localhost/";

const DENY_WRITE_NAME: &str = "cri-validate-apparmor-test-deny-write";
const DENY_WRITE_PROFILE: &str = r"#include <tunables/global>

profile cri-validate-apparmor-test-deny-write flags=(attach_disconnected) {
  #include <abstractions/base>

  file,

  # Deny all file writes.
  deny /** w,
}
";

const AUDIT_WRITE_NAME: &str = "cri-validate-apparmor-test-audit-write";
const AUDIT_WRITE_PROFILE: &str = r"#include <tunables/global>

profile cri-validate-apparmor-test-audit-write flags=(attach_disconnected) {
  #include <abstractions/base>

  file,

  # Only audit file writes.
  audit /** w,
}
";

const WRITE_PROBE: &str = "touch /tmp/foo";

/// Registers the AppArmor group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("AppArmor", |g| {
        g.before_each(|f| f.require_apparmor());
        g.it("should fail with an unloaded profile [Conformance]", unloaded_profile);
        g.it("should enforce a profile blocking writes [Conformance]", deny_write);
        g.it("should enforce a permissive profile [Conformance]", audit_write);
        g.it("should run with the runtime default profile [Conformance]", |f| {
            runs_with(f, SecurityProfile::of(ProfileType::RuntimeDefault));
        });
        g.it("should run unconfined [Conformance]", |f| {
            runs_with(f, SecurityProfile::of(ProfileType::Unconfined));
        });
    });
}

fn localhost(name: &str) -> SecurityProfile {
    SecurityProfile::localhost(format!("{LOCALHOST_PREFIX}{name}"))
}

fn sandbox(f: &mut Framework) -> (SandboxId, PodSandboxConfig) {
    f.run_default_sandbox("apparmor")
}

/// Runs `touch /tmp/foo` under `profile` and returns its exit code.
fn write_under(f: &mut Framework, profile: SecurityProfile) -> i32 {
    let (sandbox, sandbox_config) = sandbox(f);
    let image = f.default_image().to_string();
    let mut container = config::container_config("apparmor", &image, commands().script(WRITE_PROBE));
    config::container_security(&mut container).apparmor = Some(profile);
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_container(&id);
    f.wait_for_state(&id, ContainerState::ContainerExited, DEFAULT_STATE_POLL_TIMEOUT);
    f.container_status(&id).exit_code
}

fn unloaded_profile(f: &mut Framework) {
    let (sandbox, sandbox_config) = sandbox(f);
    let image = f.default_image().to_string();
    let mut container = config::container_config("apparmor", &image, commands().script(WRITE_PROBE));
    config::container_security(&mut container).apparmor = Some(localhost("non-existent-profile"));
    step("create a container referencing a profile that is not loaded");
    let error = f.create_container_expect_error(&sandbox, &container, &sandbox_config);
    tracing::info!(%error, "runtime refused the unloaded profile");
}

fn deny_write(f: &mut Framework) {
    f.load_apparmor_profile(DENY_WRITE_NAME, DENY_WRITE_PROFILE);
    let code = write_under(f, localhost(DENY_WRITE_NAME));
    expect(code).not_to(equal(0));
}

fn audit_write(f: &mut Framework) {
    f.load_apparmor_profile(AUDIT_WRITE_NAME, AUDIT_WRITE_PROFILE);
    let code = write_under(f, localhost(AUDIT_WRITE_NAME));
    expect(code).to(equal(0));
}

fn runs_with(f: &mut Framework, profile: SecurityProfile) {
    expect(write_under(f, profile)).to(equal(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_declare_their_names() {
        assert!(DENY_WRITE_PROFILE.contains(&format!("profile {DENY_WRITE_NAME} ")));
        assert!(AUDIT_WRITE_PROFILE.contains(&format!("profile {AUDIT_WRITE_NAME} ")));
    }

    #[test]
    fn localhost_references_carry_the_prefix() {
        let profile = localhost(DENY_WRITE_NAME);
        assert_eq!(profile.profile_type(), ProfileType::Localhost);
        assert_eq!(profile.localhost_ref, "localhost/cri-validate-apparmor-test-deny-write");
    }
}
