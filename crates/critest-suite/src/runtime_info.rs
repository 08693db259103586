//! Runtime identity and readiness.

use critest_common::constants::CRI_API_VERSION;
use critest_cri::proto::{NETWORK_READY, RUNTIME_READY};
use critest_fixtures::Framework;
use critest_runner::assertion::{be_empty, equal};
use critest_runner::{Group, expect, expect_ok};

/// Registers the runtime info group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Runtime info", |g| {
        g.describe("runtime should support returning runtime info", |g| {
            g.it("runtime should return version info [Conformance]", returns_version);
            g.it("runtime should return runtime conditions [Conformance]", returns_status);
        });
    });
}

fn returns_version(f: &mut Framework) {
    let version = expect_ok(f.runtime().version(CRI_API_VERSION), "get runtime version");
    expect(&version.version).not_to(be_empty());
    expect(&version.runtime_name).not_to(be_empty());
    expect(&version.runtime_version).not_to(be_empty());
    expect(&version.runtime_api_version).not_to(be_empty());
}

fn returns_status(f: &mut Framework) {
    let status = expect_ok(f.runtime().status(false), "get runtime status");
    expect(status.condition(RUNTIME_READY))
        .with_context("RuntimeReady condition")
        .to(equal(Some(true)));
    expect(status.condition(NETWORK_READY))
        .with_context("NetworkReady condition")
        .to(equal(Some(true)));
}
