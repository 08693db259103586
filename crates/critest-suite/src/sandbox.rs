//! Pod sandbox lifecycle, listing, and status.

use std::collections::HashMap;

use critest_common::types::SandboxId;
use critest_cri::proto::{PodSandboxFilter, PodSandboxState, PodSandboxStateValue};
use critest_fixtures::Framework;
use critest_fixtures::config::{self, SUITE_LABEL};
use critest_runner::assertion::{be_empty, be_true, contain, equal, have_length};
use critest_runner::{Group, expect, expect_ok, step};

/// Registers the sandbox group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("PodSandbox", |g| {
        g.describe("runtime should support basic operations on PodSandbox", |g| {
            g.it("runtime should support running PodSandbox [Conformance]", runs_sandbox);
            g.it("runtime should support listing PodSandbox [Conformance]", lists_sandbox);
            g.it("runtime should support stopping PodSandbox [Conformance]", stops_sandbox);
            g.it("runtime should support removing PodSandbox [Conformance]", removes_sandbox);
            g.it("runtime should support a full PodSandbox round-trip [Conformance]", round_trip);
        });
        g.describe("runtime should support listing PodSandbox with filters", |g| {
            g.it("runtime should filter PodSandbox by state [Conformance]", filters_by_state);
            g.it("runtime should filter PodSandbox by label [Conformance]", filters_by_label);
        });
        g.describe("runtime should report PodSandbox status", |g| {
            g.it("status should carry the requested metadata and labels [Conformance]", status_metadata);
        });
    });
}

fn by_id(id: &SandboxId) -> PodSandboxFilter {
    PodSandboxFilter {
        id: id.to_string(),
        ..PodSandboxFilter::default()
    }
}

fn listed_ids(f: &Framework, filter: PodSandboxFilter) -> Vec<String> {
    expect_ok(f.runtime().list_sandboxes(Some(filter)), "list pod sandboxes")
        .into_iter()
        .map(|s| s.id)
        .collect()
}

fn runs_sandbox(f: &mut Framework) {
    let (id, _) = f.run_default_sandbox("run");
    expect(f.sandbox_state(&id)).to(equal(PodSandboxState::SandboxReady));
}

fn lists_sandbox(f: &mut Framework) {
    let (id, _) = f.run_default_sandbox("list");
    let all = expect_ok(f.runtime().list_sandboxes(None), "list pod sandboxes");
    let ids: Vec<String> = all.into_iter().map(|s| s.id).collect();
    expect(ids).to(contain(id.to_string()));
}

fn stops_sandbox(f: &mut Framework) {
    let (id, _) = f.run_default_sandbox("stop");
    f.stop_sandbox(&id);
    expect(f.sandbox_state(&id)).to(equal(PodSandboxState::SandboxNotready));
}

fn removes_sandbox(f: &mut Framework) {
    let (id, _) = f.run_default_sandbox("remove");
    f.stop_sandbox(&id);
    f.remove_sandbox(&id);
    expect(listed_ids(f, by_id(&id))).to(be_empty());
}

fn round_trip(f: &mut Framework) {
    let (id, _) = f.run_default_sandbox("round-trip");
    step("list the sandbox by id");
    expect(listed_ids(f, by_id(&id))).to(contain(id.to_string()));
    f.stop_sandbox(&id);
    expect(f.sandbox_state(&id)).to(equal(PodSandboxState::SandboxNotready));
    f.remove_sandbox(&id);
    step("list the removed sandbox by id");
    expect(listed_ids(f, by_id(&id))).to(be_empty());
}

fn filters_by_state(f: &mut Framework) {
    let (ready, _) = f.run_default_sandbox("ready");
    let (stopped, _) = f.run_default_sandbox("stopped");
    f.stop_sandbox(&stopped);

    let state = |s: PodSandboxState| PodSandboxFilter {
        state: Some(PodSandboxStateValue { state: s as i32 }),
        ..PodSandboxFilter::default()
    };
    let ready_ids = listed_ids(f, state(PodSandboxState::SandboxReady));
    expect(&ready_ids).to(contain(ready.to_string()));
    expect(&ready_ids).not_to(contain(stopped.to_string()));

    let not_ready_ids = listed_ids(f, state(PodSandboxState::SandboxNotready));
    expect(&not_ready_ids).to(contain(stopped.to_string()));
    expect(&not_ready_ids).not_to(contain(ready.to_string()));
}

fn filters_by_label(f: &mut Framework) {
    let mut labelled = config::sandbox_config("labelled");
    let marker = labelled
        .metadata
        .as_ref()
        .map(|m| m.uid.clone())
        .unwrap_or_default();
    let _ = labelled.labels.insert("critest.k8s.io/marker".into(), marker.clone());
    let id = f.run_sandbox(&labelled);
    let (other, _) = f.run_default_sandbox("unlabelled");

    let filter = PodSandboxFilter {
        label_selector: HashMap::from([("critest.k8s.io/marker".to_string(), marker)]),
        ..PodSandboxFilter::default()
    };
    let ids = listed_ids(f, filter);
    expect(&ids).to(have_length(1));
    expect(&ids).to(contain(id.to_string()));
    expect(&ids).not_to(contain(other.to_string()));
}

fn status_metadata(f: &mut Framework) {
    let (id, config) = f.run_default_sandbox("status");
    let status = f.sandbox_status(&id);
    expect(&status.id).to(equal(id.as_str()));
    expect(status.metadata).to(equal(config.metadata));
    expect(status.labels.get(SUITE_LABEL).cloned()).to(equal(Some("true".to_string())));
    expect(status.created_at > 0)
        .with_context("creation timestamp")
        .to(be_true());
}
