//! Container lifecycle, listing, stats, exec, resources, and logs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use critest_common::constants::{DEFAULT_EVENTUALLY_TIMEOUT, DEFAULT_STATE_POLL_TIMEOUT};
use critest_common::types::{ContainerId, LogStream, SandboxId};
use critest_cri::proto::{
    ContainerFilter, ContainerState, ContainerStateValue, ContainerStatsFilter,
    LinuxContainerResources, PodSandboxConfig,
};
use critest_fixtures::config::{self, SUITE_LABEL};
use critest_fixtures::{Commands, Framework, commands, parse_log_file, verify_log_contents};
use critest_runner::assertion::{be_at_least, be_empty, contain, equal, have_length};
use critest_runner::{Group, consistently, eventually, expect, expect_err, expect_ok, step};

const LOG_MESSAGE: &str = "hello World";
const LOG_FILE: &str = "container.log";

/// Registers the container group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Container", |g| {
        g.describe("runtime should support basic operations on container", |g| {
            g.it("runtime should support creating container [Conformance]", creates_container);
            g.it("runtime should support starting container [Conformance]", starts_container);
            g.it("runtime should support stopping container [Conformance]", stops_container);
            g.it("runtime should support removing created container [Conformance]", removes_created_container);
            g.it("runtime should support removing stopped container [Conformance]", removes_stopped_container);
            g.it("container states should never regress [Conformance]", lifecycle_is_monotonic);
            g.it("runtime should support execSync [Conformance]", exec_sync_echo);
            g.it("runtime should support execSync with timeout [Conformance]", exec_sync_timeout);
            g.it("runtime should support updating container resources", updates_resources);
        });
        g.describe("runtime should support listing containers", |g| {
            g.it("runtime should filter containers by id [Conformance]", filters_by_id);
            g.it("runtime should filter containers by state [Conformance]", filters_by_state);
            g.it("runtime should filter containers by label [Conformance]", filters_by_label);
            g.it("runtime should filter containers by sandbox [Conformance]", filters_by_sandbox);
        });
        g.describe("runtime should support container stats", |g| {
            g.it("runtime should report stats of a container [Conformance]", container_stats);
            g.it("runtime should list stats filtered by id [Conformance]", lists_container_stats);
        });
        g.describe("runtime should support log", |g| {
            g.it("runtime should write stdout to the container log [Conformance]", logs_stdout);
            g.it("runtime should write stderr to the container log [Conformance]", logs_stderr);
            g.it("runtime should support reopening the container log [Conformance]", reopens_log);
        });
    });
}

fn sleeping_container(f: &mut Framework, prefix: &str) -> (SandboxId, PodSandboxConfig, ContainerId) {
    let (sandbox, sandbox_config) = f.run_default_sandbox(prefix);
    let id = f.create_default_container(&sandbox, &sandbox_config, prefix);
    (sandbox, sandbox_config, id)
}

fn running_container(f: &mut Framework, prefix: &str) -> (SandboxId, PodSandboxConfig, ContainerId) {
    let (sandbox, sandbox_config, id) = sleeping_container(f, prefix);
    f.start_and_wait_running(&id);
    (sandbox, sandbox_config, id)
}

fn listed_ids(f: &Framework, filter: ContainerFilter) -> Vec<String> {
    expect_ok(f.runtime().list_containers(Some(filter)), "list containers")
        .into_iter()
        .map(|c| c.id)
        .collect()
}

fn by_id(id: &ContainerId) -> ContainerFilter {
    ContainerFilter {
        id: id.to_string(),
        ..ContainerFilter::default()
    }
}

// ── lifecycle ────────────────────────────────────────────────────────

fn creates_container(f: &mut Framework) {
    let (_, _, id) = sleeping_container(f, "create");
    expect(f.container_state(&id)).to(equal(ContainerState::ContainerCreated));
    expect(listed_ids(f, by_id(&id))).to(contain(id.to_string()));
}

fn starts_container(f: &mut Framework) {
    let (_, _, id) = sleeping_container(f, "start");
    f.start_container(&id);
    expect(f.container_state(&id)).to(equal(ContainerState::ContainerRunning));
}

fn stops_container(f: &mut Framework) {
    let (_, _, id) = running_container(f, "stop");
    f.stop_container(&id);
    expect(f.container_state(&id)).to(equal(ContainerState::ContainerExited));
}

fn removes_created_container(f: &mut Framework) {
    let (_, _, id) = sleeping_container(f, "remove-created");
    f.remove_container(&id);
    expect(listed_ids(f, by_id(&id))).to(be_empty());
}

fn removes_stopped_container(f: &mut Framework) {
    let (_, _, id) = running_container(f, "remove-stopped");
    f.stop_container(&id);
    f.remove_container(&id);
    expect(listed_ids(f, by_id(&id))).to(be_empty());
}

fn lifecycle_is_monotonic(f: &mut Framework) {
    let (_, _, id) = sleeping_container(f, "monotonic");
    let mut observed = vec![f.container_state(&id)];
    f.start_container(&id);
    observed.push(f.container_state(&id));
    f.stop_container(&id);
    observed.push(f.container_state(&id));
    expect(&observed).to(equal(&vec![
        ContainerState::ContainerCreated,
        ContainerState::ContainerRunning,
        ContainerState::ContainerExited,
    ]));
    let status = f.container_status(&id);
    expect(status.started_at >= status.created_at && status.finished_at >= status.started_at)
        .with_context(format!(
            "timestamps created={} started={} finished={}",
            status.created_at, status.started_at, status.finished_at
        ))
        .to(equal(true));
}

// ── exec ─────────────────────────────────────────────────────────────

fn exec_sync_echo(f: &mut Framework) {
    let (_, _, id) = running_container(f, "exec-sync");
    let output = f.exec_sync(&id, &Commands::to_vec(commands().echo_hello));
    expect(output.exit_code).to(equal(0));
    expect(output.stdout_str()).to(equal(commands().echo_hello_output));
    expect(output.stderr_str()).to(be_empty());
}

fn exec_sync_timeout(f: &mut Framework) {
    let (_, _, id) = running_container(f, "exec-timeout");
    step("exec a command that outlives its timeout");
    let cmd = commands().script("sleep 60");
    let err = expect_err(
        f.runtime().exec_sync(&id, &cmd, Duration::from_secs(3)),
        "exec sync with timeout",
    );
    tracing::info!(error = %err, "exec sync timed out as expected");
}

fn updates_resources(f: &mut Framework) {
    let (_, _, id) = running_container(f, "update");
    let resources = LinuxContainerResources {
        cpu_period: 100_000,
        cpu_quota: 20_000,
        cpu_shares: 512,
        memory_limit_in_bytes: 64 * 1024 * 1024,
        ..LinuxContainerResources::default()
    };
    step("update container resources");
    expect_ok(
        f.runtime().update_container_resources(&id, resources.clone()),
        "update container resources",
    );
    let status = f.container_status(&id);
    if let Some(reported) = status.resources.and_then(|r| r.linux) {
        expect(reported.cpu_quota).to(equal(resources.cpu_quota));
        expect(reported.memory_limit_in_bytes).to(equal(resources.memory_limit_in_bytes));
    }
}

// ── listing ──────────────────────────────────────────────────────────

fn filters_by_id(f: &mut Framework) {
    let (sandbox, sandbox_config, first) = sleeping_container(f, "list-id");
    let second = f.create_default_container(&sandbox, &sandbox_config, "list-id-other");
    let ids = listed_ids(f, by_id(&first));
    expect(&ids).to(have_length(1));
    expect(&ids).not_to(contain(second.to_string()));
}

fn filters_by_state(f: &mut Framework) {
    let (sandbox, sandbox_config, created) = sleeping_container(f, "list-state");
    let running = f.create_default_container(&sandbox, &sandbox_config, "list-state-running");
    f.start_and_wait_running(&running);

    let state = |s: ContainerState| ContainerFilter {
        state: Some(ContainerStateValue { state: s as i32 }),
        pod_sandbox_id: sandbox.to_string(),
        ..ContainerFilter::default()
    };
    let running_ids = listed_ids(f, state(ContainerState::ContainerRunning));
    expect(&running_ids).to(contain(running.to_string()));
    expect(&running_ids).not_to(contain(created.to_string()));
    let created_ids = listed_ids(f, state(ContainerState::ContainerCreated));
    expect(&created_ids).to(contain(created.to_string()));
    expect(&created_ids).not_to(contain(running.to_string()));
}

fn filters_by_label(f: &mut Framework) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("list-label");
    let image = f.default_image().to_string();
    let mut labelled =
        config::container_config("labelled", &image, Commands::to_vec(commands().sleep));
    let _ = labelled.labels.insert("critest.k8s.io/marker".into(), "x".into());
    let id = f.create_container(&sandbox, &labelled, &sandbox_config);
    let other = f.create_default_container(&sandbox, &sandbox_config, "unlabelled");

    let filter = ContainerFilter {
        pod_sandbox_id: sandbox.to_string(),
        label_selector: HashMap::from([
            ("critest.k8s.io/marker".to_string(), "x".to_string()),
            (SUITE_LABEL.to_string(), "true".to_string()),
        ]),
        ..ContainerFilter::default()
    };
    let ids = listed_ids(f, filter);
    expect(&ids).to(contain(id.to_string()));
    expect(&ids).not_to(contain(other.to_string()));
}

fn filters_by_sandbox(f: &mut Framework) {
    let (_, _, mine) = sleeping_container(f, "list-sandbox");
    let (other_sandbox, _, theirs) = sleeping_container(f, "list-sandbox-other");
    let filter = ContainerFilter {
        pod_sandbox_id: other_sandbox.to_string(),
        ..ContainerFilter::default()
    };
    let ids = listed_ids(f, filter);
    expect(&ids).to(contain(theirs.to_string()));
    expect(&ids).not_to(contain(mine.to_string()));
}

// ── stats ────────────────────────────────────────────────────────────

fn container_stats(f: &mut Framework) {
    let (_, _, id) = running_container(f, "stats");
    let stats = expect_ok(f.runtime().container_stats(&id), "get container stats");
    let attributes = stats.attributes.unwrap_or_default();
    expect(&attributes.id).to(equal(id.as_str()));
    expect(stats.cpu.is_some() || stats.memory.is_some())
        .with_context("stats carry cpu or memory usage")
        .to(equal(true));
}

fn lists_container_stats(f: &mut Framework) {
    let (_, _, id) = running_container(f, "list-stats");
    let filter = ContainerStatsFilter {
        id: id.to_string(),
        ..ContainerStatsFilter::default()
    };
    let stats = expect_ok(
        f.runtime().list_container_stats(Some(filter)),
        "list container stats",
    );
    let ids: Vec<String> = stats
        .into_iter()
        .filter_map(|s| s.attributes.map(|a| a.id))
        .collect();
    expect(&ids).to(equal(&vec![id.to_string()]));
}

// ── logs ─────────────────────────────────────────────────────────────

/// Runs `command` in a sandbox whose logs land in a scratch directory.
fn logging_container(f: &mut Framework, prefix: &str, command: Vec<String>) -> (PathBuf, ContainerId) {
    let log_dir = f.temp_dir("logs");
    let mut sandbox_config = config::sandbox_config(prefix);
    sandbox_config.log_directory = log_dir.to_string_lossy().into_owned();
    let sandbox = f.run_sandbox(&sandbox_config);

    let image = f.default_image().to_string();
    let mut container = config::container_config(prefix, &image, command);
    container.log_path = LOG_FILE.to_string();
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_container(&id);
    (log_dir, id)
}

fn logs_stdout(f: &mut Framework) {
    let command = commands().echo_message(LOG_MESSAGE);
    let (log_dir, id) = logging_container(f, "log-stdout", command);
    f.wait_for_state(&id, ContainerState::ContainerExited, DEFAULT_STATE_POLL_TIMEOUT);
    let entries = expect_ok(parse_log_file(&log_dir, LOG_FILE), "parse container log");
    verify_log_contents(&entries, LOG_MESSAGE, LogStream::Stdout);
}

fn logs_stderr(f: &mut Framework) {
    let command = commands().script(&format!("echo '{LOG_MESSAGE}' >&2"));
    let (log_dir, id) = logging_container(f, "log-stderr", command);
    f.wait_for_state(&id, ContainerState::ContainerExited, DEFAULT_STATE_POLL_TIMEOUT);
    let entries = expect_ok(parse_log_file(&log_dir, LOG_FILE), "parse container log");
    verify_log_contents(&entries, LOG_MESSAGE, LogStream::Stderr);
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

fn log_line_count(dir: &Path) -> usize {
    parse_log_file(dir, LOG_FILE).map_or(0, |entries| entries.len())
}

fn reopens_log(f: &mut Framework) {
    let command = commands().log_loop(LOG_MESSAGE);
    let (log_dir, id) = logging_container(f, "log-reopen", command);
    f.wait_for_state(&id, ContainerState::ContainerRunning, DEFAULT_STATE_POLL_TIMEOUT);
    let current = log_dir.join(LOG_FILE);
    let renamed = log_dir.join(format!("{LOG_FILE}.new"));

    step("wait for the first log line");
    let _ = eventually(|| log_line_count(&log_dir))
        .within(DEFAULT_EVENTUALLY_TIMEOUT)
        .should(be_at_least(1));

    step("rename the log file");
    expect_ok(std::fs::rename(&current, &renamed), "rename container log");
    expect_ok(f.runtime().reopen_container_log(&id), "reopen container log");

    step("wait for the runtime to write to a new file");
    let _ = eventually(|| log_line_count(&log_dir))
        .within(DEFAULT_EVENTUALLY_TIMEOUT)
        .should(be_at_least(1));
    let entries = expect_ok(parse_log_file(&log_dir, LOG_FILE), "parse reopened log");
    verify_log_contents(&entries, LOG_MESSAGE, LogStream::Stdout);

    step("check the renamed file is no longer written");
    let frozen = file_len(&renamed);
    consistently(|| file_len(&renamed))
        .during(Duration::from_secs(5))
        .every(Duration::from_secs(1))
        .should(equal(frozen));
}
