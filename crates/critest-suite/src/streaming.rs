//! Exec, attach, and port-forward over the streaming server.

use std::time::Duration;

use critest_common::constants::{DEFAULT_EVENTUALLY_TIMEOUT, DEFAULT_RPC_TIMEOUT, DEFAULT_STATE_POLL_TIMEOUT};
use critest_common::types::ContainerId;
use critest_cri::proto::ContainerState;
use critest_fixtures::streams::http_get;
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{be_empty, contain, equal, succeed};
use critest_runner::{Group, eventually, expect, expect_ok, step};

const FORWARD_HOST_PORT: u16 = 12001;
const WEB_PORT: u16 = 80;
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Registers the streaming group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Streaming", |g| {
        g.describe("runtime should support exec", |g| {
            g.it("runtime should support exec with tty=false [Conformance]", |f| exec(f, false));
            g.it("runtime should support exec with tty=true [Conformance]", |f| exec(f, true));
            g.it("runtime should support exec with stdin and tty=false [Conformance]", |f| {
                exec_stdin(f, false);
            });
            g.it("runtime should support exec with stdin and tty=true [Conformance]", |f| {
                exec_stdin(f, true);
            });
        });
        g.describe("runtime should support attach", |g| {
            g.it("runtime should support attach with tty=false [Conformance]", |f| attach(f, false));
            g.it("runtime should support attach with tty=true [Conformance]", |f| attach(f, true));
        });
        g.it("runtime should support portforward [Conformance]", port_forward);
    });
}

fn running_container(f: &mut Framework, prefix: &str) -> ContainerId {
    let (sandbox, sandbox_config) = f.run_default_sandbox(prefix);
    let id = f.create_default_container(&sandbox, &sandbox_config, prefix);
    f.start_and_wait_running(&id);
    id
}

fn exec(f: &mut Framework, tty: bool) {
    let id = running_container(f, "exec");
    let output = f.exec_streaming(&id, &Commands::to_vec(commands().echo_hello), tty);
    expect(&output.stdout).to(contain(commands().echo_hello_output));
    if !tty {
        expect(&output.stdout).to(equal(commands().echo_hello_output));
        expect(&output.stderr).to(be_empty());
    }
}

fn exec_stdin(f: &mut Framework, tty: bool) {
    let id = running_container(f, "exec-stdin");
    let mut session = f.exec_interactive(&id, &commands().script("head -n 1"), tty);
    step("write a line to stdin");
    session.write_stdin(b"hello\n");
    session.close_stdin();
    let output = expect_ok(session.finish(SESSION_TIMEOUT), "finish exec session");
    expect(&output.stdout).to(contain("hello"));
    if !tty {
        expect(&output.stdout).to(equal("hello\n"));
        expect(&output.stderr).to(be_empty());
    }
}

fn attach(f: &mut Framework, tty: bool) {
    let (sandbox, sandbox_config) = f.run_default_sandbox("attach");
    let image = f.default_image().to_string();
    let mut container = config::container_config("attach", &image, Commands::to_vec(&commands().shell[..1]));
    container.stdin = true;
    container.stdin_once = true;
    container.tty = tty;
    let id = f.create_container(&sandbox, &container, &sandbox_config);
    f.start_and_wait_running(&id);

    let mut session = f.attach(&id, tty);
    step("run a command through the attached shell");
    session.write_stdin(b"echo hello\n");
    session.write_stdin(b"exit\n");
    session.close_stdin();
    let output = expect_ok(session.finish(SESSION_TIMEOUT), "finish attach session");
    expect(&output.stdout).to(contain("hello"));
    if !tty {
        expect(&output.stderr).to(be_empty());
    }
    f.wait_for_state(&id, ContainerState::ContainerExited, DEFAULT_STATE_POLL_TIMEOUT);
}

fn port_forward(f: &mut Framework) {
    let mut sandbox_config = config::sandbox_config("portforward");
    sandbox_config.port_mappings = vec![config::tcp_port(WEB_PORT, 0)];
    let sandbox = f.run_sandbox(&sandbox_config);

    let image = f.web_server_image().to_string();
    let web = config::container_config("web", &image, Vec::new());
    let id = f.create_container(&sandbox, &web, &sandbox_config);
    f.start_and_wait_running(&id);

    let local = f.port_forward(&sandbox, FORWARD_HOST_PORT, WEB_PORT);
    let url = format!("http://localhost:{}/", local.port());
    step(format!("fetch {url} through the tunnel"));
    let body = eventually(|| http_get(&url, DEFAULT_RPC_TIMEOUT))
        .within(DEFAULT_EVENTUALLY_TIMEOUT)
        .should(succeed());
    let body = expect_ok(body, "fetch index page");
    expect(&body).not_to(be_empty());
}
