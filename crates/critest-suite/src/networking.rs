//! Sandbox networking: DNS, hostname, pod IP, and host port mappings.

use critest_common::constants::DEFAULT_EVENTUALLY_TIMEOUT;
use critest_cri::proto::DnsConfig;
use critest_fixtures::streams::http_get;
use critest_fixtures::{Commands, Framework, commands, config};
use critest_runner::assertion::{be_empty, be_true, contain, equal, succeed};
use critest_runner::{Group, eventually, expect, expect_ok, step};

const DNS_SERVER: &str = "8.8.8.8";
const DNS_SEARCH: &str = "critest.example.com";
const DNS_OPTION: &str = "ndots:8";
const HOSTNAME: &str = "critest-hostname";
const HOST_PORT: u16 = 12002;
const WEB_PORT: u16 = 80;

/// Registers the networking group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Networking", |g| {
        g.describe("runtime should support networking", |g| {
            g.it("runtime should support DNS config [Conformance]", dns_config);
            g.it("runtime should support set hostname [Conformance]", hostname);
            g.it("runtime should report the pod IP [Conformance]", pod_ip);
            g.it("runtime should support port mapping with host port [Conformance]", host_port);
        });
    });
}

fn dns_config(f: &mut Framework) {
    let mut sandbox_config = config::sandbox_config("dns");
    sandbox_config.dns_config = Some(DnsConfig {
        servers: vec![DNS_SERVER.into()],
        searches: vec![DNS_SEARCH.into()],
        options: vec![DNS_OPTION.into()],
    });
    let sandbox = f.run_sandbox(&sandbox_config);
    let id = f.create_default_container(&sandbox, &sandbox_config, "dns");
    f.start_and_wait_running(&id);

    step("read the resolver configuration");
    let resolv = f.exec_sync_ok(&id, &Commands::to_vec(commands().get_dns)).stdout_str();
    expect(&resolv).to(contain(DNS_SERVER));
    expect(&resolv).to(contain(DNS_SEARCH));
    expect(&resolv).to(contain(DNS_OPTION));
}

fn hostname(f: &mut Framework) {
    let mut sandbox_config = config::sandbox_config("hostname");
    sandbox_config.hostname = HOSTNAME.into();
    let sandbox = f.run_sandbox(&sandbox_config);
    let id = f.create_default_container(&sandbox, &sandbox_config, "hostname");
    f.start_and_wait_running(&id);

    let output = f.exec_sync_ok(&id, &Commands::to_vec(commands().hostname));
    expect(output.stdout_str().trim()).to(equal(HOSTNAME));
}

fn pod_ip(f: &mut Framework) {
    let (sandbox, _) = f.run_default_sandbox("pod-ip");
    let status = f.sandbox_status(&sandbox);
    let ip = status.network.map(|n| n.ip).unwrap_or_default();
    expect(&ip).not_to(be_empty());
    expect(ip.parse::<std::net::IpAddr>().is_ok())
        .with_context(format!("pod IP {ip:?} parses"))
        .to(be_true());
}

fn host_port(f: &mut Framework) {
    let mut sandbox_config = config::sandbox_config("host-port");
    sandbox_config.port_mappings = vec![config::tcp_port(WEB_PORT, HOST_PORT)];
    let sandbox = f.run_sandbox(&sandbox_config);

    let image = f.web_server_image().to_string();
    let web = config::container_config("web", &image, Vec::new());
    let id = f.create_container(&sandbox, &web, &sandbox_config);
    f.start_and_wait_running(&id);

    let url = format!("http://localhost:{HOST_PORT}/");
    step(format!("fetch {url} through the host port"));
    let body = eventually(|| http_get(&url, DEFAULT_EVENTUALLY_TIMEOUT))
        .within(DEFAULT_EVENTUALLY_TIMEOUT)
        .should(succeed());
    expect(expect_ok(body, "fetch index page")).not_to(be_empty());
}
