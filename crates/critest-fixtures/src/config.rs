//! Builders for canonical sandbox and container configurations.
//!
//! Specs start from these defaults and then tweak the fields they exercise.

use std::collections::HashMap;

use critest_common::constants::DEFAULT_SANDBOX_NAMESPACE;
use critest_common::types::{new_uid, unique_name};
use critest_cri::proto::{
    ContainerConfig, ContainerMetadata, ImageSpec, LinuxContainerConfig, LinuxContainerResources,
    LinuxContainerSecurityContext, LinuxPodSandboxConfig, LinuxSandboxSecurityContext, Mount,
    MountPropagation, NamespaceMode, NamespaceOption, PodSandboxConfig, PodSandboxMetadata,
    PortMapping, Protocol,
};

/// Label placed on every sandbox and container created by the suite.
pub const SUITE_LABEL: &str = "critest.k8s.io/suite";

fn suite_labels() -> HashMap<String, String> {
    HashMap::from([(SUITE_LABEL.to_string(), "true".to_string())])
}

/// Metadata with a unique name, a fresh uid, and the suite namespace.
#[must_use]
pub fn sandbox_metadata(prefix: &str) -> PodSandboxMetadata {
    PodSandboxMetadata {
        name: unique_name(prefix),
        uid: new_uid(),
        namespace: DEFAULT_SANDBOX_NAMESPACE.to_string(),
        attempt: 0,
    }
}

/// The default sandbox configuration.
#[must_use]
pub fn sandbox_config(prefix: &str) -> PodSandboxConfig {
    PodSandboxConfig {
        metadata: Some(sandbox_metadata(prefix)),
        labels: suite_labels(),
        linux: Some(LinuxPodSandboxConfig {
            cgroup_parent: String::new(),
            ..LinuxPodSandboxConfig::default()
        }),
        ..PodSandboxConfig::default()
    }
}

/// The default container configuration running `command` in `image`.
#[must_use]
pub fn container_config(prefix: &str, image: &str, command: Vec<String>) -> ContainerConfig {
    ContainerConfig {
        metadata: Some(ContainerMetadata {
            name: unique_name(prefix),
            attempt: 0,
        }),
        image: Some(ImageSpec::named(image)),
        command,
        labels: suite_labels(),
        linux: Some(LinuxContainerConfig::default()),
        ..ContainerConfig::default()
    }
}

/// Mutable access to the sandbox's Linux security context, created on demand.
pub fn sandbox_security(config: &mut PodSandboxConfig) -> &mut LinuxSandboxSecurityContext {
    config
        .linux
        .get_or_insert_with(LinuxPodSandboxConfig::default)
        .security_context
        .get_or_insert_with(LinuxSandboxSecurityContext::default)
}

/// Mutable access to the sandbox's namespace options, created on demand.
pub fn sandbox_namespaces(config: &mut PodSandboxConfig) -> &mut NamespaceOption {
    sandbox_security(config)
        .namespace_options
        .get_or_insert_with(NamespaceOption::default)
}

/// Mutable access to the container's Linux security context, created on demand.
pub fn container_security(config: &mut ContainerConfig) -> &mut LinuxContainerSecurityContext {
    config
        .linux
        .get_or_insert_with(LinuxContainerConfig::default)
        .security_context
        .get_or_insert_with(LinuxContainerSecurityContext::default)
}

/// Mutable access to the container's Linux resources, created on demand.
pub fn container_resources(config: &mut ContainerConfig) -> &mut LinuxContainerResources {
    config
        .linux
        .get_or_insert_with(LinuxContainerConfig::default)
        .resources
        .get_or_insert_with(LinuxContainerResources::default)
}

/// Runs every namespace of the sandbox in the host's namespaces.
pub fn use_host_namespaces(config: &mut PodSandboxConfig, network: bool, pid: bool, ipc: bool) {
    let mode = |host: bool| {
        if host { NamespaceMode::Node } else { NamespaceMode::Pod }
    };
    let options = sandbox_namespaces(config);
    options.network = mode(network) as i32;
    options.pid = mode(pid) as i32;
    options.ipc = mode(ipc) as i32;
}

/// A TCP port mapping.
#[must_use]
pub fn tcp_port(container_port: u16, host_port: u16) -> PortMapping {
    PortMapping {
        protocol: Protocol::Tcp as i32,
        container_port: i32::from(container_port),
        host_port: i32::from(host_port),
        host_ip: String::new(),
    }
}

/// A bind mount of `host_path` at `container_path`.
#[must_use]
pub fn bind_mount(host_path: &str, container_path: &str, propagation: MountPropagation) -> Mount {
    Mount {
        host_path: host_path.to_string(),
        container_path: container_path.to_string(),
        propagation: propagation as i32,
        ..Mount::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_names_are_unique_and_prefixed() {
        let a = sandbox_config("sandbox");
        let b = sandbox_config("sandbox");
        let a = a.metadata.unwrap();
        let b = b.metadata.unwrap();
        assert_ne!(a.name, b.name);
        assert_ne!(a.uid, b.uid);
        assert!(a.name.starts_with("critest-sandbox-"));
        assert_eq!(a.namespace, DEFAULT_SANDBOX_NAMESPACE);
    }

    #[test]
    fn container_config_carries_image_command_and_label() {
        let config = container_config("ctr", "busybox", vec!["top".into()]);
        assert_eq!(config.image.unwrap().image, "busybox");
        assert_eq!(config.command, vec!["top"]);
        assert_eq!(config.labels.get(SUITE_LABEL).map(String::as_str), Some("true"));
    }

    #[test]
    fn security_contexts_are_created_on_demand() {
        let mut config = container_config("ctr", "busybox", Vec::new());
        config.linux = None;
        container_security(&mut config).readonly_rootfs = true;
        container_resources(&mut config).memory_limit_in_bytes = 15 * 1024 * 1024;
        let linux = config.linux.unwrap();
        assert!(linux.security_context.unwrap().readonly_rootfs);
        assert_eq!(linux.resources.unwrap().memory_limit_in_bytes, 15_728_640);
    }

    #[test]
    fn host_namespaces() {
        let mut config = PodSandboxConfig::default();
        use_host_namespaces(&mut config, true, false, true);
        let options = sandbox_namespaces(&mut config);
        assert_eq!(options.network(), NamespaceMode::Node);
        assert_eq!(options.pid(), NamespaceMode::Pod);
        assert_eq!(options.ipc(), NamespaceMode::Node);
    }

    #[test]
    fn mappings_and_mounts() {
        let port = tcp_port(80, 12001);
        assert_eq!((port.container_port, port.host_port), (80, 12001));
        let mount = bind_mount("/tmp/a", "/mnt/a", MountPropagation::PropagationBidirectional);
        assert_eq!(mount.propagation(), MountPropagation::PropagationBidirectional);
        assert!(!mount.readonly);
    }
}
