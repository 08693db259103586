//! System-wide constants: timeouts, default images, and naming.

use std::time::Duration;

/// Binary name for the CLI.
pub const BIN_NAME: &str = "critest";

/// Default CRI runtime endpoint.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "unix:///run/containerd/containerd.sock";

/// CRI API version negotiated through `Version`.
pub const CRI_API_VERSION: &str = "v1";

/// Image used by most container specs.
pub const DEFAULT_CONTAINER_IMAGE: &str = "registry.k8s.io/e2e-test-images/busybox:1.29-2";

/// Image serving HTTP on port 80, used by port-forward and networking specs.
pub const WEB_SERVER_IMAGE: &str = "registry.k8s.io/e2e-test-images/nginx:1.14-2";

/// Namespace placed in sandbox metadata.
pub const DEFAULT_SANDBOX_NAMESPACE: &str = "cri-test-namespace";

/// Prefix of every sandbox and container name created by the suite.
pub const RESOURCE_NAME_PREFIX: &str = "critest";

/// Grace period handed to `StopContainer`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget of a single `ExecSync`.
pub const DEFAULT_EXEC_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget of container and sandbox state polls.
pub const DEFAULT_STATE_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget of any other RPC.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(120);

/// Budget for pulling an image.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Time after which an exec/attach helper closes stdin on its own.
pub const DEFAULT_EXEC_STDIN_CLOSE: Duration = Duration::from_secs(20);

/// Default `eventually` budget.
pub const DEFAULT_EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default `eventually` and `consistently` sampling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sampling interval used by the container state polls.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Budget of each cleanup hook, counted from when the hook starts.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Default per-spec deadline.
pub const DEFAULT_SPEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Budget of a host helper command such as `apparmor_parser`.
pub const DEFAULT_HOST_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default gRPC connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code of a process killed with SIGKILL.
pub const SIGKILL_EXIT_CODE: i32 = 137;

/// Reason reported for out-of-memory kills.
pub const OOM_KILLED_REASON: &str = "OOMKilled";

/// Path of the AppArmor securityfs directory.
pub const APPARMOR_SECURITYFS: &str = "/sys/kernel/security/apparmor";

/// Path of the AppArmor module enablement flag.
pub const APPARMOR_ENABLED_PARAM: &str = "/sys/module/apparmor/parameters/enabled";

/// Path of the SELinux enforcement flag.
pub const SELINUX_ENFORCE: &str = "/sys/fs/selinux/enforce";

/// Path of the calling process UID map.
pub const SELF_UID_MAP: &str = "/proc/self/uid_map";
