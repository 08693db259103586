//! Localhost seccomp profiles.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use critest_runner::{expect_ok, step};

use crate::framework::Framework;

/// Action applied to a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeccompAction {
    /// Allow the call.
    #[serde(rename = "SCMP_ACT_ALLOW")]
    Allow,
    /// Fail the call with `EPERM`.
    #[serde(rename = "SCMP_ACT_ERRNO")]
    Errno,
    /// Kill the calling thread.
    #[serde(rename = "SCMP_ACT_KILL")]
    Kill,
}

/// A rule applying one action to a set of syscalls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallRule {
    /// Syscall names.
    pub names: Vec<String>,
    /// What happens when one is called.
    pub action: SeccompAction,
}

/// A seccomp profile in the OCI JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompProfile {
    /// Action for syscalls without a rule.
    pub default_action: SeccompAction,
    /// Per-syscall rules.
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,
}

impl SeccompProfile {
    /// A profile allowing everything except `blocked`, which fail with `EPERM`.
    #[must_use]
    pub fn blocking(blocked: &[&str]) -> Self {
        Self {
            default_action: SeccompAction::Allow,
            syscalls: vec![SyscallRule {
                names: blocked.iter().map(|s| (*s).to_string()).collect(),
                action: SeccompAction::Errno,
            }],
        }
    }
}

impl Framework {
    /// Writes `profile` to a scratch directory and returns its path.
    pub fn write_seccomp_profile(&mut self, name: &str, profile: &SeccompProfile) -> PathBuf {
        step(format!("write seccomp profile {name}"));
        let document = expect_ok(serde_json::to_string_pretty(profile), "serialize seccomp profile");
        self.temp_file("seccomp", name, &document)
    }
}
