//! SELinux probes.

use std::path::Path;

use critest_common::constants::SELINUX_ENFORCE;
use critest_runner::skip;

use crate::framework::Framework;

/// Returns whether SELinux is enabled on the host.
#[must_use]
pub fn selinux_enabled() -> bool {
    Path::new(SELINUX_ENFORCE).exists()
}

/// Returns whether SELinux is in enforcing mode.
#[must_use]
pub fn selinux_enforcing() -> bool {
    std::fs::read_to_string(SELINUX_ENFORCE).is_ok_and(|v| v.trim() == "1")
}

impl Framework {
    /// Skips the spec unless SELinux is enabled on the host.
    pub fn require_selinux(&self) {
        if !selinux_enabled() {
            skip("SELinux is not enabled on this host");
        }
    }
}
