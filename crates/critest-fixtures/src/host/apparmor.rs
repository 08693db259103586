//! AppArmor profile loading.

use std::path::Path;

use critest_common::constants::{APPARMOR_ENABLED_PARAM, APPARMOR_SECURITYFS};
use critest_common::error::Result;
use critest_runner::{expect_ok, skip, step};

use super::command::{StderrPolicy, run_host_command};
use crate::framework::Framework;

const PARSER: &str = "apparmor_parser";

/// Returns whether the host kernel has AppArmor enabled.
#[must_use]
pub fn apparmor_enabled() -> bool {
    Path::new(APPARMOR_SECURITYFS).is_dir()
        && std::fs::read_to_string(APPARMOR_ENABLED_PARAM).is_ok_and(|v| v.trim_start().starts_with('Y'))
}

/// Loads or replaces the profile defined in `path`.
///
/// # Errors
///
/// Returns an error if the parser is missing, fails, or writes to stderr.
pub fn load_profile(path: &Path) -> Result<()> {
    let _ = run_host_command(PARSER, &["-r", &path.to_string_lossy()], StderrPolicy::Fail)?;
    tracing::info!(path = %path.display(), "apparmor profile loaded");
    Ok(())
}

/// Unloads the profile defined in `path`.
///
/// # Errors
///
/// Returns an error if the parser is missing, fails, or writes to stderr.
pub fn unload_profile(path: &Path) -> Result<()> {
    let _ = run_host_command(PARSER, &["-R", &path.to_string_lossy()], StderrPolicy::Fail)?;
    tracing::info!(path = %path.display(), "apparmor profile unloaded");
    Ok(())
}

impl Framework {
    /// Skips the spec unless AppArmor is enabled on the host.
    pub fn require_apparmor(&self) {
        if !apparmor_enabled() {
            skip("AppArmor is not enabled on this host");
        }
    }

    /// Loads `profile`, unloading it when the spec ends.
    pub fn load_apparmor_profile(&mut self, name: &str, profile: &str) {
        step(format!("load AppArmor profile {name}"));
        let path = self.temp_file("apparmor", name, profile);
        expect_ok(load_profile(&path), "load AppArmor profile");
        self.defer(format!("unload AppArmor profile {name}"), move || {
            unload_profile(&path)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_does_not_panic() {
        let enabled = apparmor_enabled();
        if enabled {
            assert!(Path::new(APPARMOR_SECURITYFS).exists());
        }
    }
}
