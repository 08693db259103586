//! In-container probes shared by the Linux feature groups.

use critest_common::types::ContainerId;
use critest_fixtures::{Framework, commands};

/// Stdout of `script` run through the shell; fails on a non-zero exit.
pub fn shell_output(f: &Framework, id: &ContainerId, script: &str) -> String {
    f.exec_sync_ok(id, &commands().script(script)).stdout_str()
}

/// Exit code of `script` run through the shell.
pub fn script_exit_code(f: &Framework, id: &ContainerId, script: &str) -> i32 {
    f.exec_sync(id, &commands().script(script)).exit_code
}

/// `/proc/self/status` of a shell process inside the container.
pub fn proc_status(f: &Framework, id: &ContainerId) -> String {
    shell_output(f, id, "cat /proc/self/status")
}

/// Value of `field` in a `/proc/<pid>/status` document.
pub fn status_field<'a>(status: &'a str, field: &str) -> Option<&'a str> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':').map(str::trim))
}

/// Effective capability mask from a `/proc/<pid>/status` document.
pub fn effective_caps(status: &str) -> Option<u64> {
    status_field(status, "CapEff").and_then(|hex| u64::from_str_radix(hex, 16).ok())
}

pub const fn has_cap(mask: u64, cap: u32) -> bool {
    mask & (1 << cap) != 0
}

/// Sorted names listed by `ls -A` in the container; empty if `dir` is empty.
pub fn list_dir(f: &Framework, id: &ContainerId, dir: &str) -> Vec<String> {
    let mut names: Vec<String> = shell_output(f, id, &format!("ls -A {dir}"))
        .split_whitespace()
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tcat\nNoNewPrivs:\t1\nSeccomp:\t2\nCapEff:\t00000000a80425fb\n";

    #[test]
    fn reads_status_fields() {
        assert_eq!(status_field(STATUS, "NoNewPrivs"), Some("1"));
        assert_eq!(status_field(STATUS, "Seccomp"), Some("2"));
        assert_eq!(status_field(STATUS, "Name"), Some("cat"));
        assert_eq!(status_field(STATUS, "Cpus_allowed"), None);
    }

    #[test]
    fn default_capability_set() {
        let mask = effective_caps(STATUS).unwrap();
        assert!(has_cap(mask, 0));
        assert!(!has_cap(mask, 21));
        assert_eq!(effective_caps("CapEff:\tzz"), None);
    }
}
