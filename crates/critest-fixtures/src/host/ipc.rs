//! System V shared memory segments on the host.

use critest_common::error::{CritestError, Result};
use critest_runner::{expect_ok, step};

use super::command::{StderrPolicy, run_host_command};
use crate::framework::Framework;

/// Extracts the segment id from `ipcmk -M` output.
///
/// # Errors
///
/// Returns an error if the output carries no id.
pub fn parse_segment_id(output: &str) -> Result<u32> {
    output
        .split(':')
        .nth(1)
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| CritestError::HostCommand {
            command: "ipcmk -M".into(),
            message: format!("unexpected output {output:?}"),
        })
}

/// Creates a shared memory segment of `size` bytes and returns its id.
///
/// # Errors
///
/// Returns an error if `ipcmk` fails.
pub fn create_segment(size: usize) -> Result<u32> {
    let output = run_host_command("ipcmk", &["-M", &size.to_string()], StderrPolicy::Ignore)?;
    let id = parse_segment_id(&output)?;
    tracing::debug!(id, size, "created shared memory segment");
    Ok(id)
}

/// Removes the segment `id`.
///
/// # Errors
///
/// Returns an error if `ipcrm` fails.
pub fn remove_segment(id: u32) -> Result<()> {
    let _ = run_host_command("ipcrm", &["-m", &id.to_string()], StderrPolicy::Ignore)?;
    Ok(())
}

impl Framework {
    /// A host shared memory segment removed when the spec ends.
    pub fn host_shm_segment(&mut self, size: usize) -> u32 {
        step("create shared memory segment on the host");
        let id = expect_ok(create_segment(size), "create shared memory segment");
        self.defer(format!("remove shared memory segment {id}"), move || {
            remove_segment(id)
        });
        id
    }
}
