//! User namespace probes.

use std::path::Path;

use critest_common::constants::SELF_UID_MAP;
use critest_common::error::{CritestError, Result};

/// One line of a `uid_map` or `gid_map` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapEntry {
    /// First id inside the namespace.
    pub inside: u32,
    /// First id in the parent namespace.
    pub outside: u32,
    /// Number of ids mapped.
    pub length: u32,
}

/// Parses the contents of an id map file.
///
/// # Errors
///
/// Returns an error if a line does not hold three integers.
pub fn parse_id_map(content: &str) -> Result<Vec<IdMapEntry>> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let fields: Vec<u32> = line
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| CritestError::Config {
                    message: format!("bad id map line {line:?}: {e}"),
                })?;
            match fields[..] {
                [inside, outside, length] => Ok(IdMapEntry {
                    inside,
                    outside,
                    length,
                }),
                _ => Err(CritestError::Config {
                    message: format!("id map line {line:?} must have three fields"),
                }),
            }
        })
        .collect()
}

/// Returns whether `entries` describe the initial user namespace.
#[must_use]
pub fn is_identity_map(entries: &[IdMapEntry]) -> bool {
    entries
        == [IdMapEntry {
            inside: 0,
            outside: 0,
            length: u32::MAX,
        }]
}

/// Reads the calling process's uid map.
///
/// # Errors
///
/// Returns an error if the map cannot be read or parsed.
pub fn self_uid_map() -> Result<Vec<IdMapEntry>> {
    let content =
        std::fs::read_to_string(SELF_UID_MAP).map_err(|e| CritestError::io(Path::new(SELF_UID_MAP), e))?;
    parse_id_map(&content)
}
