//! Host mounts with explicit propagation.

use std::path::{Path, PathBuf};

use critest_common::error::{CritestError, Result};
use critest_runner::expect_ok;

use crate::framework::Framework;

/// Propagation of a host mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// `rprivate`
    Private,
    /// `rshared`
    Shared,
    /// `rslave`
    Slave,
}

/// Bind-mounts `path` onto itself and sets its propagation.
///
/// The bind mount is detached again if the propagation cannot be set.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a `mount(2)`
/// call fails.
pub fn bind_mount_self(path: &Path, propagation: Propagation) -> Result<()> {
    bind_self(path)?;
    if let Err(e) = set_propagation(path, propagation) {
        if let Err(undo) = unmount(path) {
            tracing::warn!(path = %path.display(), error = %undo, "cannot detach bind mount");
        }
        return Err(e);
    }
    Ok(())
}

/// Bind-mounts `path` onto itself, creating it first.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn bind_self(path: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    std::fs::create_dir_all(path).map_err(|e| CritestError::io(path, e))?;
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| mount_error("bind", path, e))?;
    tracing::debug!(path = %path.display(), "bind-mounted host directory");
    Ok(())
}

/// Sets the recursive propagation of the mount point at `path`.
///
/// # Errors
///
/// Returns an error if `path` is not a mount point or `mount(2)` fails.
#[cfg(target_os = "linux")]
pub fn set_propagation(path: &Path, propagation: Propagation) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let flag = match propagation {
        Propagation::Private => MsFlags::MS_PRIVATE,
        Propagation::Shared => MsFlags::MS_SHARED,
        Propagation::Slave => MsFlags::MS_SLAVE,
    };
    mount(None::<&str>, path, None::<&str>, MsFlags::MS_REC | flag, None::<&str>)
        .map_err(|e| mount_error("set propagation of", path, e))?;
    tracing::debug!(path = %path.display(), ?propagation, "set mount propagation");
    Ok(())
}

/// Mounts a fresh tmpfs at `path`, creating it first.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_tmpfs(path: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    std::fs::create_dir_all(path).map_err(|e| CritestError::io(path, e))?;
    mount(
        Some("tmpfs"),
        path,
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| mount_error("tmpfs-mount", path, e))?;
    tracing::debug!(path = %path.display(), "mounted tmpfs");
    Ok(())
}

/// Detaches whatever is mounted at `path`.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails.
#[cfg(target_os = "linux")]
pub fn unmount(path: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};

    umount2(path, MntFlags::MNT_DETACH).map_err(|e| mount_error("unmount", path, e))?;
    tracing::debug!(path = %path.display(), "unmounted");
    Ok(())
}

/// Like [`unmount`], but a `path` that is no longer a mount point is fine.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails for any other reason.
#[cfg(target_os = "linux")]
pub fn unmount_if_mounted(path: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};

    match umount2(path, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "unmounted");
            Ok(())
        }
        Err(nix::Error::EINVAL) => {
            tracing::debug!(path = %path.display(), "already unmounted");
            Ok(())
        }
        Err(e) => Err(mount_error("unmount", path, e)),
    }
}

#[cfg(target_os = "linux")]
fn mount_error(action: &str, path: &Path, e: nix::Error) -> CritestError {
    CritestError::PermissionDenied {
        message: format!("cannot {action} {}: {e}", path.display()),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; host mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_self(_path: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; host mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_propagation(_path: &Path, _propagation: Propagation) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; host mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_tmpfs(_path: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; host mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_path: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; host mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount_if_mounted(_path: &Path) -> Result<()> {
    Err(linux_required())
}

#[cfg(not(target_os = "linux"))]
fn linux_required() -> CritestError {
    CritestError::Unsupported {
        message: "host mounts require Linux".into(),
    }
}

impl Framework {
    /// A scratch directory bind-mounted onto itself with `propagation`.
    ///
    /// Unmounted, then removed, when the spec ends.
    pub fn host_bind_mount(&mut self, prefix: &str, propagation: Propagation) -> PathBuf {
        let path = self.temp_dir(prefix);
        expect_ok(bind_self(&path), "bind-mount host directory");
        let released = path.clone();
        self.defer(format!("unmount {}", path.display()), move || {
            unmount(&released)
        });
        expect_ok(
            set_propagation(&path, propagation),
            "set host mount propagation",
        );
        path
    }

    /// A tmpfs mounted at `path`; unmounted when the spec ends.
    pub fn host_tmpfs(&mut self, path: &Path) {
        expect_ok(mount_tmpfs(path), "mount tmpfs");
        let released = path.to_path_buf();
        self.defer(format!("unmount {}", path.display()), move || {
            unmount(&released)
        });
    }
}
