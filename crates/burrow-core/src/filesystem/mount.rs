//! Mount utilities for container filesystem setup.
//!
//! Handles mount propagation, bind mounts, and the `/proc` mount inside
//! the container's mount namespace.

use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use nix::mount::MsFlags;

use crate::sys_err;

/// Recursively marks every mount below `/` as private.
///
/// Detaches the namespace's mount tree from the host's shared propagation
/// group. Hosts booted with systemd mount `/` shared, and `pivot_root(2)`
/// refuses to operate on a shared mount.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn make_mounts_private() -> Result<()> {
    let root = Path::new("/");
    nix::mount::mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(sys_err("make mounts private", root))?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// Creates a recursive bind mount from `source` to `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    nix::mount::mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(sys_err("bind mount", target))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Mounts a fresh `proc` filesystem at `target`.
///
/// Execution, setuid binaries, and device files are disallowed on it. The
/// directory is created if the image does not ship one.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| BurrowError::io(target, e))?;
    nix::mount::mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(sys_err("mount proc", target))?;
    tracing::debug!(target = %target.display(), "proc mounted");
    Ok(())
}
