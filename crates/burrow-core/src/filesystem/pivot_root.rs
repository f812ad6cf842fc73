//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, which only changes the calling process's view of `/`,
//! `pivot_root` replaces the root of the whole mount namespace, so every
//! process in the container sees the new tree and the host root can be
//! detached entirely.

use std::path::Path;

use burrow_common::constants::OLD_ROOT_DIR;
use burrow_common::error::{BurrowError, Result};
use nix::mount::MntFlags;

use crate::sys_err;

/// Makes `new_root` the root of the calling mount namespace.
///
/// The previous root is moved to `<new_root>/.old` and the working
/// directory is changed to the new `/`. `new_root` must be a mount point
/// that is not shared.
///
/// # Errors
///
/// Returns an error if the landing directory cannot be created or if
/// `pivot_root(2)` or `chdir(2)` fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(OLD_ROOT_DIR);
    std::fs::create_dir_all(&put_old).map_err(|e| BurrowError::io(&put_old, e))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(sys_err("pivot_root", new_root))?;
    let root = Path::new("/");
    nix::unistd::chdir(root).map_err(sys_err("chdir", root))?;

    tracing::info!(new_root = %new_root.display(), "root switched");
    Ok(())
}

/// Detaches and removes the old root left behind by [`pivot_root`].
///
/// The unmount is lazy so that references still held into the old tree
/// do not block it.
///
/// # Errors
///
/// Returns an error if the unmount or the directory removal fails.
pub fn detach_old_root() -> Result<()> {
    let old = Path::new("/").join(OLD_ROOT_DIR);
    nix::mount::umount2(&old, MntFlags::MNT_DETACH).map_err(sys_err("unmount old root", &old))?;
    std::fs::remove_dir(&old).map_err(|e| BurrowError::io(&old, e))?;
    tracing::debug!(path = %old.display(), "old root detached");
    Ok(())
}
