//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks the shared read-only image under a per-container writable upper
//! layer, giving each container a copy-on-write view of the image.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};

use crate::sys_err;

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `lowerdir=…,upperdir=…,workdir=…` mount data.
    ///
    /// # Errors
    ///
    /// Returns an error if a path contains `,` or `:`, which the overlay
    /// option parser would split on.
    pub fn mount_data(&self) -> Result<String> {
        let all = self
            .lower_dirs
            .iter()
            .chain([&self.upper_dir, &self.work_dir]);
        for dir in all {
            let text = dir.to_string_lossy();
            if text.contains(',') || text.contains(':') {
                return Err(BurrowError::Config {
                    message: format!("overlay layer path may not contain ',' or ':': {text}"),
                });
            }
        }
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Ok(format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        ))
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the merged, work, and upper directories (mode `0700`) if they
/// do not exist, then issues the `mount(2)` syscall with overlay options.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    let data = config.mount_data()?;
    let mut builder = std::fs::DirBuilder::new();
    let _ = builder.recursive(true).mode(0o700);
    for dir in [&config.merged_dir, &config.work_dir, &config.upper_dir] {
        builder.create(dir).map_err(|e| BurrowError::io(dir, e))?;
    }

    nix::mount::mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(data.as_str()),
    )
    .map_err(sys_err("mount overlay", &config.merged_dir))?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Unmounts an `OverlayFS` at the given path.
///
/// The unmount is not lazy: a mount still in use by a live container fails
/// with `EBUSY` instead of being silently detached. Returns `false` when
/// nothing was mounted there (or the path does not exist).
///
/// # Errors
///
/// Returns an error if the unmount syscall fails for any other reason.
pub fn unmount_overlay(merged_dir: &Path) -> Result<bool> {
    match nix::mount::umount2(merged_dir, MntFlags::empty()) {
        Ok(()) => {
            tracing::info!(path = %merged_dir.display(), "overlayfs unmounted");
            Ok(true)
        }
        Err(Errno::EINVAL | Errno::ENOENT) => {
            tracing::debug!(path = %merged_dir.display(), "overlayfs not mounted");
            Ok(false)
        }
        Err(e) => Err(BurrowError::syscall("unmount overlay", merged_dir, e)),
    }
}
