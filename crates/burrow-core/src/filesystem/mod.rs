//! Root filesystem management for container isolation.
//!
//! [`RootFsManager`] owns the three phases of a container's root
//! filesystem:
//!
//! 1. [`prepare`](RootFsManager::prepare), in the launcher: create the
//!    per-container layer directories and mount the overlay.
//! 2. [`activate`](RootFsManager::activate), in the container's mount
//!    namespace: make propagation private, pivot into the merged tree,
//!    mount `/proc`, and drop the host root.
//! 3. [`teardown`](RootFsManager::teardown), in the launcher after exit:
//!    unmount and delete the layers.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;

use std::path::{Path, PathBuf};

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::{MOUNT_LAYER_DIR, WORK_LAYER_DIR, WRITE_LAYER_DIR};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerName;

use self::overlayfs::OverlayConfig;

/// Derives every per-container filesystem path from the image and runtime
/// directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFsLayout {
    image_dir: PathBuf,
    runtime_dir: PathBuf,
}

impl RootFsLayout {
    /// Creates a layout rooted at the given directories.
    #[must_use]
    pub fn new(image_dir: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    /// Creates the layout described by a runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.image_dir(), config.runtime_dir())
    }

    /// Returns the shared, read-only image directory.
    #[must_use]
    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Returns the merged mount point of a container.
    #[must_use]
    pub fn mount_point(&self, name: &ContainerName) -> PathBuf {
        self.runtime_dir.join(MOUNT_LAYER_DIR).join(name)
    }

    /// Returns the overlay work directory of a container.
    #[must_use]
    pub fn work_layer(&self, name: &ContainerName) -> PathBuf {
        self.runtime_dir.join(WORK_LAYER_DIR).join(name)
    }

    /// Returns the writable upper layer of a container.
    #[must_use]
    pub fn write_layer(&self, name: &ContainerName) -> PathBuf {
        self.runtime_dir.join(WRITE_LAYER_DIR).join(name)
    }

    /// Returns the mount point, work layer, and write layer, in that order.
    #[must_use]
    pub fn layer_set(&self, name: &ContainerName) -> [PathBuf; 3] {
        [
            self.mount_point(name),
            self.work_layer(name),
            self.write_layer(name),
        ]
    }

    /// Returns the overlay configuration for a container.
    #[must_use]
    pub fn overlay(&self, name: &ContainerName) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![self.image_dir.clone()],
            upper_dir: self.write_layer(name),
            work_dir: self.work_layer(name),
            merged_dir: self.mount_point(name),
        }
    }
}

/// Builds, activates, and removes container root filesystems.
#[derive(Debug, Clone)]
pub struct RootFsManager {
    layout: RootFsLayout,
    proc_required: bool,
}

impl RootFsManager {
    /// Creates a manager for the given layout.
    ///
    /// With `proc_required` unset, a failed `/proc` mount during activation
    /// is logged as a warning instead of aborting the container.
    #[must_use]
    pub const fn new(layout: RootFsLayout, proc_required: bool) -> Self {
        Self {
            layout,
            proc_required,
        }
    }

    /// Creates a manager from a runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(RootFsLayout::from_config(config), config.proc_required)
    }

    /// Returns the path layout used by this manager.
    #[must_use]
    pub const fn layout(&self) -> &RootFsLayout {
        &self.layout
    }

    /// Creates the container's layer directories and mounts the overlay.
    ///
    /// After success the mount point shows the image merged with the
    /// (empty) write layer; every write lands in the write layer. Nothing is
    /// cleaned up on failure: [`teardown`](Self::teardown) is the explicit
    /// cleanup step.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] if the image directory is missing,
    /// [`BurrowError::NameInUse`] if any layer directory already exists, or
    /// an I/O / syscall error if directory creation or the mount fails.
    pub fn prepare(&self, name: &ContainerName) -> Result<()> {
        if !self.layout.image_dir.is_dir() {
            return Err(BurrowError::NotFound {
                kind: "image directory",
                id: self.layout.image_dir.display().to_string(),
            });
        }
        if let Some(path) = self.layout.layer_set(name).into_iter().find(|p| p.exists()) {
            return Err(BurrowError::NameInUse {
                name: name.to_string(),
                path,
            });
        }

        overlayfs::mount_overlay(&self.layout.overlay(name))?;
        tracing::info!(
            name = %name,
            path = %self.layout.mount_point(name).display(),
            "rootfs prepared"
        );
        Ok(())
    }

    /// Switches the calling mount namespace's root to the container's
    /// merged directory.
    ///
    /// Must run inside a fresh mount namespace, after [`prepare`](Self::prepare)
    /// completed in the launcher, and before the target program starts.
    /// Afterwards the host filesystem is unreachable from the caller and its
    /// descendants, and `/proc` reflects the container's pid namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. A `/proc` mount failure is only
    /// an error when the manager was built with `proc_required`.
    pub fn activate(&self, name: &ContainerName) -> Result<()> {
        let new_root = self.layout.mount_point(name);

        mount::make_mounts_private()?;
        mount::bind_mount(&new_root, &new_root)?;
        pivot_root::pivot_root(&new_root)?;

        match mount::mount_proc(Path::new("/proc")) {
            Ok(()) => {}
            Err(e) if !self.proc_required => {
                tracing::warn!(error = %e, "continuing without /proc");
            }
            Err(e) => return Err(e),
        }

        pivot_root::detach_old_root()?;
        tracing::info!(name = %name, "rootfs activated");
        Ok(())
    }

    /// Unmounts the container's overlay and deletes its three layer
    /// directories.
    ///
    /// Idempotent: missing mounts and directories are not errors. Must only
    /// run after the container process exited, otherwise the unmount fails
    /// with `EBUSY`. When the unmount fails nothing is deleted, so a live
    /// merged tree is never recursed into.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Teardown`] listing every step that failed.
    pub fn teardown(&self, name: &ContainerName) -> Result<()> {
        let mount_point = self.layout.mount_point(name);
        if let Err(e) = overlayfs::unmount_overlay(&mount_point) {
            tracing::error!(name = %name, error = %e, "rootfs unmount failed");
            return Err(BurrowError::Teardown {
                failures: vec![e.to_string()],
            });
        }

        let mut failures = Vec::new();
        for dir in self.layout.layer_set(name) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "layer removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let e = BurrowError::io(&dir, e);
                    tracing::error!(name = %name, error = %e, "layer removal failed");
                    failures.push(e.to_string());
                }
            }
        }
        if !failures.is_empty() {
            return Err(BurrowError::Teardown { failures });
        }
        tracing::info!(name = %name, "rootfs torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mount_scratch, unmount_scratch};

    fn name(s: &str) -> ContainerName {
        ContainerName::new(s).unwrap()
    }

    fn manager(base: &Path) -> RootFsManager {
        RootFsManager::new(RootFsLayout::new(base.join("image"), base.join("runtime")), true)
    }

    #[test]
    fn layout_keys_every_path_by_name() {
        let layout = RootFsLayout::new("/data/image", "/data/runtime");
        let demo = name("demo");
        assert_eq!(layout.mount_point(&demo), PathBuf::from("/data/runtime/mnt/demo"));
        assert_eq!(layout.work_layer(&demo), PathBuf::from("/data/runtime/work/demo"));
        assert_eq!(layout.write_layer(&demo), PathBuf::from("/data/runtime/write/demo"));
    }

    #[test]
    fn layout_from_config_uses_data_dir() {
        let config = RuntimeConfig {
            data_dir: PathBuf::from("/srv/burrow"),
            ..RuntimeConfig::default()
        };
        let layout = RootFsLayout::from_config(&config);
        assert_eq!(layout.image_dir(), Path::new("/srv/burrow/image"));
        assert_eq!(
            layout.mount_point(&name("x")),
            PathBuf::from("/srv/burrow/runtime/mnt/x")
        );
    }

    #[test]
    fn overlay_uses_image_as_only_lower_layer() {
        let layout = RootFsLayout::new("/i", "/r");
        let overlay = layout.overlay(&name("demo"));
        assert_eq!(overlay.lower_dirs, vec![PathBuf::from("/i")]);
        assert_eq!(overlay.upper_dir, PathBuf::from("/r/write/demo"));
        assert_eq!(overlay.work_dir, PathBuf::from("/r/work/demo"));
        assert_eq!(overlay.merged_dir, PathBuf::from("/r/mnt/demo"));
    }

    #[test]
    fn prepare_without_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = manager(dir.path()).prepare(&name("demo")).unwrap_err();
        assert!(matches!(err, BurrowError::NotFound { .. }));
        assert!(!dir.path().join("runtime").exists());
    }

    #[test]
    fn prepare_rejects_existing_layers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("image")).unwrap();
        std::fs::create_dir_all(dir.path().join("runtime/write/demo")).unwrap();

        let err = manager(dir.path()).prepare(&name("demo")).unwrap_err();
        match err {
            BurrowError::NameInUse { name, path } => {
                assert_eq!(name, "demo");
                assert_eq!(path, dir.path().join("runtime/write/demo"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn teardown_of_unknown_container_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        if !mount_scratch(dir.path()) {
            return;
        }
        let mgr = manager(dir.path());
        let first = mgr.teardown(&name("ghost"));
        let second = mgr.teardown(&name("ghost"));
        unmount_scratch(dir.path());
        first.unwrap();
        second.unwrap();
    }

    #[test]
    fn prepare_write_teardown_leaves_image_untouched() {
        let dir = tempfile::tempdir().unwrap();
        if !mount_scratch(dir.path()) {
            return;
        }
        let image = dir.path().join("image");
        std::fs::create_dir_all(image.join("etc")).unwrap();
        std::fs::write(image.join("etc/os-release"), "ID=test\n").unwrap();

        let mgr = manager(dir.path());
        let demo = name("demo");
        mgr.prepare(&demo).unwrap();

        let merged = mgr.layout().mount_point(&demo);
        assert_eq!(
            std::fs::read_to_string(merged.join("etc/os-release")).unwrap(),
            "ID=test\n"
        );
        std::fs::write(merged.join("hello"), "hi from demo\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(mgr.layout().write_layer(&demo).join("hello")).unwrap(),
            "hi from demo\n"
        );
        assert!(!image.join("hello").exists());

        mgr.teardown(&demo).unwrap();
        for path in mgr.layout().layer_set(&demo) {
            assert!(!path.exists(), "{} left behind", path.display());
        }
        assert!(image.join("etc/os-release").exists());
        unmount_scratch(dir.path());
    }
}
