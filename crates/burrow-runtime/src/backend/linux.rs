//! Linux backend built on namespaces, `OverlayFS`, and cgroups.

use std::path::PathBuf;

use burrow_common::config::RuntimeConfig;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerName, ResourceLimits};
use burrow_core::cgroup::CgroupManager;
use burrow_core::filesystem::RootFsManager;
use burrow_core::namespace::{Namespace, NamespaceSet, set_namespace_isolation};

use super::Backend;
use crate::process::{InitProcess, SpawnedInit};
use crate::terminal::TerminalMode;

/// Binary the container process re-executes for its init phase.
const SELF_EXE: &str = "/proc/self/exe";

/// Backend that drives the host kernel directly.
///
/// Every host path comes from the [`RuntimeConfig`] it was built with, which
/// is also handed to the init phase so both sides agree on the layout.
#[derive(Debug)]
pub struct LinuxBackend {
    config: RuntimeConfig,
    rootfs: RootFsManager,
    cgroups: CgroupManager,
    namespaces: NamespaceSet,
    terminal: TerminalMode,
    program: PathBuf,
}

impl LinuxBackend {
    /// Creates a backend isolating containers in every supported namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RuntimeConfig, terminal: TerminalMode) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rootfs: RootFsManager::from_config(&config),
            cgroups: CgroupManager::from_config(&config),
            namespaces: NamespaceSet::default(),
            terminal,
            program: PathBuf::from(SELF_EXE),
            config,
        })
    }

    /// Replaces the namespace set.
    ///
    /// The init phase relies on being pid 1 of its own pid namespace, on a
    /// private mount namespace for the root switch, and on its own UTS
    /// namespace for the hostname, so those three cannot be disabled.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if a required namespace is missing.
    pub fn with_namespaces(mut self, namespaces: NamespaceSet) -> Result<Self> {
        if let Some(missing) = [Namespace::Pid, Namespace::Mount, Namespace::Uts]
            .into_iter()
            .find(|ns| !namespaces.contains(*ns))
        {
            return Err(BurrowError::Config {
                message: format!("the {missing:?} namespace cannot be disabled"),
            });
        }
        self.namespaces = namespaces;
        Ok(self)
    }

    /// Returns the configuration this backend was built with.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Describes the init process for `name` without spawning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn init_process(&self, name: &ContainerName, command: &[String]) -> Result<InitProcess> {
        let mut init = InitProcess::new(&self.program, name, command, &self.config)?;
        set_namespace_isolation(&mut init, &self.namespaces);
        Ok(init)
    }
}

impl Backend for LinuxBackend {
    type Child = SpawnedInit;

    fn prepare_rootfs(&self, name: &ContainerName) -> Result<()> {
        self.rootfs.prepare(name)
    }

    fn spawn(&self, name: &ContainerName, command: &[String]) -> Result<SpawnedInit> {
        if command.is_empty() {
            return Err(BurrowError::Config {
                message: format!("no command given for container {name}"),
            });
        }
        self.init_process(name, command)?.spawn(self.terminal)
    }

    fn apply_limits(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()> {
        self.cgroups.apply(pid, name, limits)
    }

    fn release_limits(&self, name: &ContainerName) -> Result<()> {
        self.cgroups.release(name)
    }

    fn evict(&self, name: &ContainerName) -> Result<usize> {
        self.cgroups.kill_members(name)
    }

    fn teardown_rootfs(&self, name: &ContainerName) -> Result<()> {
        self.rootfs.teardown(name)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use nix::sched::CloneFlags;

    use super::*;

    fn config(base: &Path) -> RuntimeConfig {
        RuntimeConfig {
            data_dir: base.join("data"),
            cgroup_root: base.join("cgroup"),
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn relative_config_is_rejected() {
        let config = RuntimeConfig {
            data_dir: PathBuf::from("data"),
            ..RuntimeConfig::default()
        };
        assert!(LinuxBackend::new(config, TerminalMode::Inherit).is_err());
    }

    #[test]
    fn init_process_reexecutes_self_in_all_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LinuxBackend::new(config(dir.path()), TerminalMode::Inherit).unwrap();
        let name = ContainerName::new("demo").unwrap();

        let init = backend.init_process(&name, &["/bin/sh".to_string()]).unwrap();
        assert_eq!(init.program(), Path::new("/proc/self/exe"));
        assert_eq!(init.clone_flags(), NamespaceSet::default().clone_flags());
    }

    #[test]
    fn namespace_set_can_be_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = NamespaceSet::empty();
        set.pid = true;
        set.mount = true;
        set.uts = true;
        let backend = LinuxBackend::new(config(dir.path()), TerminalMode::Inherit)
            .unwrap()
            .with_namespaces(set)
            .unwrap();

        let init = backend
            .init_process(&ContainerName::new("demo").unwrap(), &["true".to_string()])
            .unwrap();
        assert!(init.clone_flags().contains(Namespace::Pid.clone_flag()));
        assert!(!init.clone_flags().contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn required_namespaces_cannot_be_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = NamespaceSet::default();
        set.pid = false;
        let err = LinuxBackend::new(config(dir.path()), TerminalMode::Inherit)
            .unwrap()
            .with_namespaces(set)
            .unwrap_err();
        assert!(err.to_string().contains("Pid"));
    }

    #[test]
    fn prepare_without_image_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LinuxBackend::new(config(dir.path()), TerminalMode::Inherit).unwrap();
        let err = backend
            .prepare_rootfs(&ContainerName::new("demo").unwrap())
            .unwrap_err();
        assert!(matches!(err, BurrowError::NotFound { .. }));
    }

    #[test]
    fn teardown_of_unknown_cgroups_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cgroup")).unwrap();
        let backend = LinuxBackend::new(config(dir.path()), TerminalMode::Inherit).unwrap();
        backend
            .release_limits(&ContainerName::new("ghost").unwrap())
            .unwrap();
    }
}
