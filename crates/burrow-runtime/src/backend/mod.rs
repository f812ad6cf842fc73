//! Host backend abstraction for the container lifecycle.
//!
//! [`Container`](crate::container::Container) only sequences the lifecycle;
//! every step that touches the host goes through a [`Backend`]. The Linux
//! implementation lives in [`linux`].

pub mod linux;

use burrow_common::error::Result;
use burrow_common::types::{ContainerName, ResourceLimits};

use crate::container::ExitStatus;

/// Handle to a spawned, not yet released container process.
pub trait ContainerChild {
    /// Returns the host pid of the container process.
    fn pid(&self) -> u32;

    /// Lets the process proceed to root activation and the target command.
    ///
    /// # Errors
    ///
    /// Returns an error if the release signal cannot be delivered.
    fn release(&mut self) -> Result<()>;

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    fn wait(&mut self) -> Result<ExitStatus>;

    /// Kills the process and reaps it. A no-op once it has been reaped.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can neither be signaled nor reaped.
    fn kill(&mut self) -> Result<()>;
}

/// Host operations the lifecycle is built from.
pub trait Backend {
    /// Process handle produced by [`spawn`](Self::spawn).
    type Child: ContainerChild;

    /// Builds the container's root filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the root filesystem cannot be prepared.
    fn prepare_rootfs(&self, name: &ContainerName) -> Result<()>;

    /// Creates the container process in its new namespaces. The process
    /// must not run `command` before [`ContainerChild::release`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be created.
    fn spawn(&self, name: &ContainerName, command: &[String]) -> Result<Self::Child>;

    /// Places `pid` into the container's cgroups with `limits`.
    ///
    /// # Errors
    ///
    /// Returns an error if the limits cannot be applied.
    fn apply_limits(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()>;

    /// Removes the container's cgroups.
    ///
    /// # Errors
    ///
    /// Returns an error if a cgroup directory cannot be removed.
    fn release_limits(&self, name: &ContainerName) -> Result<()>;

    /// Kills every process still attached to the container's cgroups and
    /// returns how many were signaled. Backends without processes of their
    /// own have nothing to kill.
    ///
    /// # Errors
    ///
    /// Returns an error if the remaining processes cannot be listed or
    /// signaled.
    fn evict(&self, name: &ContainerName) -> Result<usize> {
        let _ = name;
        Ok(0)
    }

    /// Unmounts and deletes the container's root filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if any teardown step fails.
    fn teardown_rootfs(&self, name: &ContainerName) -> Result<()>;
}
