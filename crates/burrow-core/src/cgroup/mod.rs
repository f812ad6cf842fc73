//! Control group resource management.
//!
//! Creates a per-container cgroup under a project directory, writes CPU
//! and memory limits, and enrols the container's pid. Two layouts are
//! supported:
//!
//! - **v1**: one hierarchy per controller,
//!   `<root>/cpu/<project>/<name>` and `<root>/memory/<project>/<name>`,
//!   membership in `tasks`.
//! - **v2**: the unified hierarchy, `<root>/<project>/<name>`, membership
//!   in `cgroup.procs`.

pub mod cpu;
pub mod memory;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::{CGROUP_REMOVE_ATTEMPTS, CGROUP_REMOVE_BACKOFF_MS, CPU_PERIOD_US};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{CgroupVersion, ContainerName, ResourceLimits};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Creates, populates, and removes per-container cgroups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupManager {
    root: PathBuf,
    project: String,
    version: CgroupVersion,
}

impl CgroupManager {
    /// Creates a manager for the cgroup filesystem mounted at `root`.
    ///
    /// [`CgroupVersion::Auto`] is resolved here, once, by looking for the
    /// v2 `cgroup.controllers` file at the root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, project: impl Into<String>, version: CgroupVersion) -> Self {
        let root = root.into();
        let version = match version {
            CgroupVersion::Auto => detect_version(&root),
            explicit => explicit,
        };
        Self {
            root,
            project: project.into(),
            version,
        }
    }

    /// Creates a manager from a runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.cgroup_root, &config.project, config.cgroup_version)
    }

    /// Returns the resolved hierarchy version (never `Auto`).
    #[must_use]
    pub const fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Returns the cgroup directory holding the CPU limit of `name`.
    #[must_use]
    pub fn cpu_path(&self, name: &ContainerName) -> PathBuf {
        match self.version {
            CgroupVersion::V2 => self.unified_path(name),
            _ => self.root.join("cpu").join(&self.project).join(name),
        }
    }

    /// Returns the cgroup directory holding the memory limit of `name`.
    #[must_use]
    pub fn memory_path(&self, name: &ContainerName) -> PathBuf {
        match self.version {
            CgroupVersion::V2 => self.unified_path(name),
            _ => self.root.join("memory").join(&self.project).join(name),
        }
    }

    /// Returns every distinct cgroup directory owned by `name`.
    #[must_use]
    pub fn paths(&self, name: &ContainerName) -> Vec<PathBuf> {
        match self.version {
            CgroupVersion::V2 => vec![self.unified_path(name)],
            _ => vec![self.cpu_path(name), self.memory_path(name)],
        }
    }

    fn unified_path(&self, name: &ContainerName) -> PathBuf {
        self.root.join(&self.project).join(name)
    }

    /// Returns the name of the file listing a cgroup's members.
    #[must_use]
    pub const fn membership_file(&self) -> &'static str {
        match self.version {
            CgroupVersion::V2 => "cgroup.procs",
            _ => "tasks",
        }
    }

    /// Returns the distinct pids currently listed in the cgroups of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing membership file cannot be read.
    pub fn members(&self, name: &ContainerName) -> Result<BTreeSet<i32>> {
        let mut pids = BTreeSet::new();
        for dir in self.paths(name) {
            let path = dir.join(self.membership_file());
            let listing = match std::fs::read_to_string(&path) {
                Ok(listing) => listing,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BurrowError::io(&path, e)),
            };
            pids.extend(listing.lines().filter_map(|line| line.trim().parse::<i32>().ok()));
        }
        Ok(pids)
    }

    /// Sends `SIGKILL` to every process left in the cgroups of `name`.
    ///
    /// A container whose launcher died keeps running as pid 1 of its own
    /// namespace, where it ignores catchable signals, and keeps its cgroups
    /// and overlay busy. Returns how many processes were signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if a membership file cannot be read or a listed
    /// process cannot be signaled.
    pub fn kill_members(&self, name: &ContainerName) -> Result<usize> {
        let mut killed = 0;
        for pid in self.members(name)? {
            if pid <= 0 {
                continue;
            }
            match kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) => killed += 1,
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(BurrowError::syscall("kill", self.cpu_path(name), e)),
            }
        }
        if killed > 0 {
            tracing::warn!(name = %name, killed, "killed processes left in cgroup");
        }
        Ok(killed)
    }

    /// Places `pid` under CPU and memory limits in the cgroup of `name`.
    ///
    /// Creates the cgroup directories, writes the limits, then appends the
    /// pid to each membership list. The kernel enforces the limits from
    /// that moment on, for the process and everything it execs.
    ///
    /// # Errors
    ///
    /// Returns an error naming the failing path if a directory cannot be
    /// created or a control file cannot be written.
    pub fn apply(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()> {
        match self.version {
            CgroupVersion::V2 => self.apply_unified(pid, name, limits)?,
            _ => self.apply_per_controller(pid, name, limits)?,
        }
        tracing::info!(
            name = %name,
            pid,
            cpu_quota_us = limits.cpu_quota_us,
            memory = %limits.memory,
            "cgroup limits applied"
        );
        Ok(())
    }

    fn apply_per_controller(
        &self,
        pid: u32,
        name: &ContainerName,
        limits: &ResourceLimits,
    ) -> Result<()> {
        let cpu_path = self.cpu_path(name);
        create_dir(&cpu_path)?;
        cpu::set_cfs_quota(&cpu_path, limits.cpu_quota_us)?;
        add_member(&cpu_path, self.membership_file(), pid)?;

        let memory_path = self.memory_path(name);
        create_dir(&memory_path)?;
        memory::set_limit_in_bytes(&memory_path, &limits.memory)?;
        add_member(&memory_path, self.membership_file(), pid)?;
        Ok(())
    }

    fn apply_unified(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()> {
        let project_path = self.root.join(&self.project);
        create_dir(&project_path)?;
        write_control(&project_path, "cgroup.subtree_control", "+cpu +memory")?;

        let path = self.unified_path(name);
        create_dir(&path)?;
        cpu::set_cpu_max(&path, limits.cpu_quota_us, CPU_PERIOD_US)?;
        memory::set_memory_max(&path, &limits.memory)?;
        add_member(&path, self.membership_file(), pid)?;
        Ok(())
    }

    /// Removes every cgroup directory of `name`.
    ///
    /// Directories that do not exist are skipped, so releasing twice is
    /// harmless. A cgroup whose last member has not been fully reaped yet
    /// reports `EBUSY`; removal is retried a few times before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Teardown`] listing each directory that could
    /// not be removed.
    pub fn release(&self, name: &ContainerName) -> Result<()> {
        let failures: Vec<String> = self
            .paths(name)
            .iter()
            .filter_map(|path| remove_cgroup_dir(path).err())
            .inspect(|e| tracing::error!(name = %name, error = %e, "cgroup removal failed"))
            .map(|e| e.to_string())
            .collect();
        if !failures.is_empty() {
            return Err(BurrowError::Teardown { failures });
        }
        tracing::info!(name = %name, "cgroup released");
        Ok(())
    }
}

/// Detects the hierarchy mounted at `root`.
#[must_use]
pub fn detect_version(root: &Path) -> CgroupVersion {
    if root.join("cgroup.controllers").is_file() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| BurrowError::io(path, e))?;
    tracing::debug!(path = %path.display(), "cgroup directory created");
    Ok(())
}

/// Writes `value` into the control file `file` of the cgroup at `dir`.
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| BurrowError::io(&path, e))
}

/// Appends `pid` to the membership file `file` of the cgroup at `dir`.
fn add_member(dir: &Path, file: &str, pid: u32) -> Result<()> {
    let path = dir.join(file);
    let mut handle = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BurrowError::io(&path, e))?;
    write_member(&mut handle, pid).map_err(|e| BurrowError::io(&path, e))?;
    tracing::debug!(pid, path = %path.display(), "process added to cgroup");
    Ok(())
}

/// Writes one membership record in a single `write(2)`.
///
/// cgroupfs parses every write on its own and rejects a lone newline with
/// `EINVAL`, so the pid and its terminator must not be split.
fn write_member(out: &mut impl Write, pid: u32) -> std::io::Result<()> {
    out.write_all(format!("{pid}\n").as_bytes())
}

/// Removes a cgroup directory, retrying while the kernel reports it busy.
///
/// Cgroup directories are removed with `rmdir(2)`: their control files
/// cannot be unlinked. A plain directory that is not empty (a cgroup tree
/// emulated on a regular filesystem) falls back to recursive removal.
fn remove_cgroup_dir(path: &Path) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match std::fs::remove_dir(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "cgroup directory removed");
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempt < CGROUP_REMOVE_ATTEMPTS => {
                tracing::debug!(path = %path.display(), attempt, "cgroup busy, retrying");
                std::thread::sleep(Duration::from_millis(CGROUP_REMOVE_BACKOFF_MS));
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                return std::fs::remove_dir_all(path).map_err(|e| BurrowError::io(path, e));
            }
            Err(e) => return Err(BurrowError::io(path, e)),
        }
    }
}
