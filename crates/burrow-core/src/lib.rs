//! # burrow-core
//!
//! Low-level Linux isolation primitives for the burrow runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: which isolation domains (UTS, PID, mount, network,
//!   IPC) a spawned process receives.
//! - **Cgroups**: CPU quota and memory limits on the v1 per-controller or
//!   the v2 unified hierarchy.
//! - **Filesystem**: `OverlayFS` layer management, mount helpers, and
//!   `pivot_root`.
//!
//! Every host path is derived from configuration passed to the managers'
//! constructors; nothing here reads global state.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;

use std::path::Path;

use burrow_common::error::BurrowError;

/// Maps a failed `nix` call to a [`BurrowError::Syscall`] naming `op` and `path`.
pub(crate) fn sys_err(
    op: &'static str,
    path: &Path,
) -> impl FnOnce(nix::Error) -> BurrowError + use<> {
    let path = path.to_path_buf();
    move |errno| BurrowError::syscall(op, path, errno)
}
