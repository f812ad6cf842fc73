//! Container lifecycle management for the burrow runtime.
//!
//! A container runs as two cooperating processes. The launcher (`burrow
//! run`) prepares the root filesystem, clones a child into fresh
//! namespaces that re-executes this binary in `init` mode, attaches the
//! child to its cgroups, and then releases it over a pipe. The init phase
//! pivots into the container root and execs the target command in place,
//! keeping its pid. When the container exits the launcher tears everything
//! down again.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod init;
pub mod interrupt;
pub mod process;
pub mod sync;
pub mod terminal;
