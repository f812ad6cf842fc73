//! Memory limit control.

use std::path::Path;

use burrow_common::error::Result;
use burrow_common::types::MemoryLimit;

/// Sets the hard memory limit of a cgroup v1 `memory` controller directory.
///
/// # Errors
///
/// Returns an error if writing to `memory.limit_in_bytes` fails.
pub fn set_limit_in_bytes(cgroup_path: &Path, limit: &MemoryLimit) -> Result<()> {
    super::write_control(cgroup_path, "memory.limit_in_bytes", limit.as_str())?;
    tracing::debug!(limit = %limit, bytes = limit.bytes(), "memory limit set");
    Ok(())
}

/// Sets the hard memory limit of a cgroup v2 directory.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, limit: &MemoryLimit) -> Result<()> {
    super::write_control(cgroup_path, "memory.max", limit.as_str())?;
    tracing::debug!(limit = %limit, bytes = limit.bytes(), "memory max set");
    Ok(())
}
