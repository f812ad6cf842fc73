//! CPU bandwidth control.
//!
//! The quota is the CPU time, in microseconds, a group may consume per
//! scheduling period; capping it caps the group's average CPU share.

use std::path::Path;

use burrow_common::error::Result;

/// Sets the CFS quota of a cgroup v1 `cpu` controller directory.
///
/// Writes `quota_us` to `cpu.cfs_quota_us`; the period is left at the
/// kernel default (100 ms).
///
/// # Errors
///
/// Returns an error if writing to `cpu.cfs_quota_us` fails.
pub fn set_cfs_quota(cgroup_path: &Path, quota_us: u64) -> Result<()> {
    super::write_control(cgroup_path, "cpu.cfs_quota_us", &quota_us.to_string())?;
    tracing::debug!(quota_us, "CPU CFS quota set");
    Ok(())
}

/// Sets the CPU bandwidth limit of a cgroup v2 directory.
///
/// Writes `quota_us period_us` to `cpu.max`.
///
/// # Errors
///
/// Returns an error if writing to `cpu.max` fails.
pub fn set_cpu_max(cgroup_path: &Path, quota_us: u64, period_us: u64) -> Result<()> {
    super::write_control(cgroup_path, "cpu.max", &format!("{quota_us} {period_us}"))?;
    tracing::debug!(quota_us, period_us, "CPU max quota set");
    Ok(())
}
