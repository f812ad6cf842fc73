//! UTS namespace helpers.
//!
//! Lets the container carry its own hostname without affecting the host.

use burrow_common::error::{BurrowError, Result};

/// Sets the hostname inside the calling process's UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| BurrowError::syscall("sethostname", hostname, e))?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}
