//! Container-side phase of the launcher.
//!
//! Runs as pid 1 of the container's namespaces after the re-exec. It waits
//! for the launcher's start signal, names the host, switches into the
//! container root, and finally replaces itself with the target command.

use std::convert::Infallible;
use std::ffi::CString;

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::{CONFIG_ENV, SYNC_FD_ENV};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerName;
use burrow_core::filesystem::RootFsManager;
use burrow_core::namespace::uts;

/// Runs the init phase for container `name` and execs `command`.
///
/// Only returns on failure; on success the calling process becomes the
/// target program with the same pid.
///
/// # Errors
///
/// Returns [`BurrowError::Sync`] if the launcher aborted,
/// [`BurrowError::Config`] if not running as pid 1 of a fresh pid namespace,
/// a syscall error if root activation fails, or [`BurrowError::Exec`] if
/// the target cannot be executed.
pub fn run(name: &ContainerName, command: &[String]) -> Result<Infallible> {
    let config = load_config()?;
    if command.is_empty() {
        return Err(BurrowError::Config {
            message: "no command to run".into(),
        });
    }
    let pid = nix::unistd::getpid().as_raw();
    if pid != 1 {
        return Err(BurrowError::Config {
            message: format!("init must run as pid 1 of a new pid namespace (pid {pid}); use `burrow run`"),
        });
    }

    crate::sync::wait_for_start()?;
    tracing::debug!(name = %name, "released by launcher");

    uts::set_hostname(name.as_str())?;
    RootFsManager::from_config(&config).activate(name)?;

    tracing::info!(name = %name, command = %command.join(" "), "starting container command");
    exec(command)
}

fn load_config() -> Result<RuntimeConfig> {
    match std::env::var(CONFIG_ENV) {
        Ok(json) => RuntimeConfig::from_json(&json),
        Err(_) => {
            tracing::warn!("{CONFIG_ENV} not set, using default configuration");
            Ok(RuntimeConfig::default())
        }
    }
}

/// Replaces the current process with `command`, searching `PATH`.
fn exec(command: &[String]) -> Result<Infallible> {
    let exec_err = |source: std::io::Error| BurrowError::Exec {
        command: command.join(" "),
        source,
    };
    let nul_err = |_| {
        exec_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "argument contains a NUL byte",
        ))
    };

    let args = command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(nul_err)?;
    let env = target_env()
        .into_iter()
        .map(|(key, value)| CString::new(format!("{key}={value}")))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(nul_err)?;

    let Some(program) = args.first() else {
        return Err(BurrowError::Config {
            message: "no command to run".into(),
        });
    };
    let errno = match nix::unistd::execvpe(program, &args, &env) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    Err(exec_err(errno.into()))
}

/// Environment of the target: this process's environment without the
/// launcher handoff variables.
fn target_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(key, _)| key != CONFIG_ENV && key != SYNC_FD_ENV)
        .collect()
}
