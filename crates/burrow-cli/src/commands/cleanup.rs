//! `burrow cleanup`: remove what a crashed launcher left behind.

use std::process::ExitCode;

use burrow_common::types::ContainerName;
use burrow_runtime::backend::linux::LinuxBackend;
use burrow_runtime::container;
use burrow_runtime::terminal::TerminalMode;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `cleanup` command.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Name of the container to clean up.
    pub name: ContainerName,
}

/// Executes the `cleanup` command. Kills processes left in the container's
/// cgroups, then removes its cgroups and layers. Succeeds when nothing is
/// left.
///
/// # Errors
///
/// Returns an error listing every resource that could not be removed.
pub fn execute(global: &GlobalArgs, args: CleanupArgs) -> anyhow::Result<ExitCode> {
    let backend = LinuxBackend::new(global.runtime_config()?, TerminalMode::Inherit)?;
    container::cleanup(&backend, &args.name)?;
    tracing::info!(name = %args.name, "container resources removed");
    Ok(ExitCode::SUCCESS)
}
