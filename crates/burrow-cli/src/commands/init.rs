//! `burrow init`: the container-side half of `run`.

use std::process::ExitCode;

use burrow_common::types::ContainerName;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Container name, used as hostname and to locate the root filesystem.
    pub name: ContainerName,

    /// Command that replaces the init process.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `init` command. Only returns on failure.
///
/// The runtime configuration arrives from the launcher through the
/// environment, so the global options are ignored here.
///
/// # Errors
///
/// Returns an error if activation or the final exec fails.
pub fn execute(_global: &GlobalArgs, args: InitArgs) -> anyhow::Result<ExitCode> {
    match burrow_runtime::init::run(&args.name, &args.command)? {}
}
