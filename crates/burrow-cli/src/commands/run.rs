//! `burrow run`: run one command in a new container.

use std::process::ExitCode;

use burrow_common::types::{ContainerName, MemoryLimit, ResourceLimits};
use burrow_runtime::backend::linux::LinuxBackend;
use burrow_runtime::container::Container;
use burrow_runtime::interrupt::Interrupt;
use burrow_runtime::terminal::TerminalMode;
use clap::Args;

use super::GlobalArgs;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// CPU time in microseconds per 100 ms period.
    #[arg(long, value_name = "US")]
    pub cpu_quota: Option<u64>,

    /// Memory limit in bytes, optionally suffixed with k, m, or g.
    #[arg(long, value_name = "LIMIT")]
    pub memory: Option<MemoryLimit>,

    /// Share the launcher's stdio instead of allocating a terminal.
    #[arg(long)]
    pub no_tty: bool,

    /// Container name; keys its layers, cgroups, and hostname.
    pub name: ContainerName,

    /// Command to run, with its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn limits(&self, defaults: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_quota_us: self.cpu_quota.unwrap_or(defaults.cpu_quota_us),
            memory: self.memory.clone().unwrap_or_else(|| defaults.memory.clone()),
        }
    }

    fn terminal_mode(&self) -> TerminalMode {
        if self.no_tty {
            TerminalMode::Inherit
        } else {
            TerminalMode::detect()
        }
    }
}

/// Executes the `run` command, returning the container's exit status.
///
/// `SIGINT`, `SIGTERM`, and `SIGHUP` kill the container rather than the
/// launcher, so its resources are still torn down.
///
/// # Errors
///
/// Returns an error if any lifecycle step fails.
pub fn execute(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = global.runtime_config()?;
    let limits = args.limits(&config.limits);
    let backend = LinuxBackend::new(config, args.terminal_mode())?;

    let interrupt = Interrupt::new();
    interrupt.install()?;
    let mut container =
        Container::new(args.name, args.command, limits)?.with_interrupt(interrupt);
    let status = container.run(&backend)?;
    Ok(ExitCode::from(u8::try_from(status.code()).unwrap_or(u8::MAX)))
}
