//! CLI command definitions and dispatch.

pub mod cleanup;
pub mod init;
pub mod pull;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use burrow_common::config::RuntimeConfig;
use clap::{Args, Parser, Subcommand};

/// burrow: run a command in an isolated, resource-limited container.
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime location overrides.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// JSON configuration file; missing keys take defaults.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base directory for the image and container layers.
    #[arg(long, global = true, env = "BURROW_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Mount point of the cgroup filesystem.
    #[arg(long, global = true, env = "BURROW_CGROUP_ROOT", value_name = "DIR")]
    pub cgroup_root: Option<PathBuf>,
}

impl GlobalArgs {
    /// Builds the runtime configuration: file (or defaults), then overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => RuntimeConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract a root filesystem archive as the shared base image.
    Pull(pull::PullArgs),
    /// Run a command in a new container and exit with its status.
    Run(run::RunArgs),
    /// Container-side phase of `run`; not meant to be called directly.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// Remove the layers and cgroups left behind by a container.
    Cleanup(cleanup::CleanupArgs),
}

impl Cli {
    /// Log level used when `RUST_LOG` is unset. The init phase shares the
    /// container's terminal, so it only reports problems.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        match self.command {
            Command::Init(_) => "warn",
            _ => "info",
        }
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Pull(args) => pull::execute(&cli.global, args),
        Command::Run(args) => run::execute(&cli.global, args),
        Command::Init(args) => init::execute(&cli.global, args),
        Command::Cleanup(args) => cleanup::execute(&cli.global, args),
    }
}
