//! `burrow pull`: populate the shared base image.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Root filesystem archive (`.tar`, `.tar.gz` or `.tgz`).
    pub archive: PathBuf,
}

/// Executes the `pull` command.
///
/// # Errors
///
/// Returns an error if the archive cannot be extracted.
#[allow(clippy::print_stdout)]
pub fn execute(global: &GlobalArgs, args: PullArgs) -> anyhow::Result<ExitCode> {
    let config = global.runtime_config()?;
    let image = burrow_image::pull::pull(&args.archive, &config.image_dir())
        .with_context(|| format!("pulling {}", args.archive.display()))?;

    println!(
        "{}\t{}\t{}",
        image.path.display(),
        output::format_bytes(image.archive_bytes),
        image.digest
    );
    Ok(ExitCode::SUCCESS)
}
