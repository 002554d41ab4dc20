//! `didiff create` command.

use std::path::PathBuf;

use clap::Args;
use didiff_core::config::PatchConfig;
use didiff_runtime::CreateJob;

use crate::output;

#[derive(Args)]
pub struct CreateArgs {
    /// Image the patch starts from (repo:tag, full ID or ID prefix)
    pub source: String,

    /// Image the patch produces (repo:tag, full ID or ID prefix)
    pub target: String,

    /// Where to write the patch
    pub patch_file: PathBuf,
}

pub async fn execute(
    args: CreateArgs,
    config: &PatchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = super::open_pipeline(config)?;

    let outcome = pipeline
        .create_patch_file(&CreateJob {
            source: args.source,
            target: args.target,
            patch_path: args.patch_file,
        })
        .await?;

    println!(
        "Created patch {} ({}) from {} to {}",
        outcome.patch_path.display(),
        output::format_bytes(outcome.patch_bytes),
        outcome.source.short_id(),
        outcome.target.short_id()
    );
    Ok(())
}
