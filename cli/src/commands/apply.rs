//! `didiff apply` command.

use std::path::PathBuf;

use clap::Args;
use didiff_core::config::PatchConfig;
use didiff_runtime::ApplyJob;

use crate::output;

#[derive(Args)]
pub struct ApplyArgs {
    /// Image the patch was created from (repo:tag, full ID or ID prefix)
    pub source: String,

    /// Reference the rebuilt image must resolve under once loaded
    pub target: String,

    /// Patch file produced by `didiff create`
    pub patch_file: PathBuf,

    /// repo:tag for the new image (e.g. nginx:1.15.12 or example.com/cool_thing:1.2.3)
    #[arg(short = 't', long)]
    pub new_tag: Option<String>,

    /// Expected SHA-256 of the rebuilt image archive; checked before loading
    #[arg(long)]
    pub sha256: Option<String>,
}

pub async fn execute(
    args: ApplyArgs,
    config: &PatchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = super::open_pipeline(config)?;

    let outcome = pipeline
        .apply_patch_file(&ApplyJob {
            source: args.source,
            target: args.target,
            patch_path: args.patch_file,
            new_tag: args.new_tag,
            expected_sha256: args.sha256,
        })
        .await?;

    println!(
        "Loaded image {} ({}, sha256:{})",
        outcome.image.id,
        output::format_bytes(outcome.output_bytes),
        outcome.sha256
    );
    if let Some(ref tag) = outcome.tagged {
        println!("Tagged {} as {}", outcome.image.short_id(), tag);
    }
    if let Some(ref e) = outcome.tag_error {
        eprintln!("Warning: image loaded but not tagged: {e}");
    }
    Ok(())
}
