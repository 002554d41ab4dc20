//! `didiff images` command.

use clap::Args;
use didiff_core::config::PatchConfig;
use didiff_runtime::ImageIdentity;

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image IDs (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    config: &PatchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = super::open_pipeline(config)?;
    let images = pipeline.store().list().await?;

    // --quiet: print only IDs
    if args.quiet {
        for image in &images {
            println!("{}", image.short_id());
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "IMAGE ID", "CREATED", "SIZE"]);
    for row in images.iter().flat_map(ImageRow::from_identity) {
        table.add_row(&[&row.repository, &row.tag, &row.id, &row.created, &row.size]);
    }

    println!("{table}");
    Ok(())
}

/// Pre-computed display fields for a single table row.
#[derive(Debug, PartialEq)]
struct ImageRow {
    repository: String,
    tag: String,
    id: String,
    created: String,
    size: String,
}

impl ImageRow {
    /// One row per tag, or a single `<none>` row for untagged images.
    fn from_identity(image: &ImageIdentity) -> Vec<Self> {
        let row = |repository: &str, tag: &str| Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            id: image.short_id().to_string(),
            created: output::format_ago(&image.created),
            size: output::format_bytes(image.size_bytes),
        };

        if image.repo_tags.is_empty() {
            return vec![row("<none>", "<none>")];
        }
        image
            .repo_tags
            .iter()
            .map(|label| {
                let (repository, tag) = split_repo_tag(label);
                row(repository, tag)
            })
            .collect()
    }
}

/// Split "registry:5000/repo:tag" into ("registry:5000/repo", "tag").
fn split_repo_tag(label: &str) -> (&str, &str) {
    let name_start = label.rfind('/').map(|i| i + 1).unwrap_or(0);
    match label[name_start..].rfind(':') {
        Some(i) => (&label[..name_start + i], &label[name_start + i + 1..]),
        None => (label, "<none>"),
    }
}
