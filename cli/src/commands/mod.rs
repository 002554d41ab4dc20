//! CLI command definitions and dispatch.

mod apply;
mod create;
mod images;
mod version;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use didiff_core::config::{PatchConfig, StoreBackend};
use didiff_runtime::PatchPipeline;

/// didiff - binary patches between container images.
#[derive(Parser)]
#[command(name = "didiff", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Docker daemon address (e.g. unix:///var/run/docker.sock)
    #[arg(short = 'd', long, global = true)]
    pub docker_host: Option<String>,

    /// Directory for temporary files
    #[arg(short = 'e', long = "temp-directory", global = true)]
    pub temp_directory: Option<PathBuf>,

    /// Image store backend
    #[arg(long, global = true)]
    pub store: Option<StoreBackend>,

    /// Root directory of the local image store
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Minimum length of an image ID prefix
    #[arg(long, global = true)]
    pub min_prefix_len: Option<usize>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Create a patch that turns one image into another
    Create(create::CreateArgs),
    /// Rebuild an image from a source image and a patch
    Apply(apply::ApplyArgs),
    /// List images in the store
    Images(images::ImagesArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Build the configuration: optional YAML file, then flag overrides.
pub fn load_config(global: &GlobalArgs) -> Result<PatchConfig, Box<dyn std::error::Error>> {
    let mut config = match global.config {
        Some(ref path) => PatchConfig::load(path)?,
        None => PatchConfig::default(),
    };

    if let Some(ref host) = global.docker_host {
        config.store.docker_host = Some(host.clone());
    }
    if let Some(ref dir) = global.temp_directory {
        config.temp_dir = Some(dir.clone());
    }
    if let Some(backend) = global.store {
        config.store.backend = backend;
    }
    if let Some(ref dir) = global.store_dir {
        config.store.local_dir = Some(dir.clone());
    }
    if let Some(len) = global.min_prefix_len {
        config.min_prefix_len = len;
    }

    config.validate()?;
    Ok(config)
}

/// Open the configured store and wrap it in a pipeline.
pub(crate) fn open_pipeline(
    config: &PatchConfig,
) -> Result<PatchPipeline, Box<dyn std::error::Error>> {
    let store = didiff_runtime::open_store(&config.store)?;
    tracing::debug!(store = store.name(), "Opened image store");
    Ok(PatchPipeline::from_config(config, store))
}

/// Dispatch a parsed command to the appropriate handler.
pub async fn dispatch(
    command: Command,
    config: &PatchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Create(args) => create::execute(args, config).await,
        Command::Apply(args) => apply::execute(args, config).await,
        Command::Images(args) => images::execute(args, config).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(&GlobalArgs::default()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Docker);
        assert_eq!(config.min_prefix_len, 1);
        assert!(config.temp_dir.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("didiff.yaml");
        std::fs::write(
            &path,
            "store:\n  backend: docker\n  docker_host: unix:///file.sock\nmin_prefix_len: 4\n",
        )
        .unwrap();

        let global = GlobalArgs {
            config: Some(path),
            docker_host: Some("tcp://10.0.0.1:2375".to_string()),
            temp_directory: Some(tmp.path().to_path_buf()),
            store: Some(StoreBackend::Local),
            store_dir: Some(tmp.path().join("images")),
            min_prefix_len: None,
        };
        let config = load_config(&global).unwrap();
        assert_eq!(config.store.docker_host.as_deref(), Some("tcp://10.0.0.1:2375"));
        assert_eq!(config.store.backend, StoreBackend::Local);
        assert_eq!(config.store.local_dir(), tmp.path().join("images"));
        assert_eq!(config.temp_dir.as_deref(), Some(tmp.path()));
        assert_eq!(config.min_prefix_len, 4);
    }

    #[test]
    fn test_zero_prefix_len_rejected() {
        let global = GlobalArgs {
            min_prefix_len: Some(0),
            ..GlobalArgs::default()
        };
        let err = load_config(&global).unwrap_err();
        assert!(err.to_string().contains("min_prefix_len"));
    }
}
