//! didiff runtime - image patch creation and application.
//!
//! This crate provides the image store clients (Docker CLI, local OCI
//! layout store), reference resolution, temporary staging, the binary
//! delta engine and the create/apply pipeline built on top of them.

#![allow(clippy::result_large_err)]

pub mod delta;
pub mod pipeline;
pub mod resolve;
pub mod staging;
pub mod store;

// Re-export common types
pub use delta::{BsdiffEngine, DeltaEngine};
pub use pipeline::{ApplyJob, ApplyOutcome, CreateJob, CreateOutcome, CreatedPatch, PatchPipeline};
pub use resolve::{resolve_in, ImageResolver};
pub use staging::{StagedFile, StagingArea};
pub use store::{open_store, DockerCliStore, ImageIdentity, ImageStoreClient, LocalImageStore, StoredImage};

/// didiff runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
