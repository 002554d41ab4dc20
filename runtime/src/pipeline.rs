//! Patch pipeline orchestration.
//!
//! Create: resolve source -> resolve target -> stage source -> stage target
//! -> compute delta into the caller's sink.
//!
//! Apply: resolve source -> stage source -> apply delta into a scratch file
//! -> import scratch stream -> re-resolve target.
//!
//! Every step runs once, in order, and the first failure aborts the run.
//! Staged files clean themselves up on drop, so an early return releases
//! everything acquired so far. A create run never mutates the store; an
//! apply run imports once and, if asked, tags once.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use didiff_core::config::PatchConfig;
use didiff_core::error::{PatchError, Result};

use crate::delta::{BsdiffEngine, DeltaEngine};
use crate::resolve::ImageResolver;
use crate::staging::StagingArea;
use crate::store::{ImageIdentity, ImageStoreClient};

/// Inputs of one `create` invocation.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub source: String,
    pub target: String,
    pub patch_path: PathBuf,
}

/// Inputs of one `apply` invocation.
#[derive(Debug, Clone)]
pub struct ApplyJob {
    pub source: String,
    pub target: String,
    pub patch_path: PathBuf,
    /// repo:tag to attach to the reconstructed image
    pub new_tag: Option<String>,
    /// Expected SHA-256 of the reconstructed stream (hex, optional `sha256:` prefix)
    pub expected_sha256: Option<String>,
}

/// Result of the create workflow over an arbitrary sink.
#[derive(Debug)]
pub struct CreatedPatch<W> {
    pub sink: W,
    pub source: ImageIdentity,
    pub target: ImageIdentity,
}

/// Result of a create run writing to a patch file.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub source: ImageIdentity,
    pub target: ImageIdentity,
    pub patch_path: PathBuf,
    pub patch_bytes: u64,
}

/// Result of an apply run.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Identity the target reference resolved to after import
    pub image: ImageIdentity,
    /// Size of the reconstructed stream
    pub output_bytes: u64,
    /// SHA-256 of the reconstructed stream (hex)
    pub sha256: String,
    /// Label applied to the image, if any
    pub tagged: Option<String>,
    /// Tagging failure; the patch itself still succeeded
    pub tag_error: Option<PatchError>,
}

/// Create/apply orchestrator over an injected store and delta engine.
pub struct PatchPipeline {
    store: Arc<dyn ImageStoreClient>,
    delta: Arc<dyn DeltaEngine>,
    staging: StagingArea,
    resolver: ImageResolver,
    remove_partial_output: bool,
}

impl PatchPipeline {
    pub fn new(
        store: Arc<dyn ImageStoreClient>,
        delta: Arc<dyn DeltaEngine>,
        staging: StagingArea,
        resolver: ImageResolver,
    ) -> Self {
        Self {
            store,
            delta,
            staging,
            resolver,
            remove_partial_output: true,
        }
    }

    /// Pipeline with the bsdiff engine and settings taken from `config`.
    pub fn from_config(config: &PatchConfig, store: Arc<dyn ImageStoreClient>) -> Self {
        Self::new(
            store,
            Arc::new(BsdiffEngine),
            StagingArea::new(config.temp_dir.clone()),
            ImageResolver::new(config.min_prefix_len),
        )
        .with_partial_output_removal(config.remove_partial_output)
    }

    /// Whether `create_patch_file` deletes its output file on failure.
    pub fn with_partial_output_removal(mut self, remove: bool) -> Self {
        self.remove_partial_output = remove;
        self
    }

    pub fn store(&self) -> &dyn ImageStoreClient {
        self.store.as_ref()
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Resolve a reference against the store.
    pub async fn resolve(&self, reference: &str) -> Result<ImageIdentity> {
        self.resolver.resolve(self.store(), reference).await
    }

    /// Compute a patch from `source_ref` to `target_ref` into `sink`.
    ///
    /// Both references must resolve to different images; that check runs
    /// before anything is exported.
    pub async fn create_patch<W>(
        &self,
        source_ref: &str,
        target_ref: &str,
        sink: W,
    ) -> Result<CreatedPatch<W>>
    where
        W: Write + Send + 'static,
    {
        let source = self.resolve(source_ref).await?;
        let target = self.resolve(target_ref).await?;
        if source.id == target.id {
            return Err(PatchError::InvalidInput(format!(
                "\"{source_ref}\" and \"{target_ref}\" refer to the same image {}",
                source.short_id()
            )));
        }
        tracing::debug!(source = %source.id, target = %target.id, "Resolved patch endpoints");

        let old = self.staging.stage_export(self.store(), &source, "old").await?;
        let new = self.staging.stage_export(self.store(), &target, "new").await?;

        let delta = Arc::clone(&self.delta);
        let sink = tokio::task::spawn_blocking(move || {
            let (mut old, mut new, mut sink) = (old, new, sink);
            delta.diff(old.file_mut(), new.file_mut(), &mut sink)?;
            Ok::<W, PatchError>(sink)
        })
        .await
        .map_err(|e| PatchError::Delta(format!("Delta task failed: {e}")))??;

        tracing::info!(
            source = %source.short_id(),
            target = %target.short_id(),
            engine = self.delta.name(),
            "Patch created"
        );
        Ok(CreatedPatch {
            sink,
            source,
            target,
        })
    }

    /// Rebuild `target_ref` from `source_ref` and a patch stream, import it
    /// and check that the target reference now resolves.
    ///
    /// The patch stream is consumed and closed whatever the outcome. A
    /// mismatch against `expected_sha256` fails the run before import.
    pub async fn apply_patch<R>(
        &self,
        source_ref: &str,
        target_ref: &str,
        patch: R,
        expected_sha256: Option<&str>,
    ) -> Result<ApplyOutcome>
    where
        R: Read + Send + 'static,
    {
        if target_ref.trim().is_empty() {
            return Err(PatchError::InvalidInput(
                "Target image reference must not be empty".to_string(),
            ));
        }

        let source = self.resolve(source_ref).await?;
        let staged = self.staging.stage_export(self.store(), &source, "src").await?;
        let output = self.staging.scratch("out")?;

        let delta = Arc::clone(&self.delta);
        let (output, output_bytes, sha256) = tokio::task::spawn_blocking(move || {
            let (mut staged, mut patch, mut output) = (staged, patch, output);
            let written = delta.patch(staged.file_mut(), &mut patch, output.file_mut())?;
            // Source export and patch are no longer needed once the output exists
            drop(staged);
            drop(patch);
            output.finish()?;
            let sha256 = output.sha256()?;
            Ok::<_, PatchError>((output, written, sha256))
        })
        .await
        .map_err(|e| PatchError::Delta(format!("Delta task failed: {e}")))??;

        tracing::debug!(
            path = %output.path().display(),
            bytes = output_bytes,
            sha256 = %sha256,
            "Reconstructed image stream"
        );

        if let Some(expected) = expected_sha256 {
            let expected = expected.trim();
            let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(PatchError::VerificationFailed(format!(
                    "reconstructed image digest sha256:{sha256} does not match expected sha256:{expected}"
                )));
            }
        }

        let mut reader = tokio::fs::File::from_std(output.try_clone_file()?);
        self.store.import(&mut reader).await?;
        drop(reader);
        drop(output);

        let image = match self.resolve(target_ref).await {
            Ok(image) => image,
            Err(PatchError::NotFound(_)) => {
                return Err(PatchError::VerificationFailed(format!(
                    "unable to patch {source_ref} to {target_ref}: {target_ref} is not available after import"
                )));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            target = target_ref,
            id = %image.short_id(),
            "Patch was successful, target is now available"
        );
        Ok(ApplyOutcome {
            image,
            output_bytes,
            sha256,
            tagged: None,
            tag_error: None,
        })
    }

    /// Run the create workflow into a file at `job.patch_path`.
    ///
    /// The patch is written to a temporary file next to `patch_path` and
    /// renamed over it on success, so a failed run leaves any existing file
    /// untouched.
    pub async fn create_patch_file(&self, job: &CreateJob) -> Result<CreateOutcome> {
        let dir = match job.patch_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".didiff-patch-");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o644));
        }
        let (file, partial) = builder
            .tempfile_in(dir)
            .map_err(|e| io_context("Unable to create patch file in", dir, e))?
            .into_parts();

        let result = self.write_patch_file(job, file).await;
        if result.is_ok() {
            partial.persist(&job.patch_path).map_err(|e| {
                io_context("Unable to write patch file", &job.patch_path, e.error)
            })?;
            return result;
        }
        if !self.remove_partial_output {
            if let Err(e) = partial.persist(&job.patch_path) {
                tracing::warn!(
                    path = %job.patch_path.display(),
                    error = %e.error,
                    "Unable to keep partial patch file"
                );
            }
            return result;
        }

        let shown = partial.display().to_string();
        match partial.close() {
            Ok(()) => tracing::debug!(path = %shown, "Removed partial patch file"),
            Err(e) => tracing::warn!(
                path = %shown,
                error = %e,
                "Unable to remove partial patch file"
            ),
        }
        result
    }

    async fn write_patch_file(&self, job: &CreateJob, file: File) -> Result<CreateOutcome> {
        let created = self.create_patch(&job.source, &job.target, file).await?;
        let file = created.sink;
        file.sync_all()
            .map_err(|e| io_context("Unable to sync patch file", &job.patch_path, e))?;
        let patch_bytes = file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| io_context("Unable to stat patch file", &job.patch_path, e))?;

        Ok(CreateOutcome {
            source: created.source,
            target: created.target,
            patch_path: job.patch_path.clone(),
            patch_bytes,
        })
    }

    /// Run the apply workflow from the file at `job.patch_path`, then tag.
    pub async fn apply_patch_file(&self, job: &ApplyJob) -> Result<ApplyOutcome> {
        let patch = File::open(&job.patch_path)
            .map_err(|e| io_context("Unable to open patch file", &job.patch_path, e))?;

        let mut outcome = self
            .apply_patch(
                &job.source,
                &job.target,
                patch,
                job.expected_sha256.as_deref(),
            )
            .await?;

        match job.new_tag.as_deref() {
            Some(label) => match self.store.tag(&outcome.image.id, label).await {
                Ok(()) => {
                    tracing::debug!(id = %outcome.image.id, label, "Tagged image");
                    outcome.tagged = Some(label.to_string());
                }
                Err(e) => {
                    tracing::warn!(id = %outcome.image.id, label, error = %e, "Unable to tag image");
                    outcome.tag_error = Some(e);
                }
            },
            None => tracing::warn!("New repo:tag was not specified, image left untagged"),
        }
        Ok(outcome)
    }
}

fn io_context(what: &str, path: &Path, err: std::io::Error) -> PatchError {
    PatchError::Io(std::io::Error::new(
        err.kind(),
        format!("{} {}: {}", what, path.display(), err),
    ))
}
