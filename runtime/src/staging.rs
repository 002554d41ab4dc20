//! Temporary on-disk staging for exported image streams.
//!
//! A [`StagedFile`] owns one uniquely named temporary file. It is deleted
//! exactly once when the handle is dropped, on success and error paths
//! alike; a failed deletion is logged as a warning and never replaces the
//! error the caller is already returning.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use didiff_core::error::{PatchError, Result};
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::store::{ImageIdentity, ImageStoreClient};

/// Where staged exports and scratch outputs are allocated.
#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    dir: Option<PathBuf>,
}

impl StagingArea {
    /// Use `dir` for temporary files, or the system temp dir when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Resolved staging directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Allocate an empty, writable temporary file.
    pub fn scratch(&self, label: &str) -> Result<StagedFile> {
        let dir = self.dir();
        let (file, path) = tempfile::Builder::new()
            .prefix(&format!("didiff-{label}-"))
            .tempfile_in(&dir)
            .map_err(|e| {
                PatchError::Staging(format!(
                    "Failed to create temporary file in {}: {}",
                    dir.display(),
                    e
                ))
            })?
            .into_parts();

        tracing::debug!(path = %path.display(), label, "Allocated staging file");
        Ok(StagedFile {
            file,
            path: Some(path),
        })
    }

    /// Export `identity` from `store` into a new staged file.
    ///
    /// The returned file is flushed to stable storage and positioned at
    /// offset 0. If the export fails the partial file is removed.
    pub async fn stage_export(
        &self,
        store: &dyn ImageStoreClient,
        identity: &ImageIdentity,
        label: &str,
    ) -> Result<StagedFile> {
        let mut staged = self.scratch(label)?;

        let mut writer = tokio::fs::File::from_std(staged.try_clone_file()?);
        let bytes = store.export(&identity.id, &mut writer).await?;
        writer
            .flush()
            .await
            .map_err(|e| staging_error("flush", staged.path(), e))?;
        drop(writer);

        staged.finish()?;
        tracing::debug!(
            id = %identity.id,
            bytes,
            path = %staged.path().display(),
            "Staged image export"
        );
        Ok(staged)
    }
}

/// Exclusively owned temporary file, removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    path: Option<TempPath>,
}

impl StagedFile {
    /// Path of the temporary file.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Current size in bytes.
    pub fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| staging_error("stat", self.path(), e))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Another handle to the same open file (shared offset).
    pub fn try_clone_file(&self) -> Result<File> {
        self.file
            .try_clone()
            .map_err(|e| staging_error("duplicate handle for", self.path(), e))
    }

    /// Mutable access to the underlying file.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush written data to stable storage and rewind to offset 0.
    pub fn finish(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| staging_error("flush", self.path(), e))?;
        self.file
            .sync_all()
            .map_err(|e| staging_error("sync", self.path(), e))?;
        self.rewind()
    }

    /// Reposition to offset 0.
    pub fn rewind(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| staging_error("seek", self.path(), e))?;
        Ok(())
    }

    /// SHA-256 of the whole file as lowercase hex; leaves the file rewound.
    pub fn sha256(&mut self) -> Result<String> {
        self.rewind()?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut self.file, &mut hasher)
            .map_err(|e| staging_error("hash", self.path(), e))?;
        self.rewind()?;
        Ok(hex::encode(hasher.finalize()))
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => tracing::debug!(path = %shown, "Removed staging file"),
                Err(e) => tracing::warn!(
                    path = %shown,
                    error = %e,
                    "Unable to clean up temporary file"
                ),
            }
        }
    }
}

fn staging_error(action: &str, path: &Path, err: std::io::Error) -> PatchError {
    PatchError::Staging(format!("Failed to {} {}: {}", action, path.display(), err))
}
