//! Disk-based OCI image store.
//!
//! Stores OCI image layouts on disk under `sha256/<hex>/` with an in-memory
//! index backed by a persistent `index.json` file. Several references may
//! point at the same digest directory; the digest is the image identity.
//!
//! Exports are tar archives of the layout directory, written with sorted
//! entries and normalized headers so exporting an unchanged image always
//! yields the same bytes. That property is what lets a patch created
//! against one store be applied against another store holding the same
//! source image.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use didiff_core::error::{PatchError, Result, StoreOp};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

use super::{ImageIdentity, ImageStoreClient};

/// OCI annotation carrying the image reference inside `index.json`.
const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Metadata for a stored OCI image reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Reference string (e.g., "demo:1.0", or the digest itself)
    pub reference: String,
    /// Content digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Total size in bytes
    pub size_bytes: u64,
    /// When the reference was added
    pub added_at: DateTime<Utc>,
    /// Path to the OCI image layout on disk
    pub path: PathBuf,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-based image store with in-memory index.
pub struct LocalImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// In-memory index: reference → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl LocalImageStore {
    /// Create a new image store.
    ///
    /// Creates the store directory if it doesn't exist and loads
    /// any existing index from disk.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            PatchError::Config(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let mut store = Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(HashMap::new())),
        };

        store.load_index()?;
        Ok(store)
    }

    /// Get a stored image by reference.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        let index = self.index.read().await;
        index.get(reference).cloned()
    }

    /// Get a stored image by digest.
    pub async fn get_by_digest(&self, digest: &str) -> Option<StoredImage> {
        let index = self.index.read().await;
        index.values().find(|img| img.digest == digest).cloned()
    }

    /// Store an image from a source directory.
    ///
    /// Copies the OCI image layout from `source_dir` into the store
    /// under `sha256/<hex>/` unless that directory already exists.
    pub async fn put(
        &self,
        reference: &str,
        digest: &str,
        source_dir: &Path,
    ) -> Result<StoredImage> {
        let target_dir = self.store_dir.join("sha256").join(digest_hex(digest)?);

        if !target_dir.exists() {
            copy_dir_recursive(source_dir, &target_dir).map_err(|e| {
                PatchError::Staging(format!("Failed to copy image to store: {}", e))
            })?;
        }

        let stored = StoredImage {
            reference: reference.to_string(),
            digest: digest.to_string(),
            size_bytes: dir_size(&target_dir),
            added_at: Utc::now(),
            path: target_dir,
        };

        let mut index = self.index.write().await;
        index.insert(reference.to_string(), stored.clone());
        drop(index);

        self.save_index_inner().await?;

        Ok(stored)
    }

    /// List all stored references.
    pub async fn list_stored(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        index.values().cloned().collect()
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Load index from disk.
    fn load_index(&mut self) -> Result<()> {
        let index_path = self.store_dir.join("index.json");
        if !index_path.exists() {
            return Ok(());
        }

        let data = std::fs::read_to_string(&index_path).map_err(|e| {
            PatchError::Config(format!(
                "Failed to read image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        let store_index: StoreIndex = serde_json::from_str(&data)?;

        let mut index = HashMap::new();
        for image in store_index.images {
            // Only include images whose directories still exist
            if image.path.exists() {
                index.insert(image.reference.clone(), image);
            }
        }

        self.index = Arc::new(RwLock::new(index));
        Ok(())
    }

    /// Save index to disk (async inner helper).
    async fn save_index_inner(&self) -> Result<()> {
        let index = self.index.read().await;
        let store_index = StoreIndex {
            images: index.values().cloned().collect(),
        };
        drop(index);

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            PatchError::Staging(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Register an unpacked OCI layout; returns the digest and reference.
    async fn register_layout(&self, layout_dir: &Path) -> Result<(String, Option<String>)> {
        let index_path = layout_dir.join("index.json");
        let index_content = std::fs::read_to_string(&index_path).map_err(|e| {
            PatchError::store(
                StoreOp::Import,
                format!("Failed to read index.json from archive: {e}"),
            )
        })?;
        let index: serde_json::Value = serde_json::from_str(&index_content).map_err(|e| {
            PatchError::store(StoreOp::Import, format!("Invalid index.json: {e}"))
        })?;

        let digest = index["manifests"][0]["digest"]
            .as_str()
            .ok_or_else(|| PatchError::store(StoreOp::Import, "No manifest digest in index.json"))?
            .to_string();
        let reference = index["manifests"][0]["annotations"][REF_NAME_ANNOTATION]
            .as_str()
            .map(|s| s.to_string());

        self.put(&digest, &digest, layout_dir).await?;
        if let Some(ref reference) = reference {
            self.put(reference, &digest, layout_dir).await?;
        }
        Ok((digest, reference))
    }
}

#[async_trait]
impl ImageStoreClient for LocalImageStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self) -> Result<Vec<ImageIdentity>> {
        let mut stored = self.list_stored().await;
        stored.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.digest.cmp(&b.digest))
                .then_with(|| a.reference.cmp(&b.reference))
        });

        let mut identities: Vec<ImageIdentity> = Vec::new();
        for image in stored {
            let pos = match identities.iter().position(|i| i.id == image.digest) {
                Some(pos) => pos,
                None => {
                    identities.push(ImageIdentity {
                        id: image.digest.clone(),
                        repo_tags: Vec::new(),
                        size_bytes: image.size_bytes,
                        created: image.added_at,
                    });
                    identities.len() - 1
                }
            };
            if image.reference != image.digest {
                identities[pos].repo_tags.push(image.reference);
            }
        }
        Ok(identities)
    }

    async fn export(&self, id: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        let stored = self
            .get_by_digest(id)
            .await
            .ok_or_else(|| PatchError::store(StoreOp::Export, format!("No such image: {id}")))?;

        let layout = stored.path.clone();
        let archive = tokio::task::spawn_blocking(move || write_layout_tar(&layout))
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, format!("Export task failed: {e}")))?
            .map_err(|e| {
                PatchError::store(
                    StoreOp::Export,
                    format!("Failed to archive {}: {e}", stored.path.display()),
                )
            })?;

        sink.write_all(&archive)
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, e.to_string()))?;
        sink.flush()
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, e.to_string()))?;

        tracing::debug!(id, bytes = archive.len(), "Exported image layout");
        Ok(archive.len() as u64)
    }

    async fn import(&self, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<()> {
        let mut archive = Vec::new();
        source
            .read_to_end(&mut archive)
            .await
            .map_err(|e| PatchError::store(StoreOp::Import, e.to_string()))?;

        // Unpack next to the store so the final copy stays on one filesystem
        let unpack_dir = tempfile::Builder::new()
            .prefix(".import-")
            .tempdir_in(&self.store_dir)
            .map_err(|e| PatchError::Staging(format!("Failed to create temp directory: {e}")))?;

        let target = unpack_dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || tar::Archive::new(archive.as_slice()).unpack(&target))
            .await
            .map_err(|e| PatchError::store(StoreOp::Import, format!("Import task failed: {e}")))?
            .map_err(|e| {
                PatchError::store(StoreOp::Import, format!("Failed to extract archive: {e}"))
            })?;

        let (digest, reference) = self.register_layout(unpack_dir.path()).await?;
        tracing::debug!(
            ack = %format!("Loaded image: {}", reference.as_deref().unwrap_or(&digest)),
            digest = %digest,
            "Import acknowledged"
        );
        Ok(())
    }

    async fn tag(&self, id: &str, label: &str) -> Result<()> {
        let stored = self
            .get_by_digest(id)
            .await
            .ok_or_else(|| PatchError::store(StoreOp::Tag, format!("No such image: {id}")))?;

        // New reference pointing to the same digest directory (no disk copy)
        self.put(label, &stored.digest, &stored.path)
            .await
            .map_err(|e| PatchError::store(StoreOp::Tag, e.to_string()))?;
        Ok(())
    }
}

/// Hex part of a digest, checked so it is safe to use as a directory name.
fn digest_hex(digest: &str) -> Result<&str> {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PatchError::InvalidInput(format!(
            "Invalid image digest: {digest}"
        )));
    }
    Ok(hex)
}

/// Archive an OCI layout directory with sorted entries and fixed metadata.
fn write_layout_tar(layout: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append_dir_sorted(&mut builder, layout, layout)?;
    builder.into_inner()
}

fn append_dir_sorted(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    current: &Path,
) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(current)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if path.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, relative, std::io::empty())?;
            append_dir_sorted(builder, root, &path)?;
        } else {
            let mut file = std::fs::File::open(&path)?;
            let size = file.metadata()?.len();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(size);
            builder.append_data(&mut header, relative, (&mut file).take(size))?;
        }
    }
    Ok(())
}

/// Recursively copy a directory.
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Calculate total size of a directory recursively.
fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path);
            } else if let Ok(meta) = path.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
