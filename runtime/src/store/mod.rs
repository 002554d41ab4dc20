//! Image store clients.
//!
//! The pipeline talks to the store only through [`ImageStoreClient`]:
//! enumerate identities, export one as a byte stream, import a byte
//! stream, and attach a repo:tag label. Two clients are provided:
//!
//! - [`DockerCliStore`] drives a Docker daemon through the `docker` CLI
//! - [`LocalImageStore`] keeps OCI image layouts in a directory on disk

mod docker;
mod local;
#[cfg(test)]
pub(crate) mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use didiff_core::config::{StoreBackend, StoreConfig};
use didiff_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

pub use docker::DockerCliStore;
pub use local::{LocalImageStore, StoredImage};

/// Canonical image identity as known by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIdentity {
    /// Content-hash identity (e.g., "sha256:abc123...")
    pub id: String,
    /// repo:tag labels attached to this identity
    pub repo_tags: Vec<String>,
    /// Size in bytes as reported by the store
    pub size_bytes: u64,
    /// Creation timestamp
    pub created: DateTime<Utc>,
}

impl ImageIdentity {
    /// Hex digest without the `algorithm:` prefix.
    pub fn hex(&self) -> &str {
        match self.id.split_once(':') {
            Some((_, hex)) => hex,
            None => &self.id,
        }
    }

    /// First 12 hex characters, the form shown by `docker images`.
    pub fn short_id(&self) -> &str {
        let hex = self.hex();
        hex.get(..12).unwrap_or(hex)
    }
}

/// Operations the pipeline needs from an image store.
///
/// Every call is attempted exactly once; failures surface as
/// `PatchError::Store` with the failing operation.
#[async_trait]
pub trait ImageStoreClient: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Enumerate all images, in store enumeration order.
    async fn list(&self) -> Result<Vec<ImageIdentity>>;

    /// Write the full byte representation of `id` into `sink`.
    ///
    /// Returns the number of bytes written.
    async fn export(&self, id: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64>;

    /// Register the image byte stream read from `source`.
    async fn import(&self, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<()>;

    /// Attach a repo:tag label to an existing image.
    async fn tag(&self, id: &str, label: &str) -> Result<()>;
}

/// Build the store client selected by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ImageStoreClient>> {
    match config.backend {
        StoreBackend::Docker => Ok(Arc::new(DockerCliStore::from_config(config))),
        StoreBackend::Local => {
            let store = LocalImageStore::new(&config.local_dir())?;
            Ok(Arc::new(store))
        }
    }
}
