//! In-memory store used by pipeline tests.
//!
//! Identities are content-addressed (`sha256:` of the image bytes), every
//! call is counted, and each operation can be made to fail.

use async_trait::async_trait;
use chrono::Utc;
use didiff_core::error::{PatchError, Result, StoreOp};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ImageIdentity, ImageStoreClient};

#[derive(Default)]
struct State {
    images: Vec<(ImageIdentity, Vec<u8>)>,
    lists: usize,
    exports: usize,
    imports: usize,
    tags: usize,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
    fail: Vec<StoreOp>,
    silent_import: bool,
}

pub(crate) fn content_id(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_image(self, bytes: &[u8], tags: &[&str]) -> Self {
        self.insert(bytes, tags);
        self
    }

    /// Make every call of `op` fail.
    pub(crate) fn failing(mut self, op: StoreOp) -> Self {
        self.fail.push(op);
        self
    }

    /// Accept imports without registering anything.
    pub(crate) fn silent_import(mut self) -> Self {
        self.silent_import = true;
        self
    }

    pub(crate) fn insert(&self, bytes: &[u8], tags: &[&str]) -> String {
        let id = content_id(bytes);
        let mut state = self.state.lock();
        if !state.images.iter().any(|(img, _)| img.id == id) {
            state.images.push((
                ImageIdentity {
                    id: id.clone(),
                    repo_tags: tags.iter().map(|t| t.to_string()).collect(),
                    size_bytes: bytes.len() as u64,
                    created: Utc::now(),
                },
                bytes.to_vec(),
            ));
        }
        id
    }

    pub(crate) fn bytes_of(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .images
            .iter()
            .find(|(img, _)| img.id == id)
            .map(|(_, bytes)| bytes.clone())
    }

    pub(crate) fn tags_of(&self, id: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .images
            .iter()
            .find(|(img, _)| img.id == id)
            .map(|(img, _)| img.repo_tags.clone())
            .unwrap_or_default()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().lists
    }

    pub(crate) fn export_calls(&self) -> usize {
        self.state.lock().exports
    }

    pub(crate) fn import_calls(&self) -> usize {
        self.state.lock().imports
    }

    pub(crate) fn tag_calls(&self) -> usize {
        self.state.lock().tags
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if self.fail.contains(&op) {
            return Err(PatchError::store(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStoreClient for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<ImageIdentity>> {
        self.state.lock().lists += 1;
        self.check(StoreOp::List)?;
        let state = self.state.lock();
        Ok(state.images.iter().map(|(img, _)| img.clone()).collect())
    }

    async fn export(&self, id: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        self.state.lock().exports += 1;
        self.check(StoreOp::Export)?;
        let bytes = self
            .bytes_of(id)
            .ok_or_else(|| PatchError::store(StoreOp::Export, format!("No such image: {id}")))?;
        sink.write_all(&bytes)
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, e.to_string()))?;
        Ok(bytes.len() as u64)
    }

    async fn import(&self, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<()> {
        self.state.lock().imports += 1;
        self.check(StoreOp::Import)?;
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| PatchError::store(StoreOp::Import, e.to_string()))?;
        if !self.silent_import {
            self.insert(&bytes, &[]);
        }
        Ok(())
    }

    async fn tag(&self, id: &str, label: &str) -> Result<()> {
        self.state.lock().tags += 1;
        self.check(StoreOp::Tag)?;
        let mut state = self.state.lock();
        let (img, _) = state
            .images
            .iter_mut()
            .find(|(img, _)| img.id == id)
            .ok_or_else(|| PatchError::store(StoreOp::Tag, format!("No such image: {id}")))?;
        img.repo_tags.push(label.to_string());
        Ok(())
    }
}
