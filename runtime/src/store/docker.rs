//! Docker daemon store client.
//!
//! Drives the `docker` CLI rather than the engine socket so the daemon
//! address, TLS settings and contexts configured for the CLI apply as-is.
//! `DOCKER_HOST` is set on every child when a host is configured.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use didiff_core::config::StoreConfig;
use didiff_core::error::{PatchError, Result, StoreOp};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use super::{ImageIdentity, ImageStoreClient};

/// Store client backed by the `docker` command-line tool.
#[derive(Debug, Clone)]
pub struct DockerCliStore {
    docker_bin: PathBuf,
    docker_host: Option<String>,
}

/// Subset of `docker image inspect` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    created: String,
}

impl DockerCliStore {
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            docker_host: None,
        }
    }

    /// Point every invocation at a specific daemon.
    pub fn with_host(mut self, docker_host: Option<String>) -> Self {
        self.docker_host = docker_host;
        self
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.docker_bin.clone()).with_host(config.docker_host.clone())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.docker_bin);
        if let Some(ref host) = self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a docker subcommand to completion and return its stdout.
    async fn run(&self, op: StoreOp, args: &[&str]) -> Result<Vec<u8>> {
        tracing::debug!(op = %op, args = ?args, "Running docker");

        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(op, &self.docker_bin, e))?;

        if !output.status.success() {
            return Err(PatchError::store(op, failure_message(&output.stderr, output.status)));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ImageStoreClient for DockerCliStore {
    fn name(&self) -> &str {
        "docker"
    }

    async fn list(&self) -> Result<Vec<ImageIdentity>> {
        let out = self
            .run(StoreOp::List, &["image", "ls", "--all", "--quiet", "--no-trunc"])
            .await?;
        let ids = parse_image_ids(&out);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["image", "inspect"];
        args.extend(ids.iter().map(String::as_str));
        let out = self.run(StoreOp::List, &args).await?;
        parse_inspect(&out)
    }

    async fn export(&self, id: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        let mut child = self
            .command()
            .args(["save", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(StoreOp::Export, &self.docker_bin, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PatchError::store(StoreOp::Export, "docker save stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PatchError::store(StoreOp::Export, "docker save stderr unavailable"))?;

        // A failed sink write closes the pipe and kills the child so stderr hits EOF
        let pump = async {
            let mut stdout = stdout;
            let copied = tokio::io::copy(&mut stdout, &mut *sink).await;
            drop(stdout);
            if copied.is_err() {
                let _ = child.start_kill();
            }
            copied
        };
        let mut err_buf = Vec::new();
        let (copied, _) = tokio::join!(pump, stderr.read_to_end(&mut err_buf));

        let status = child
            .wait()
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, e.to_string()))?;
        let copied = copied.map_err(|e| {
            PatchError::store(StoreOp::Export, format!("Failed to write image stream: {e}"))
        })?;
        if !status.success() {
            return Err(PatchError::store(StoreOp::Export, failure_message(&err_buf, status)));
        }

        sink.flush()
            .await
            .map_err(|e| PatchError::store(StoreOp::Export, e.to_string()))?;

        tracing::debug!(id, bytes = copied, "Saved image");
        Ok(copied)
    }

    async fn import(&self, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<()> {
        let mut child = self
            .command()
            .arg("load")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(StoreOp::Import, &self.docker_bin, e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PatchError::store(StoreOp::Import, "docker load stdin unavailable"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PatchError::store(StoreOp::Import, "docker load stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PatchError::store(StoreOp::Import, "docker load stderr unavailable"))?;

        let feed = async move {
            let copied = tokio::io::copy(source, &mut stdin).await?;
            stdin.shutdown().await?;
            Ok::<u64, std::io::Error>(copied)
        };
        let mut ack = Vec::new();
        let mut err_buf = Vec::new();
        let (fed, _, _) = tokio::join!(
            feed,
            stdout.read_to_end(&mut ack),
            stderr.read_to_end(&mut err_buf)
        );

        let status = child
            .wait()
            .await
            .map_err(|e| PatchError::store(StoreOp::Import, e.to_string()))?;
        if !status.success() {
            return Err(PatchError::store(StoreOp::Import, failure_message(&err_buf, status)));
        }
        let fed = fed.map_err(|e| PatchError::store(StoreOp::Import, e.to_string()))?;

        let ack = String::from_utf8_lossy(&ack);
        tracing::debug!(bytes = fed, ack = %ack.trim(), "Import acknowledged");
        Ok(())
    }

    async fn tag(&self, id: &str, label: &str) -> Result<()> {
        self.run(StoreOp::Tag, &["tag", id, label]).await?;
        Ok(())
    }
}

fn spawn_error(op: StoreOp, bin: &std::path::Path, err: std::io::Error) -> PatchError {
    PatchError::store(op, format!("Failed to run {}: {}", bin.display(), err))
}

fn failure_message(stderr: &[u8], status: std::process::ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        format!("docker exited with {status}")
    } else {
        text.to_string()
    }
}

/// Parse `docker image ls --quiet` output, dropping duplicates but keeping order.
fn parse_image_ids(out: &[u8]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in String::from_utf8_lossy(out).lines() {
        let id = line.trim();
        if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Parse `docker image inspect` JSON into identities.
fn parse_inspect(out: &[u8]) -> Result<Vec<ImageIdentity>> {
    let inspected: Vec<InspectedImage> = serde_json::from_slice(out)
        .map_err(|e| PatchError::store(StoreOp::List, format!("Invalid inspect output: {e}")))?;

    Ok(inspected
        .into_iter()
        .map(|img| ImageIdentity {
            id: img.id,
            repo_tags: img.repo_tags.unwrap_or_default(),
            size_bytes: img.size,
            created: DateTime::parse_from_rfc3339(&img.created)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
        .collect())
}
