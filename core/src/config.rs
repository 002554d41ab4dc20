use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PatchError, Result};

/// Pipeline configuration, built once per invocation and passed down.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Image store connection
    pub store: StoreConfig,

    /// Directory for staged exports and scratch output (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,

    /// Minimum length of an image ID prefix query
    pub min_prefix_len: usize,

    /// Remove a partially written patch file when `create` fails
    pub remove_partial_output: bool,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: LogLevel,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            temp_dir: None,
            min_prefix_len: 1,
            remove_partial_output: true,
            log_level: LogLevel::Warn,
        }
    }
}

impl PatchConfig {
    /// Load a configuration from a YAML file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PatchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: PatchConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value invariants.
    pub fn validate(&self) -> Result<()> {
        if self.min_prefix_len == 0 {
            return Err(PatchError::Config(
                "min_prefix_len must be at least 1".to_string(),
            ));
        }
        if let Some(ref dir) = self.temp_dir {
            if dir.as_os_str().is_empty() {
                return Err(PatchError::Config("temp_dir must not be empty".to_string()));
            }
        }
        if self.store.docker_bin.as_os_str().is_empty() {
            return Err(PatchError::Config("docker_bin must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Image store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which store client to use
    pub backend: StoreBackend,

    /// Docker daemon address, exported as `DOCKER_HOST` (e.g. "unix:///var/run/docker.sock")
    pub docker_host: Option<String>,

    /// Docker CLI executable
    pub docker_bin: PathBuf,

    /// Root of the local image store (~/.didiff/images if unset)
    pub local_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Docker,
            docker_host: None,
            docker_bin: PathBuf::from("docker"),
            local_dir: None,
        }
    }
}

impl StoreConfig {
    /// Resolved local store directory.
    pub fn local_dir(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(default_local_dir)
    }
}

/// Return the default local image store directory (~/.didiff/images).
pub fn default_local_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".didiff"))
        .unwrap_or_else(|| PathBuf::from(".didiff"))
        .join("images")
}

/// Image store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Docker daemon, driven through the docker CLI
    Docker,

    /// On-disk OCI layout store
    Local,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(StoreBackend::Docker),
            "local" => Ok(StoreBackend::Local),
            other => Err(format!("unknown store backend '{other}' (expected docker or local)")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
