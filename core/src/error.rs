use std::fmt;

use thiserror::Error;

/// Image store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Export,
    Import,
    Tag,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::List => "list",
            StoreOp::Export => "export",
            StoreOp::Import => "import",
            StoreOp::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// didiff error types
#[derive(Error, Debug)]
pub enum PatchError {
    /// Rejected request (same source and target, malformed reference)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reference does not resolve to any image known to the store
    #[error("Unable to find an image matching {0}")]
    NotFound(String),

    /// Temporary file allocation, flush or seek failure
    #[error("Staging error: {0}")]
    Staging(String),

    /// Failure reported by the image store client
    #[error("Image store {op} failed: {message}")]
    Store { op: StoreOp, message: String },

    /// Binary diff or patch failure
    #[error("Delta error: {0}")]
    Delta(String),

    /// Post-import check did not find the expected image
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PatchError {
    /// Build a store error for the given operation.
    pub fn store(op: StoreOp, message: impl Into<String>) -> Self {
        PatchError::Store {
            op,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PatchError {
    fn from(err: serde_json::Error) -> Self {
        PatchError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PatchError {
    fn from(err: serde_yaml::Error) -> Self {
        PatchError::Serialization(err.to_string())
    }
}

/// Result type alias for didiff operations
pub type Result<T> = std::result::Result<T, PatchError>;
