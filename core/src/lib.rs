//! didiff core - configuration and error types shared by the patch
//! pipeline and the command-line front end.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{LogLevel, PatchConfig, StoreBackend, StoreConfig};
pub use error::{PatchError, Result, StoreOp};

/// didiff version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
