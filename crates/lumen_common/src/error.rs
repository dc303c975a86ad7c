//! Error types for the update engine.

use thiserror::Error;

/// Every failure class the engine distinguishes. Only `TrustBootstrap`
/// is fatal to startup; the loops log the rest and retry on the next
/// tick.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("trust bootstrap failed: {0}")]
    TrustBootstrap(String),

    #[error("metadata refresh failed: {0}")]
    Metadata(String),

    #[error("artifact download failed: {0}")]
    Download(String),

    #[error("integrity check failed: expected sha256 {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("install failed: {0}")]
    Install(String),

    #[error("activation failed: {0}")]
    Activation(String),

    #[error("service control failed: {0}")]
    ServiceControl(String),

    #[error("version ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// True when the error must abort process startup rather than be
    /// retried by a loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateError::TrustBootstrap(_))
    }
}
