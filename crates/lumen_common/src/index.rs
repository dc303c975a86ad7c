//! Trusted target index.
//!
//! The index is a small JSON document downloaded through the TUF client
//! and cached on disk, keyed by service name. It is the engine's only
//! source of truth for what should be running: remote artifact path,
//! SHA-256, version string and release date.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::UpdateError;

/// Per-artifact hashes recorded in the trusted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashes {
    pub sha256: String,
}

/// One trusted target record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Artifact size in bytes, kept as the string the publisher wrote.
    pub bytes: String,
    /// Remote path the artifact is fetched from.
    pub path: String,
    pub hashes: Hashes,
    /// Version string, also the installation directory name.
    pub version: String,
    #[serde(rename = "release-date")]
    pub release_date: String,
}

/// The whole index: service name -> target record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetIndex(pub BTreeMap<String, IndexEntry>);

impl TargetIndex {
    /// Load and parse the locally cached index file.
    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Metadata(format!("failed to read index file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| UpdateError::Metadata(format!("failed to parse index file: {}", e)))
    }

    /// Look up the record for one service.
    pub fn entry(&self, service: &str) -> Result<&IndexEntry, UpdateError> {
        self.0
            .get(service)
            .ok_or_else(|| UpdateError::Metadata(format!("service {} not present in index", service)))
    }
}
