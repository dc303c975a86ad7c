//! Metadata refresher.
//!
//! Thin driver around the TUF client: refresh the top-level roles,
//! resolve the service's index target, and keep a local cache so an
//! unchanged index costs no download. The cache comparison is the
//! availability signal - a miss means the trusted repository moved
//! ahead of what we have on disk.

use std::path::PathBuf;

use lumen_common::{AgentConfig, UpdateError};
use tokio_stream::StreamExt;
use tough::{RepositoryLoader, TargetName};
use tracing::{debug, info};
use url::Url;

use crate::artifact;

/// Whether the locally cached index already matched the trusted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Local copy matches the trusted hash; nothing downloaded.
    Hit,
    /// Trusted metadata points at a newer index; it was downloaded.
    Miss,
}

pub struct MetadataRefresher {
    metadata_url: String,
    targets_url: String,
    metadata_dir: PathBuf,
    index_path: PathBuf,
    target_name: String,
}

impl MetadataRefresher {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            metadata_url: config.metadata_url.clone(),
            targets_url: config.targets_url.clone(),
            metadata_dir: config.metadata_dir.clone(),
            index_path: config.index_path(),
            target_name: config.index_target_name(),
        }
    }

    /// Refresh trusted metadata and return the service's index bytes
    /// together with whether they came from cache or from a download.
    pub async fn refresh_target_index(&self) -> Result<(Vec<u8>, CacheStatus), UpdateError> {
        let root_bytes = tokio::fs::read(self.metadata_dir.join("root.json"))
            .await
            .map_err(|e| UpdateError::Metadata(format!("trusted root unreadable: {}", e)))?;

        let metadata_url = Url::parse(&self.metadata_url)
            .map_err(|e| UpdateError::Metadata(format!("bad metadata URL: {}", e)))?;
        let targets_url = Url::parse(&self.targets_url)
            .map_err(|e| UpdateError::Metadata(format!("bad targets URL: {}", e)))?;

        // Loading refreshes and verifies timestamp/snapshot/targets.
        let repository = RepositoryLoader::new(&root_bytes, metadata_url, targets_url)
            .load()
            .await
            .map_err(|e| UpdateError::Metadata(format!("failed to refresh trusted metadata: {}", e)))?;

        let target_name = TargetName::new(&self.target_name)
            .map_err(|e| UpdateError::Metadata(format!("bad target name: {}", e)))?;
        let target = repository
            .targets()
            .signed
            .targets
            .get(&target_name)
            .ok_or_else(|| {
                UpdateError::Metadata(format!("target {} not in trusted targets", self.target_name))
            })?;
        let trusted_sha = hex::encode(target.hashes.sha256.as_ref());

        if self.index_path.exists() {
            let local_sha = artifact::compute_sha256(&self.index_path)?;
            if local_sha == trusted_sha {
                debug!("cache hit for {}", self.target_name);
                let bytes = tokio::fs::read(&self.index_path).await?;
                return Ok((bytes, CacheStatus::Hit));
            }
        }

        let stream = repository
            .read_target(&target_name)
            .await
            .map_err(|e| UpdateError::Metadata(format!("failed to read target: {}", e)))?
            .ok_or_else(|| {
                UpdateError::Metadata(format!("target {} vanished during refresh", self.target_name))
            })?;

        let mut bytes = Vec::new();
        tokio::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| UpdateError::Metadata(format!("target download failed: {}", e)))?;
            bytes.extend_from_slice(&chunk);
        }

        if let Some(parent) = self.index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.index_path, &bytes).await?;
        info!(
            "fetched new target index {} ({} bytes)",
            self.target_name,
            bytes.len()
        );

        Ok((bytes, CacheStatus::Miss))
    }
}
